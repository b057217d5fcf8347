pub mod documents;
pub mod health;
pub mod listen;
pub mod signatures;

#[cfg(test)]
mod tests;

use axum::Router;
use exec_signing_core::store::DocumentStore;

use crate::state::AppState;

/// Assemble the full router with all route groups.
pub fn build_router<S: DocumentStore>(state: AppState<S>) -> Router {
    Router::new()
        .merge(health::routes())
        .merge(documents::routes())
        .merge(signatures::routes())
        .merge(listen::routes())
        .with_state(state)
}
