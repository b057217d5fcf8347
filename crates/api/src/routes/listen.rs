//! Push channel telling a signer's portal to re-resolve its documents.
//!
//! Events carry ids only; clients refetch `GET /v1/documents` on receipt.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use exec_signing_core::events::SigningEvent;
use exec_signing_core::store::DocumentStore;
use tokio::sync::broadcast::error::RecvError;

use crate::auth::AuthUser;
use crate::state::AppState;

pub fn routes<S: DocumentStore>() -> Router<AppState<S>> {
    Router::new().route("/v1/listen", get(listen::<S>))
}

async fn listen<S: DocumentStore>(
    State(state): State<AppState<S>>,
    user: AuthUser,
    ws: WebSocketUpgrade,
) -> Response {
    let email = user.email().to_string();
    ws.on_upgrade(move |socket| stream_events(socket, state, email))
}

async fn stream_events<S: DocumentStore>(mut socket: WebSocket, state: AppState<S>, email: String) {
    let mut events = state.event_bus().subscribe();
    if send(&mut socket, &SigningEvent::Welcome).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) if event.concerns(&email) => {
                    if send(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, signer_email = %email, "listener lagged behind signing events");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!(signer_email = %email, "listener disconnected");
}

async fn send(socket: &mut WebSocket, event: &SigningEvent) -> Result<(), axum::Error> {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(error = %err, "failed to encode signing event");
            return Ok(());
        }
    };
    socket.send(Message::Text(payload.into())).await
}
