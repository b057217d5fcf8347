use std::sync::Arc;

use exec_signing_core::events::EventBus;
use exec_signing_core::store::DocumentStore;
use exec_signing_core::SigningService;

use crate::config::AppConfig;

/// Shared application state, passed to all handlers via Axum's `State` extractor.
/// Wrapped in `Arc` so cloning is cheap.
pub struct AppState<S> {
    inner: Arc<InnerState<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct InnerState<S> {
    signing: SigningService<S>,
    config: AppConfig,
}

impl<S: DocumentStore> AppState<S> {
    pub fn new(signing: SigningService<S>, config: AppConfig) -> Self {
        Self {
            inner: Arc::new(InnerState { signing, config }),
        }
    }

    pub fn signing(&self) -> &SigningService<S> {
        &self.inner.signing
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn event_bus(&self) -> &EventBus {
        self.inner.signing.events()
    }
}
