//! The signing workflow over a [`DocumentStore`].

mod expiry;
mod provision;
mod versioning;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;

use crate::artifact::ArtifactStorage;
use crate::clock::{Clock, SystemClock};
use crate::document::{Document, DocumentId, SignerIdentity};
use crate::error::SigningError;
use crate::events::{EventBus, SigningEvent};
use crate::notify::{portal_url, Notifier};
use crate::resolver::{resolve_against, summarize_stages, DocumentView, PacketProgress};
use crate::store::{DocumentStore, StoreError};
use crate::token::{TokenService, DEFAULT_TOKEN_TTL_DAYS};

pub use provision::NewDocument;

#[derive(Debug, Clone)]
pub struct SigningSettings {
    /// Base of the signer portal, e.g. `https://portal.example.com`.
    pub portal_base_url: String,
    pub token_ttl: Duration,
}

impl Default for SigningSettings {
    fn default() -> Self {
        Self {
            portal_base_url: "http://localhost:5173".to_string(),
            token_ttl: Duration::days(DEFAULT_TOKEN_TTL_DAYS),
        }
    }
}

/// A signer's resolved documents plus stage progress.
#[derive(Debug, Clone, Serialize)]
pub struct SignerPacket {
    pub documents: Vec<DocumentView>,
    pub progress: PacketProgress,
}

/// Receipt for an issued signing link. The token itself only travels in
/// the notification to the signer.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedLink {
    pub document_id: DocumentId,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

pub struct SigningService<S> {
    pub(crate) store: Arc<S>,
    pub(crate) tokens: TokenService<S>,
    pub(crate) artifacts: Arc<dyn ArtifactStorage>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) events: EventBus,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: SigningSettings,
}

impl<S> Clone for SigningService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            tokens: self.tokens.clone(),
            artifacts: self.artifacts.clone(),
            notifier: self.notifier.clone(),
            events: self.events.clone(),
            clock: self.clock.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<S: DocumentStore> SigningService<S> {
    pub fn new(
        store: Arc<S>,
        artifacts: Arc<dyn ArtifactStorage>,
        notifier: Arc<dyn Notifier>,
        settings: SigningSettings,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            tokens: TokenService::new(store.clone(), clock.clone(), settings.token_ttl),
            store,
            artifacts,
            notifier,
            events: EventBus::default(),
            clock,
            settings,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.tokens = TokenService::new(self.store.clone(), clock.clone(), self.settings.token_ttl);
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn tokens(&self) -> &TokenService<S> {
        &self.tokens
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Latest documents assigned to `email`, resolved and sorted for display.
    pub async fn list_for_signer(&self, email: &str) -> Result<SignerPacket, SigningError> {
        let documents = self.store.list_latest_for_signer(email).await?;
        let context = self.dependency_context(&documents).await?;
        let documents = resolve_against(documents, &context);
        let progress = summarize_stages(&documents);
        Ok(SignerPacket {
            documents,
            progress,
        })
    }

    /// The one document a token grants access to, resolved against its
    /// signer's other documents so a blocked signer sees what comes first.
    pub async fn view_for_token(&self, token: &str) -> Result<DocumentView, SigningError> {
        let bound = self.tokens.validate(token).await?;
        let siblings = self
            .store
            .list_latest_for_signer(&bound.signer.identity.email)
            .await?;
        let context = self.dependency_context(&siblings).await?;
        resolve_against(siblings, &context)
            .into_iter()
            .find(|view| view.document.id == bound.id)
            .ok_or(SigningError::DocumentNotFound(bound.id))
    }

    /// Every version of a document, oldest first, for audit.
    pub async fn version_history(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Document>, SigningError> {
        Ok(self.store.list_versions(document_id).await?)
    }

    pub async fn get_version(
        &self,
        document_id: DocumentId,
        version: i32,
    ) -> Result<Document, SigningError> {
        self.store
            .get_version(document_id, version)
            .await
            .map_err(|err| match err {
                StoreError::VersionNotFound { document_id, .. } => {
                    SigningError::DocumentNotFound(document_id)
                }
                other => other.into(),
            })
    }

    /// Issue a token for a pending document and send the signer a portal
    /// link in the background. Delivery failures are logged only.
    pub async fn issue_and_notify(
        &self,
        document_id: DocumentId,
    ) -> Result<IssuedLink, SigningError> {
        let grant = self.tokens.issue(document_id).await?;
        let document = self.store.get_latest(document_id).await?;
        let url = portal_url(&self.settings.portal_base_url, &grant.token);

        let notifier = self.notifier.clone();
        let signer = document.signer.identity.clone();
        let titles = vec![document.display_name()];
        tokio::spawn(async move {
            deliver(notifier.as_ref(), document_id, &signer, &titles, &url).await;
        });

        Ok(IssuedLink {
            document_id,
            expires_at: grant.expires_at,
        })
    }

    /// Latest rows of dependencies that live outside `documents`.
    async fn dependency_context(
        &self,
        documents: &[Document],
    ) -> Result<Vec<Document>, SigningError> {
        let owned: HashSet<DocumentId> = documents.iter().map(|d| d.id).collect();
        let missing: HashSet<DocumentId> = documents
            .iter()
            .filter_map(|d| d.dependency.target())
            .filter(|target| !owned.contains(target))
            .collect();

        let mut context = Vec::with_capacity(missing.len());
        for id in missing {
            match self.store.get_latest(id).await {
                Ok(document) => context.push(document),
                Err(StoreError::NotFound { .. }) => {
                    tracing::warn!(document_id = %id, "dependency target does not exist");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(context)
    }

    pub(crate) fn publish(&self, event: SigningEvent) {
        self.events.publish(event);
    }
}

/// Best-effort delivery; failures are logged as `NotificationFailure`.
pub(crate) async fn deliver(
    notifier: &dyn Notifier,
    document_id: DocumentId,
    signer: &SignerIdentity,
    titles: &[String],
    portal_url: &str,
) -> bool {
    match notifier.send(signer, titles, portal_url).await {
        Ok(()) => true,
        Err(err) => {
            let err = SigningError::from(err);
            tracing::warn!(
                document_id = %document_id,
                signer_email = %signer.email,
                kind = %err.kind(),
                error = %err,
                "signing notification was not delivered"
            );
            false
        }
    }
}
