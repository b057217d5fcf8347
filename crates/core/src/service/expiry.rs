use super::SigningService;
use crate::document::{DocumentId, SignatureStatus};
use crate::error::SigningError;
use crate::events::SigningEvent;
use crate::store::{DocumentStore, StatusChange};

impl<S: DocumentStore> SigningService<S> {
    /// Move pending documents whose token lapsed to `expired`.
    ///
    /// Each document is handled in its own snapshot; one failure is logged
    /// and does not stop the sweep.
    pub async fn expire_overdue(&self) -> Result<Vec<DocumentId>, SigningError> {
        let now = self.clock.now();
        let candidates = self.store.list_expirable(now).await?;
        let mut expired = Vec::with_capacity(candidates.len());

        for document_id in candidates {
            match self.expire_one(document_id).await {
                Ok(Some(signer_email)) => {
                    self.publish(SigningEvent::DocumentExpired {
                        document_id,
                        signer_email,
                        at: now,
                    });
                    expired.push(document_id);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        document_id = %document_id,
                        kind = %err.kind(),
                        error = %err,
                        "failed to expire document"
                    );
                }
            }
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired overdue documents");
        }
        Ok(expired)
    }

    /// Returns the signer's email when the document was expired, `None` when
    /// it was re-issued or finished since it was listed.
    async fn expire_one(&self, document_id: DocumentId) -> Result<Option<String>, SigningError> {
        let now = self.clock.now();
        let mut snapshot = self.store.begin().await?;
        let document = self.store.get_latest_for_update(&mut snapshot, document_id).await?;
        let lapsed = document.is_pending()
            && document
                .signature_token
                .as_ref()
                .is_some_and(|grant| grant.is_expired_at(now));
        if !lapsed {
            self.store.abort(snapshot).await?;
            return Ok(None);
        }

        let change = StatusChange {
            to: SignatureStatus::Expired,
            at: now,
            reason: None,
        };
        self.store
            .change_signature_status(&mut snapshot, document_id, document.version, &change)
            .await?;
        self.store.commit(snapshot).await?;
        Ok(Some(document.signer.identity.email))
    }
}
