use super::SigningService;
use crate::document::validate::validate_changes;
use crate::document::{Document, DocumentChanges, DocumentId};
use crate::error::SigningError;
use crate::events::SigningEvent;
use crate::store::DocumentStore;

impl<S: DocumentStore> SigningService<S> {
    /// Append a revised version of a pending document.
    ///
    /// The prior row keeps its content and loses `is_latest_version`. A token
    /// issued to the old signer does not carry over when the signer changes.
    pub async fn create_version(
        &self,
        document_id: DocumentId,
        changes: DocumentChanges,
    ) -> Result<Document, SigningError> {
        validate_changes(&changes)?;

        let mut snapshot = self.store.begin().await?;
        let current = match self.store.get_latest_for_update(&mut snapshot, document_id).await {
            Ok(current) => current,
            Err(err) => {
                self.store.abort(snapshot).await?;
                return Err(err.into());
            }
        };
        if !current.is_pending() {
            self.store.abort(snapshot).await?;
            return Err(SigningError::Finalized {
                document_id,
                status: current.signature_status,
            });
        }

        let mut next = current.next_version(&changes, self.clock.now());
        let signer_changed = !current.signer.identity.matches_email(&next.signer.identity.email);
        if signer_changed {
            next.signature_token = None;
        }
        if let Err(err) = self.store.insert_version(&mut snapshot, &next).await {
            self.store.abort(snapshot).await?;
            return Err(err.into());
        }
        self.store.commit(snapshot).await?;

        tracing::info!(
            document_id = %document_id,
            version = next.version,
            signer_changed,
            "created document version"
        );
        self.publish(SigningEvent::DocumentRevised {
            document_id,
            signer_email: next.signer.identity.email.clone(),
            version: next.version,
            at: next.updated_at,
        });
        Ok(next)
    }
}
