use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{DocumentStore, SignatureWrite, StatusChange, StoreError};
use crate::document::{
    Document, DocumentId, DocumentStatus, SignatureStatus, SignerStatus, TokenGrant,
};

/// Rows per document id, oldest version first.
#[derive(Debug, Clone, Default)]
struct MemoryState {
    documents: HashMap<DocumentId, Vec<Document>>,
}

impl MemoryState {
    fn latest(&self, document_id: DocumentId) -> Option<&Document> {
        self.documents
            .get(&document_id)
            .and_then(|rows| rows.iter().find(|row| row.is_latest_version))
    }

    fn latest_mut(&mut self, document_id: DocumentId) -> Result<&mut Document, StoreError> {
        self.documents
            .get_mut(&document_id)
            .and_then(|rows| rows.iter_mut().find(|row| row.is_latest_version))
            .ok_or(StoreError::NotFound { document_id })
    }

    fn latest_by_token(&self, token: &str) -> Option<&Document> {
        self.documents
            .values()
            .flat_map(|rows| rows.iter())
            .filter(|row| row.is_latest_version)
            .find(|row| {
                row.signature_token
                    .as_ref()
                    .is_some_and(|grant| grant.token == token)
            })
    }

    /// Latest row that is still pending at `expected_version`.
    fn guarded_mut(
        &mut self,
        document_id: DocumentId,
        expected_version: i32,
    ) -> Result<&mut Document, StoreError> {
        let row = self.latest_mut(document_id)?;
        if row.version != expected_version || row.signature_status != SignatureStatus::Pending {
            return Err(StoreError::Conflict {
                document_id,
                expected_version,
            });
        }
        Ok(row)
    }
}

/// Process-local store. A snapshot holds the state lock for its whole
/// lifetime, so transactions are serialized.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Working copy of the state plus the lock that guards the committed state.
pub struct MemorySnapshot {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    type Snapshot = MemorySnapshot;

    async fn begin(&self) -> Result<Self::Snapshot, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(MemorySnapshot { guard, working })
    }

    async fn commit(&self, snapshot: Self::Snapshot) -> Result<(), StoreError> {
        let MemorySnapshot { mut guard, working } = snapshot;
        *guard = working;
        Ok(())
    }

    async fn abort(&self, snapshot: Self::Snapshot) -> Result<(), StoreError> {
        drop(snapshot);
        Ok(())
    }

    async fn insert_document(
        &self,
        snapshot: &mut Self::Snapshot,
        document: &Document,
    ) -> Result<(), StoreError> {
        if snapshot.working.documents.contains_key(&document.id) {
            return Err(StoreError::AlreadyExists {
                document_id: document.id,
            });
        }
        snapshot
            .working
            .documents
            .insert(document.id, vec![document.clone()]);
        Ok(())
    }

    async fn get_latest_in(
        &self,
        snapshot: &mut Self::Snapshot,
        document_id: DocumentId,
    ) -> Result<Option<Document>, StoreError> {
        Ok(snapshot.working.latest(document_id).cloned())
    }

    async fn get_latest_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        document_id: DocumentId,
    ) -> Result<Document, StoreError> {
        snapshot
            .working
            .latest(document_id)
            .cloned()
            .ok_or(StoreError::NotFound { document_id })
    }

    async fn find_by_token_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        token: &str,
    ) -> Result<Option<Document>, StoreError> {
        Ok(snapshot.working.latest_by_token(token).cloned())
    }

    async fn apply_signature(
        &self,
        snapshot: &mut Self::Snapshot,
        document_id: DocumentId,
        expected_version: i32,
        write: &SignatureWrite,
    ) -> Result<(), StoreError> {
        let row = snapshot.working.guarded_mut(document_id, expected_version)?;
        row.signature_status = SignatureStatus::Signed;
        row.status = DocumentStatus::Signed;
        row.signer.status = SignerStatus::Signed;
        row.signer.typed_name = Some(write.typed_name.clone());
        row.signer.signature_image = Some(write.signature_image.clone());
        row.signer.signed_at = Some(write.signed_at);
        row.signer.signer_ip = write.signer_ip.clone();
        row.signer.signer_user_agent = write.signer_user_agent.clone();
        row.signed_file_url = Some(write.signed_file_url.clone());
        row.signature_token = None;
        row.updated_at = write.signed_at;
        Ok(())
    }

    async fn change_signature_status(
        &self,
        snapshot: &mut Self::Snapshot,
        document_id: DocumentId,
        expected_version: i32,
        change: &StatusChange,
    ) -> Result<(), StoreError> {
        let row = snapshot.working.guarded_mut(document_id, expected_version)?;
        let Some(status) = change.to.document_status() else {
            return Err(StoreError::Conflict {
                document_id,
                expected_version,
            });
        };
        row.signature_status = change.to;
        row.status = status;
        if change.to == SignatureStatus::Declined {
            row.signer.status = SignerStatus::Declined;
            row.signer.declined_at = Some(change.at);
            row.signer.decline_reason = change.reason.clone();
        }
        row.signature_token = None;
        row.updated_at = change.at;
        Ok(())
    }

    async fn set_token(
        &self,
        snapshot: &mut Self::Snapshot,
        document_id: DocumentId,
        grant: Option<&TokenGrant>,
    ) -> Result<(), StoreError> {
        let row = snapshot.working.latest_mut(document_id)?;
        row.signature_token = grant.cloned();
        if row.status == DocumentStatus::Draft && grant.is_some() {
            row.status = DocumentStatus::PendingSignature;
        }
        Ok(())
    }

    async fn insert_version(
        &self,
        snapshot: &mut Self::Snapshot,
        document: &Document,
    ) -> Result<(), StoreError> {
        let expected_version = document.version - 1;
        let prior = snapshot.working.latest_mut(document.id)?;
        if prior.version != expected_version {
            return Err(StoreError::Conflict {
                document_id: document.id,
                expected_version,
            });
        }
        prior.is_latest_version = false;
        let mut next = document.clone();
        next.is_latest_version = true;
        snapshot
            .working
            .documents
            .entry(document.id)
            .or_default()
            .push(next);
        Ok(())
    }

    async fn get_latest(&self, document_id: DocumentId) -> Result<Document, StoreError> {
        let state = self.state.lock().await;
        state
            .latest(document_id)
            .cloned()
            .ok_or(StoreError::NotFound { document_id })
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Document>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.latest_by_token(token).cloned())
    }

    async fn list_latest_for_signer(&self, email: &str) -> Result<Vec<Document>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .documents
            .values()
            .flat_map(|rows| rows.iter())
            .filter(|row| row.is_latest_version && row.signer.identity.matches_email(email))
            .cloned()
            .collect())
    }

    async fn list_versions(&self, document_id: DocumentId) -> Result<Vec<Document>, StoreError> {
        let state = self.state.lock().await;
        let rows = state
            .documents
            .get(&document_id)
            .ok_or(StoreError::NotFound { document_id })?;
        let mut rows = rows.clone();
        rows.sort_by_key(|row| row.version);
        Ok(rows)
    }

    async fn get_version(
        &self,
        document_id: DocumentId,
        version: i32,
    ) -> Result<Document, StoreError> {
        let state = self.state.lock().await;
        state
            .documents
            .get(&document_id)
            .and_then(|rows| rows.iter().find(|row| row.version == version))
            .cloned()
            .ok_or(StoreError::VersionNotFound {
                document_id,
                version,
            })
    }

    async fn list_expirable(&self, now: DateTime<Utc>) -> Result<Vec<DocumentId>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .documents
            .values()
            .flat_map(|rows| rows.iter())
            .filter(|row| row.is_latest_version && row.is_pending())
            .filter(|row| {
                row.signature_token
                    .as_ref()
                    .is_some_and(|grant| grant.is_expired_at(now))
            })
            .map(|row| row.id)
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
