//! Persistence for document version rows.
//!
//! All writes happen inside a snapshot (transaction):
//!
//! 1. `begin()` starts a snapshot
//! 2. mutating calls take `&mut snapshot`
//! 3. `commit(snapshot)` makes them durable, `abort(snapshot)` discards them
//!
//! A snapshot dropped without `commit` is rolled back. Status-changing writes
//! are guarded on `signature_status = 'pending'` and the expected row
//! version; a guard miss returns [`StoreError::Conflict`] and writes nothing.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::document::{Document, DocumentId, SignatureStatus, TokenGrant};

pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {document_id}")]
    NotFound { document_id: DocumentId },

    #[error("document {document_id} has no version {version}")]
    VersionNotFound {
        document_id: DocumentId,
        version: i32,
    },

    #[error("document already exists: {document_id}")]
    AlreadyExists { document_id: DocumentId },

    /// The guarded row was not in the expected state: another transaction
    /// changed it first.
    #[error("concurrent conflict on document {document_id}: expected pending version {expected_version}")]
    Conflict {
        document_id: DocumentId,
        expected_version: i32,
    },

    /// A stored row could not be mapped back into the domain model.
    #[error("corrupt row for document {document_id}: {reason}")]
    Corrupt {
        document_id: DocumentId,
        reason: String,
    },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Fields written when a signature is committed.
#[derive(Debug, Clone)]
pub struct SignatureWrite {
    pub typed_name: String,
    pub signature_image: Vec<u8>,
    pub signed_at: DateTime<Utc>,
    pub signer_ip: Option<String>,
    pub signer_user_agent: Option<String>,
    pub signed_file_url: String,
}

/// A non-signing terminal transition (`declined` or `expired`).
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub to: SignatureStatus,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    type Snapshot: Send;

    // ── Snapshot lifecycle ───────────────────────────────────────────────────

    async fn begin(&self) -> Result<Self::Snapshot, StoreError>;

    async fn commit(&self, snapshot: Self::Snapshot) -> Result<(), StoreError>;

    async fn abort(&self, snapshot: Self::Snapshot) -> Result<(), StoreError>;

    // ── Within a snapshot ────────────────────────────────────────────────────

    /// Insert version 1 of a new document.
    ///
    /// Returns `AlreadyExists` if any row with this id exists.
    async fn insert_document(
        &self,
        snapshot: &mut Self::Snapshot,
        document: &Document,
    ) -> Result<(), StoreError>;

    /// Latest version of a document as seen by this snapshot, without locking.
    async fn get_latest_in(
        &self,
        snapshot: &mut Self::Snapshot,
        document_id: DocumentId,
    ) -> Result<Option<Document>, StoreError>;

    /// Latest version of a document, locked until the snapshot ends.
    async fn get_latest_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        document_id: DocumentId,
    ) -> Result<Document, StoreError>;

    /// Latest document carrying `token`, locked until the snapshot ends.
    async fn find_by_token_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        token: &str,
    ) -> Result<Option<Document>, StoreError>;

    /// Mark the latest row signed and clear its token.
    ///
    /// Guarded on `version = expected_version AND signature_status = 'pending'`.
    async fn apply_signature(
        &self,
        snapshot: &mut Self::Snapshot,
        document_id: DocumentId,
        expected_version: i32,
        write: &SignatureWrite,
    ) -> Result<(), StoreError>;

    /// Move the latest row from `pending` to `change.to` and clear its token.
    ///
    /// Guarded like [`DocumentStore::apply_signature`].
    async fn change_signature_status(
        &self,
        snapshot: &mut Self::Snapshot,
        document_id: DocumentId,
        expected_version: i32,
        change: &StatusChange,
    ) -> Result<(), StoreError>;

    /// Set or clear the bearer token on the latest row.
    async fn set_token(
        &self,
        snapshot: &mut Self::Snapshot,
        document_id: DocumentId,
        grant: Option<&TokenGrant>,
    ) -> Result<(), StoreError>;

    /// Append `document` as the new latest row and flip the prior latest.
    ///
    /// `document.version` must be exactly one above the current latest,
    /// otherwise `Conflict`.
    async fn insert_version(
        &self,
        snapshot: &mut Self::Snapshot,
        document: &Document,
    ) -> Result<(), StoreError>;

    // ── Reads outside a snapshot ─────────────────────────────────────────────

    async fn get_latest(&self, document_id: DocumentId) -> Result<Document, StoreError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<Document>, StoreError>;

    /// Latest versions of every document assigned to `email`.
    async fn list_latest_for_signer(&self, email: &str) -> Result<Vec<Document>, StoreError>;

    /// Every version of a document, oldest first.
    async fn list_versions(&self, document_id: DocumentId) -> Result<Vec<Document>, StoreError>;

    async fn get_version(
        &self,
        document_id: DocumentId,
        version: i32,
    ) -> Result<Document, StoreError>;

    /// Pending latest documents whose token expired at or before `now`.
    async fn list_expirable(&self, now: DateTime<Utc>) -> Result<Vec<DocumentId>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
