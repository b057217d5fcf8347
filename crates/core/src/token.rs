//! Single-document bearer tokens for signers without a session.
//!
//! A token authorizes actions on the one document it was issued against and
//! nothing else. It is valid while `now < expires_at` and is cleared in the
//! same transaction that commits a signature or decline.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::clock::Clock;
use crate::document::{Document, DocumentId, TokenGrant};
use crate::error::SigningError;
use crate::store::{DocumentStore, StoreError};

/// Random bytes per token (256 bits).
pub const TOKEN_BYTES: usize = 32;

pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 14;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("signature token not found")]
    NotFound,
    #[error("signature token is not valid here: {0}")]
    Invalid(String),
    #[error("signature token expired at {expires_at}")]
    Expired { expires_at: DateTime<Utc> },
}

/// Generate a fresh opaque token, URL-safe without padding.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Check that `document` carries `token` and that it has not lapsed.
pub fn check_grant(document: &Document, token: &str, now: DateTime<Utc>) -> Result<(), TokenError> {
    let grant = document
        .signature_token
        .as_ref()
        .filter(|grant| grant.token == token)
        .ok_or(TokenError::NotFound)?;
    if grant.is_expired_at(now) {
        return Err(TokenError::Expired {
            expires_at: grant.expires_at,
        });
    }
    Ok(())
}

pub struct TokenService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl<S> Clone for TokenService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
            ttl: self.ttl,
        }
    }
}

impl<S: DocumentStore> TokenService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for a pending document, replacing any earlier one.
    pub async fn issue(&self, document_id: DocumentId) -> Result<TokenGrant, SigningError> {
        let mut snapshot = self.store.begin().await?;
        let document = match self.store.get_latest_for_update(&mut snapshot, document_id).await {
            Ok(document) => document,
            Err(err) => {
                self.store.abort(snapshot).await?;
                return Err(err.into());
            }
        };
        if !document.is_pending() {
            self.store.abort(snapshot).await?;
            return Err(SigningError::AlreadySigned {
                document_id,
                status: document.signature_status,
            });
        }

        let grant = TokenGrant {
            token: generate_token(),
            expires_at: self.clock.now() + self.ttl,
        };
        self.store
            .set_token(&mut snapshot, document_id, Some(&grant))
            .await?;
        self.store.commit(snapshot).await?;

        tracing::info!(
            document_id = %document_id,
            expires_at = %grant.expires_at,
            "issued signature token"
        );
        Ok(grant)
    }

    /// Look up the document a token is bound to.
    pub async fn validate(&self, token: &str) -> Result<Document, SigningError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::NotFound.into());
        }
        let document = self
            .store
            .find_by_token(token)
            .await?
            .ok_or(TokenError::NotFound)?;
        check_grant(&document, token, self.clock.now())?;
        Ok(document)
    }

    /// Validate a token inside a snapshot, locking the bound row, and require
    /// that it was issued for `document_id`.
    pub async fn validate_for(
        &self,
        snapshot: &mut S::Snapshot,
        token: &str,
        document_id: DocumentId,
    ) -> Result<Document, SigningError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::NotFound.into());
        }
        let document = self
            .store
            .find_by_token_for_update(snapshot, token)
            .await?
            .ok_or(TokenError::NotFound)?;
        if document.id != document_id {
            tracing::warn!(
                requested = %document_id,
                bound = %document.id,
                "signature token presented for a different document"
            );
            return Err(TokenError::Invalid("issued for a different document".to_string()).into());
        }
        check_grant(&document, token, self.clock.now())?;
        Ok(document)
    }

    /// Clear the token so it can never be replayed. Must run in the same
    /// snapshot as the signature commit.
    pub async fn consume(
        &self,
        snapshot: &mut S::Snapshot,
        document_id: DocumentId,
    ) -> Result<(), StoreError> {
        self.store.set_token(snapshot, document_id, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::document::{
        DependencyLink, DocumentKind, DocumentStatus, SignatureStatus, Signer, SignerIdentity,
    };
    use crate::error::ErrorKind;
    use crate::store::MemoryDocumentStore;

    async fn setup() -> (TokenService<MemoryDocumentStore>, Arc<ManualClock>, Document) {
        let now = Utc::now();
        let store = Arc::new(MemoryDocumentStore::new());
        let clock = Arc::new(ManualClock::new(now));
        let document = Document {
            id: DocumentId::new(),
            kind: DocumentKind::OfferLetter,
            title: None,
            signer: Signer::pending(SignerIdentity::new("Ada", "ada@example.com", "CTO")),
            status: DocumentStatus::PendingSignature,
            signature_status: SignatureStatus::Pending,
            signing_stage: None,
            signing_order: None,
            dependency: DependencyLink::Independent,
            file_url: "mem://offer.pdf".to_string(),
            signed_file_url: None,
            signature_token: None,
            version: 1,
            is_latest_version: true,
            created_at: now,
            updated_at: now,
        };
        let mut tx = store.begin().await.unwrap();
        store.insert_document(&mut tx, &document).await.unwrap();
        store.commit(tx).await.unwrap();
        let service = TokenService::new(store, clock.clone(), Duration::days(14));
        (service, clock, document)
    }

    #[test]
    fn generated_tokens_are_long_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(URL_SAFE_NO_PAD.decode(&a).unwrap().len(), TOKEN_BYTES);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn issued_token_validates_to_its_document() {
        let (service, clock, document) = setup().await;
        let grant = service.issue(document.id).await.unwrap();
        assert_eq!(grant.expires_at, clock.now() + Duration::days(14));
        let bound = service.validate(&grant.token).await.unwrap();
        assert_eq!(bound.id, document.id);
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let (service, _, _) = setup().await;
        let err = service.validate("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenNotFound);
        let err = service.validate("   ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenNotFound);
    }

    #[tokio::test]
    async fn token_expires_at_boundary() {
        let (service, clock, document) = setup().await;
        let grant = service.issue(document.id).await.unwrap();
        clock.set(grant.expires_at - Duration::seconds(1));
        assert!(service.validate(&grant.token).await.is_ok());
        clock.set(grant.expires_at);
        let err = service.validate(&grant.token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenExpired);
    }

    #[tokio::test]
    async fn reissue_replaces_previous_token() {
        let (service, _, document) = setup().await;
        let first = service.issue(document.id).await.unwrap();
        let second = service.issue(document.id).await.unwrap();
        assert_eq!(
            service.validate(&first.token).await.unwrap_err().kind(),
            ErrorKind::TokenNotFound
        );
        assert!(service.validate(&second.token).await.is_ok());
    }

    #[tokio::test]
    async fn token_is_scoped_to_one_document() {
        let (service, _, document) = setup().await;
        let grant = service.issue(document.id).await.unwrap();
        let mut tx = service.store.begin().await.unwrap();
        let err = service
            .validate_for(&mut tx, &grant.token, DocumentId::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenInvalid);
    }

    #[tokio::test]
    async fn consumed_token_is_gone() {
        let (service, _, document) = setup().await;
        let grant = service.issue(document.id).await.unwrap();
        let mut tx = service.store.begin().await.unwrap();
        service.consume(&mut tx, document.id).await.unwrap();
        service.store.commit(tx).await.unwrap();
        assert_eq!(
            service.validate(&grant.token).await.unwrap_err().kind(),
            ErrorKind::TokenNotFound
        );
    }
}
