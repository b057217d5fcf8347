use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::document::validate::ValidationError;
use crate::document::{DocumentId, SignatureStatus};
use crate::notify::NotifyError;
use crate::resolver::DocumentRef;
use crate::signature::image::ImageError;
use crate::store::StoreError;
use crate::token::TokenError;

/// Machine-readable failure kind, sent to clients as `{ok:false, error:<kind>}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotAuthorized,
    AlreadySigned,
    DependencyNotMet,
    UnresolvableDependency,
    TokenNotFound,
    TokenInvalid,
    TokenExpired,
    EmptySignature,
    InvalidSignatureImage,
    StorageFailure,
    NotificationFailure,
    DocumentNotFound,
    InvalidTransition,
    DocumentFinalized,
    ValidationFailed,
    Conflict,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAuthorized => "NotAuthorized",
            Self::AlreadySigned => "AlreadySigned",
            Self::DependencyNotMet => "DependencyNotMet",
            Self::UnresolvableDependency => "UnresolvableDependency",
            Self::TokenNotFound => "TokenNotFound",
            Self::TokenInvalid => "TokenInvalid",
            Self::TokenExpired => "TokenExpired",
            Self::EmptySignature => "EmptySignature",
            Self::InvalidSignatureImage => "InvalidSignatureImage",
            Self::StorageFailure => "StorageFailure",
            Self::NotificationFailure => "NotificationFailure",
            Self::DocumentNotFound => "DocumentNotFound",
            Self::InvalidTransition => "InvalidTransition",
            Self::DocumentFinalized => "DocumentFinalized",
            Self::ValidationFailed => "ValidationFailed",
            Self::Conflict => "Conflict",
        }
    }

    /// Outcomes a client should treat as success-equivalent on resubmission.
    pub fn is_idempotent_success(&self) -> bool {
        matches!(self, Self::AlreadySigned)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("caller is not the assigned signer of document {document_id}")]
    NotAuthorized { document_id: DocumentId },

    #[error("document {document_id} is already {status}")]
    AlreadySigned {
        document_id: DocumentId,
        status: SignatureStatus,
    },

    #[error("document {document_id} is waiting on {} to be signed", blocking.name)]
    DependencyNotMet {
        document_id: DocumentId,
        blocking: DocumentRef,
    },

    #[error("document {document_id} depends on {missing}, which cannot be resolved")]
    UnresolvableDependency {
        document_id: DocumentId,
        missing: DocumentId,
    },

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("signature image contains no ink")]
    EmptySignature,

    #[error("signature image is unusable: {0}")]
    InvalidImage(ImageError),

    #[error("artifact storage failed: {0}")]
    Storage(#[from] ArtifactError),

    #[error("notification failed: {0}")]
    Notification(#[from] NotifyError),

    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("document {document_id} cannot move from {from} to {to}")]
    InvalidTransition {
        document_id: DocumentId,
        from: SignatureStatus,
        to: SignatureStatus,
    },

    #[error("document {document_id} is {status} and can no longer be edited")]
    Finalized {
        document_id: DocumentId,
        status: SignatureStatus,
    },

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(StoreError),
}

impl SigningError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAuthorized { .. } => ErrorKind::NotAuthorized,
            Self::AlreadySigned { .. } => ErrorKind::AlreadySigned,
            Self::DependencyNotMet { .. } => ErrorKind::DependencyNotMet,
            Self::UnresolvableDependency { .. } => ErrorKind::UnresolvableDependency,
            Self::Token(TokenError::NotFound) => ErrorKind::TokenNotFound,
            Self::Token(TokenError::Invalid(_)) => ErrorKind::TokenInvalid,
            Self::Token(TokenError::Expired { .. }) => ErrorKind::TokenExpired,
            Self::EmptySignature => ErrorKind::EmptySignature,
            Self::InvalidImage(_) => ErrorKind::InvalidSignatureImage,
            Self::Storage(_) => ErrorKind::StorageFailure,
            Self::Notification(_) => ErrorKind::NotificationFailure,
            Self::DocumentNotFound(_) => ErrorKind::DocumentNotFound,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Finalized { .. } => ErrorKind::DocumentFinalized,
            Self::Validation(_) => ErrorKind::ValidationFailed,
            Self::Store(StoreError::Conflict { .. }) => ErrorKind::Conflict,
            Self::Store(_) => ErrorKind::StorageFailure,
        }
    }
}

impl From<StoreError> for SigningError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { document_id } => Self::DocumentNotFound(document_id),
            other => Self::Store(other),
        }
    }
}

impl From<ImageError> for SigningError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::Blank => Self::EmptySignature,
            other => Self::InvalidImage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_render_as_bare_names() {
        assert_eq!(ErrorKind::AlreadySigned.to_string(), "AlreadySigned");
        assert_eq!(
            serde_json::to_string(&ErrorKind::TokenExpired).unwrap(),
            "\"TokenExpired\""
        );
    }

    #[test]
    fn store_not_found_becomes_document_not_found() {
        let id = DocumentId::new();
        let err: SigningError = StoreError::NotFound { document_id: id }.into();
        assert_eq!(err.kind(), ErrorKind::DocumentNotFound);
    }

    #[test]
    fn blank_image_becomes_empty_signature() {
        let err: SigningError = ImageError::Blank.into();
        assert_eq!(err.kind(), ErrorKind::EmptySignature);
        let err: SigningError = ImageError::NotPng("bad magic".into()).into();
        assert_eq!(err.kind(), ErrorKind::InvalidSignatureImage);
    }

    #[test]
    fn only_already_signed_is_idempotent() {
        assert!(ErrorKind::AlreadySigned.is_idempotent_success());
        assert!(!ErrorKind::DependencyNotMet.is_idempotent_success());
    }
}
