use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::DocumentId;

/// Emitted after a committed state change, so listeners re-resolve the
/// affected signer's documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SigningEvent {
    Welcome,
    #[serde(rename_all = "camelCase")]
    DocumentSigned {
        document_id: DocumentId,
        signer_email: String,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    DocumentDeclined {
        document_id: DocumentId,
        signer_email: String,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    DocumentExpired {
        document_id: DocumentId,
        signer_email: String,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    DocumentRevised {
        document_id: DocumentId,
        signer_email: String,
        version: i32,
        at: DateTime<Utc>,
    },
}

impl SigningEvent {
    /// Signer whose view is affected, if any.
    pub fn signer_email(&self) -> Option<&str> {
        match self {
            Self::Welcome => None,
            Self::DocumentSigned { signer_email, .. }
            | Self::DocumentDeclined { signer_email, .. }
            | Self::DocumentExpired { signer_email, .. }
            | Self::DocumentRevised { signer_email, .. } => Some(signer_email),
        }
    }

    pub fn concerns(&self, email: &str) -> bool {
        self.signer_email()
            .is_some_and(|signer| signer.trim().eq_ignore_ascii_case(email.trim()))
    }
}
