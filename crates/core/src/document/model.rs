use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::DocumentId;

/// Kind of executive document in an appointment packet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    PreIncorporationConsent,
    AppointmentLetter,
    BoardResolution,
    #[serde(rename = "certificate")]
    StockCertificate,
    EmploymentAgreement,
    ConfidentialityIp,
    StockSubscription,
    DeferredCompensation,
    OfferLetter,
    /// Kinds introduced by provisioning tools after this enum was written.
    #[serde(untagged)]
    Other(String),
}

impl DocumentKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "pre_incorporation_consent" => Self::PreIncorporationConsent,
            "appointment_letter" => Self::AppointmentLetter,
            "board_resolution" => Self::BoardResolution,
            "certificate" => Self::StockCertificate,
            "employment_agreement" => Self::EmploymentAgreement,
            "confidentiality_ip" => Self::ConfidentialityIp,
            "stock_subscription" => Self::StockSubscription,
            "deferred_compensation" => Self::DeferredCompensation,
            "offer_letter" => Self::OfferLetter,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::PreIncorporationConsent => "pre_incorporation_consent",
            Self::AppointmentLetter => "appointment_letter",
            Self::BoardResolution => "board_resolution",
            Self::StockCertificate => "certificate",
            Self::EmploymentAgreement => "employment_agreement",
            Self::ConfidentialityIp => "confidentiality_ip",
            Self::StockSubscription => "stock_subscription",
            Self::DeferredCompensation => "deferred_compensation",
            Self::OfferLetter => "offer_letter",
            Self::Other(raw) => raw,
        }
    }

    /// Human-readable name shown to signers.
    pub fn display_name(&self) -> String {
        match self {
            Self::PreIncorporationConsent => "Pre-Incorporation Consent".to_string(),
            Self::AppointmentLetter => "Appointment Letter".to_string(),
            Self::BoardResolution => "Board Resolution".to_string(),
            Self::StockCertificate => "Stock Certificate".to_string(),
            Self::EmploymentAgreement => "Employment Agreement".to_string(),
            Self::ConfidentialityIp => "Confidentiality & IP Assignment".to_string(),
            Self::StockSubscription => "Stock Subscription".to_string(),
            Self::DeferredCompensation => "Deferred Compensation".to_string(),
            Self::OfferLetter => "Offer Letter".to_string(),
            Self::Other(raw) => raw
                .split('_')
                .filter(|w| !w.is_empty())
                .map(|w| {
                    let mut chars = w.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall document lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    PendingSignature,
    PartiallySigned,
    Signed,
    Declined,
    Expired,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingSignature => "pending_signature",
            Self::PartiallySigned => "partially_signed",
            Self::Signed => "signed",
            Self::Declined => "declined",
            Self::Expired => "expired",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "draft" => Self::Draft,
            "pending_signature" => Self::PendingSignature,
            "partially_signed" => Self::PartiallySigned,
            "signed" => Self::Signed,
            "declined" => Self::Declined,
            "expired" => Self::Expired,
            _ => return None,
        })
    }
}

/// Signer-facing subset of [`DocumentStatus`].
///
/// Legal transitions: `Pending -> Signed`, `Pending -> Declined`, and the
/// system-driven `Pending -> Expired`. Every other state is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    Pending,
    Signed,
    Expired,
    Declined,
}

impl SignatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Signed => "signed",
            Self::Expired => "expired",
            Self::Declined => "declined",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "pending" => Self::Pending,
            "signed" => Self::Signed,
            "expired" => Self::Expired,
            "declined" => Self::Declined,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn can_transition_to(&self, next: SignatureStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Signed)
                | (Self::Pending, Self::Declined)
                | (Self::Pending, Self::Expired)
        )
    }

    /// Document status that accompanies a terminal signature status.
    pub fn document_status(&self) -> Option<DocumentStatus> {
        match self {
            Self::Pending => None,
            Self::Signed => Some(DocumentStatus::Signed),
            Self::Expired => Some(DocumentStatus::Expired),
            Self::Declined => Some(DocumentStatus::Declined),
        }
    }
}

impl fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerStatus {
    Pending,
    Signed,
    Declined,
}

impl SignerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Signed => "signed",
            Self::Declined => "declined",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "pending" => Self::Pending,
            "signed" => Self::Signed,
            "declined" => Self::Declined,
            _ => return None,
        })
    }
}

/// Who is expected to sign a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerIdentity {
    #[serde(rename = "signer_name")]
    pub name: String,
    #[serde(rename = "signer_email")]
    pub email: String,
    #[serde(rename = "signer_role")]
    pub role: String,
}

impl SignerIdentity {
    pub fn new(name: impl Into<String>, email: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            role: role.into(),
        }
    }

    /// Emails compare case-insensitively and ignore surrounding whitespace.
    pub fn matches_email(&self, email: &str) -> bool {
        self.email.trim().eq_ignore_ascii_case(email.trim())
    }
}

/// The signing party of a document and what they submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    #[serde(flatten)]
    pub identity: SignerIdentity,
    #[serde(rename = "signer_status")]
    pub status: SignerStatus,
    pub typed_name: Option<String>,
    /// PNG bytes of the captured signature. Never serialized to clients.
    #[serde(skip)]
    pub signature_image: Option<Vec<u8>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub signer_ip: Option<String>,
    pub signer_user_agent: Option<String>,
    pub declined_at: Option<DateTime<Utc>>,
    pub decline_reason: Option<String>,
}

impl Signer {
    pub fn pending(identity: SignerIdentity) -> Self {
        Self {
            identity,
            status: SignerStatus::Pending,
            typed_name: None,
            signature_image: None,
            signed_at: None,
            signer_ip: None,
            signer_user_agent: None,
            declined_at: None,
            decline_reason: None,
        }
    }
}

/// Hard precondition on another document.
///
/// On the wire this is the nullable `depends_on_document_id` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<DocumentId>", into = "Option<DocumentId>")]
pub enum DependencyLink {
    #[default]
    Independent,
    After(DocumentId),
}

impl DependencyLink {
    pub fn target(&self) -> Option<DocumentId> {
        match self {
            Self::Independent => None,
            Self::After(id) => Some(*id),
        }
    }
}

impl From<Option<DocumentId>> for DependencyLink {
    fn from(value: Option<DocumentId>) -> Self {
        match value {
            Some(id) => Self::After(id),
            None => Self::Independent,
        }
    }
}

impl From<DependencyLink> for Option<DocumentId> {
    fn from(value: DependencyLink) -> Self {
        value.target()
    }
}

/// A bearer token bound to one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenGrant {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// One version row of an executive document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    pub title: Option<String>,
    #[serde(flatten)]
    pub signer: Signer,
    pub status: DocumentStatus,
    pub signature_status: SignatureStatus,
    pub signing_stage: Option<u32>,
    pub signing_order: Option<u32>,
    #[serde(rename = "depends_on_document_id")]
    pub dependency: DependencyLink,
    pub file_url: String,
    pub signed_file_url: Option<String>,
    #[serde(skip)]
    pub signature_token: Option<TokenGrant>,
    pub version: i32,
    pub is_latest_version: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn signer_identity(&self) -> &SignerIdentity {
        &self.signer.identity
    }

    pub fn is_pending(&self) -> bool {
        self.signature_status == SignatureStatus::Pending
    }

    /// Title if one was given, otherwise the kind's display name.
    pub fn display_name(&self) -> String {
        match &self.title {
            Some(title) if !title.trim().is_empty() => title.clone(),
            _ => self.kind.display_name(),
        }
    }

    /// Build the next version row from this one. The caller is responsible
    /// for flipping `is_latest_version` on `self` in the same transaction.
    pub fn next_version(&self, changes: &DocumentChanges, now: DateTime<Utc>) -> Document {
        let mut next = self.clone();
        if let Some(kind) = &changes.kind {
            next.kind = kind.clone();
        }
        if let Some(title) = &changes.title {
            next.title = Some(title.clone());
        }
        if let Some(file_url) = &changes.file_url {
            next.file_url = file_url.clone();
        }
        if let Some(name) = &changes.signer_name {
            next.signer.identity.name = name.clone();
        }
        if let Some(email) = &changes.signer_email {
            next.signer.identity.email = email.clone();
        }
        if let Some(role) = &changes.signer_role {
            next.signer.identity.role = role.clone();
        }
        next.version = self.version + 1;
        next.is_latest_version = true;
        next.updated_at = now;
        next
    }
}

/// Editable fields of a document. Stage, order and dependency are fixed at
/// provisioning and cannot be changed by a new version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChanges {
    #[serde(default, rename = "type")]
    pub kind: Option<DocumentKind>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub signer_name: Option<String>,
    #[serde(default)]
    pub signer_email: Option<String>,
    #[serde(default)]
    pub signer_role: Option<String>,
}

impl DocumentChanges {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.title.is_none()
            && self.file_url.is_none()
            && self.signer_name.is_none()
            && self.signer_email.is_none()
            && self.signer_role.is_none()
    }
}
