/// Field validation for provisioning input and version changes.
use thiserror::Error;

use super::model::{DocumentChanges, SignerIdentity};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("signer name cannot be empty")]
    EmptySignerName,
    #[error("signer email is not a valid address: {0:?}")]
    InvalidSignerEmail(String),
    #[error("file_url cannot be empty")]
    EmptyFileUrl,
    #[error("{field} must be a positive integer")]
    NonPositive { field: &'static str },
    #[error("document {0} cannot depend on itself")]
    SelfDependency(String),
    #[error("document {dependent} depends on unknown document {missing}")]
    UnknownDependency { dependent: String, missing: String },
    #[error("dependency cycle through document {0}")]
    DependencyCycle(String),
    #[error("document {0} appears more than once in the packet")]
    DuplicateId(String),
    #[error("packet contains no documents")]
    EmptyPacket,
    #[error("a new version must change at least one field")]
    NoChanges,
    #[error("typed name cannot be empty")]
    EmptyTypedName,
}

pub fn validate_signer(identity: &SignerIdentity) -> Result<(), ValidationError> {
    if identity.name.trim().is_empty() {
        return Err(ValidationError::EmptySignerName);
    }
    validate_email(&identity.email)
}

fn validate_email(email: &str) -> Result<(), ValidationError> {
    let trimmed = email.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(ValidationError::InvalidSignerEmail(email.to_string())),
    }
}

/// Stage and order are optional, but when present must be at least 1.
pub fn validate_position(stage: Option<i64>, order: Option<i64>) -> Result<(), ValidationError> {
    if matches!(stage, Some(s) if s < 1) {
        return Err(ValidationError::NonPositive {
            field: "signing_stage",
        });
    }
    if matches!(order, Some(o) if o < 1) {
        return Err(ValidationError::NonPositive {
            field: "signing_order",
        });
    }
    Ok(())
}

pub fn validate_file_url(url: &str) -> Result<(), ValidationError> {
    if url.trim().is_empty() {
        return Err(ValidationError::EmptyFileUrl);
    }
    Ok(())
}

pub fn validate_changes(changes: &DocumentChanges) -> Result<(), ValidationError> {
    if changes.is_empty() {
        return Err(ValidationError::NoChanges);
    }
    if let Some(url) = &changes.file_url {
        validate_file_url(url)?;
    }
    if let Some(name) = &changes.signer_name {
        if name.trim().is_empty() {
            return Err(ValidationError::EmptySignerName);
        }
    }
    if let Some(email) = &changes.signer_email {
        validate_email(email)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signer_requires_name_and_plausible_email() {
        assert!(validate_signer(&SignerIdentity::new("Ada", "ada@example.com", "CEO")).is_ok());
        assert_eq!(
            validate_signer(&SignerIdentity::new("  ", "ada@example.com", "CEO")),
            Err(ValidationError::EmptySignerName)
        );
        assert!(matches!(
            validate_signer(&SignerIdentity::new("Ada", "ada.example.com", "CEO")),
            Err(ValidationError::InvalidSignerEmail(_))
        ));
    }

    #[test]
    fn position_must_be_positive() {
        assert!(validate_position(None, None).is_ok());
        assert!(validate_position(Some(1), Some(3)).is_ok());
        assert_eq!(
            validate_position(Some(0), None),
            Err(ValidationError::NonPositive {
                field: "signing_stage"
            })
        );
        assert_eq!(
            validate_position(Some(2), Some(-1)),
            Err(ValidationError::NonPositive {
                field: "signing_order"
            })
        );
    }

    #[test]
    fn changes_must_not_be_empty() {
        assert_eq!(
            validate_changes(&DocumentChanges::default()),
            Err(ValidationError::NoChanges)
        );
        let changes = DocumentChanges {
            file_url: Some("".to_string()),
            ..Default::default()
        };
        assert_eq!(validate_changes(&changes), Err(ValidationError::EmptyFileUrl));
    }
}
