use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::image::SignatureImage;
use crate::document::validate::ValidationError;
use crate::document::{Document, DocumentId, SignatureStatus};
use crate::error::SigningError;
use crate::events::SigningEvent;
use crate::resolver::{eligibility, Eligibility};
use crate::service::SigningService;
use crate::store::{DocumentStore, SignatureWrite, StatusChange, StoreError};

/// A caller with an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: String,
}

/// How the caller proves they may act on a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureAuth {
    User(AuthenticatedUser),
    Token(String),
}

#[derive(Debug, Clone)]
pub struct SignatureSubmission {
    pub document_id: DocumentId,
    pub typed_name: String,
    /// Base64 PNG, with or without a `data:image/png;base64,` prefix.
    pub signature_image: String,
    pub signer_ip: Option<String>,
    pub signer_user_agent: Option<String>,
    pub auth: SignatureAuth,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub ok: bool,
    pub document_id: DocumentId,
    pub signed_at: DateTime<Utc>,
    pub signed_file_url: String,
}

#[derive(Debug, Clone)]
pub struct DeclineRequest {
    pub document_id: DocumentId,
    pub reason: Option<String>,
    pub auth: SignatureAuth,
}

/// The signed artifact: a certificate binding the captured signature to the
/// exact bytes of the original file.
#[derive(Debug, Serialize)]
struct SigningCertificate<'a> {
    document_id: DocumentId,
    version: i32,
    #[serde(rename = "type")]
    kind: &'a str,
    title: String,
    signer_name: &'a str,
    signer_email: &'a str,
    signer_role: &'a str,
    typed_name: &'a str,
    signed_at: DateTime<Utc>,
    signer_ip: Option<&'a str>,
    signer_user_agent: Option<&'a str>,
    original_file_url: &'a str,
    original_sha256: String,
    signature_png: String,
    signature_sha256: String,
}

impl<S: DocumentStore> SigningService<S> {
    /// Validate and commit a signature in one snapshot.
    ///
    /// Nothing is written unless every check passes. A second submission for
    /// the same document fails with `AlreadySigned`, which callers should
    /// treat as success; a replayed token fails with its token error instead.
    pub async fn submit(
        &self,
        submission: SignatureSubmission,
    ) -> Result<SubmitReceipt, SigningError> {
        let document_id = submission.document_id;
        let mut snapshot = self.store.begin().await?;

        let (document, write) = match self.capture(&mut snapshot, &submission).await {
            Ok(captured) => captured,
            Err(err) => {
                if let Err(abort_err) = self.store.abort(snapshot).await {
                    tracing::warn!(error = %abort_err, "failed to abort signing snapshot");
                }
                tracing::info!(
                    document_id = %document_id,
                    kind = %err.kind(),
                    "signature rejected"
                );
                return Err(err);
            }
        };

        if let Err(err) = self.store.commit(snapshot).await {
            tracing::error!(
                document_id = %document_id,
                signed_file_url = %write.signed_file_url,
                error = %err,
                "signature commit failed; signed artifact is orphaned"
            );
            return Err(err.into());
        }

        tracing::info!(
            document_id = %document_id,
            signer_email = %document.signer.identity.email,
            "document signed"
        );
        self.publish(SigningEvent::DocumentSigned {
            document_id,
            signer_email: document.signer.identity.email.clone(),
            at: write.signed_at,
        });

        Ok(SubmitReceipt {
            ok: true,
            document_id,
            signed_at: write.signed_at,
            signed_file_url: write.signed_file_url,
        })
    }

    async fn capture(
        &self,
        snapshot: &mut S::Snapshot,
        submission: &SignatureSubmission,
    ) -> Result<(Document, SignatureWrite), SigningError> {
        let document_id = submission.document_id;
        let document = self.store.get_latest_for_update(snapshot, document_id).await?;
        if !document.is_pending() {
            // A consumed token reports itself before the closed document does.
            if let SignatureAuth::Token(token) = &submission.auth {
                self.tokens.validate_for(snapshot, token, document_id).await?;
            }
            return Err(SigningError::AlreadySigned {
                document_id,
                status: document.signature_status,
            });
        }

        self.check_dependency(snapshot, &document).await?;
        self.check_identity(snapshot, &document, &submission.auth).await?;

        let typed_name = submission.typed_name.trim();
        if typed_name.is_empty() {
            return Err(ValidationError::EmptyTypedName.into());
        }
        let image = SignatureImage::from_base64(&submission.signature_image)?;

        let signed_at = self.clock.now();
        let signed_file_url = self
            .upload_certificate(&document, typed_name, &image, signed_at, submission)
            .await?;

        let write = SignatureWrite {
            typed_name: typed_name.to_string(),
            signature_image: image.into_png(),
            signed_at,
            signer_ip: submission.signer_ip.clone(),
            signer_user_agent: submission.signer_user_agent.clone(),
            signed_file_url,
        };
        self.store
            .apply_signature(snapshot, document_id, document.version, &write)
            .await
            .map_err(|err| lost_race(err, document_id))?;
        if matches!(submission.auth, SignatureAuth::Token(_)) {
            self.tokens.consume(snapshot, document_id).await?;
        }
        Ok((document, write))
    }

    /// Decline a pending document. The token, if any, is cleared with it.
    pub async fn decline(&self, request: DeclineRequest) -> Result<Document, SigningError> {
        let document_id = request.document_id;
        let mut snapshot = self.store.begin().await?;

        let declined = match self.decline_in(&mut snapshot, &request).await {
            Ok(declined) => declined,
            Err(err) => {
                if let Err(abort_err) = self.store.abort(snapshot).await {
                    tracing::warn!(error = %abort_err, "failed to abort decline snapshot");
                }
                return Err(err);
            }
        };
        self.store.commit(snapshot).await?;

        tracing::info!(document_id = %document_id, "document declined");
        self.publish(SigningEvent::DocumentDeclined {
            document_id,
            signer_email: declined.signer.identity.email.clone(),
            at: declined.updated_at,
        });
        Ok(declined)
    }

    async fn decline_in(
        &self,
        snapshot: &mut S::Snapshot,
        request: &DeclineRequest,
    ) -> Result<Document, SigningError> {
        let document_id = request.document_id;
        let document = self.store.get_latest_for_update(snapshot, document_id).await?;
        if !document
            .signature_status
            .can_transition_to(SignatureStatus::Declined)
        {
            return Err(SigningError::InvalidTransition {
                document_id,
                from: document.signature_status,
                to: SignatureStatus::Declined,
            });
        }
        self.check_identity(snapshot, &document, &request.auth).await?;

        let change = StatusChange {
            to: SignatureStatus::Declined,
            at: self.clock.now(),
            reason: request
                .reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
        };
        self.store
            .change_signature_status(snapshot, document_id, document.version, &change)
            .await
            .map_err(|err| lost_race(err, document_id))?;

        self.store
            .get_latest_in(snapshot, document_id)
            .await?
            .ok_or(SigningError::DocumentNotFound(document_id))
    }

    async fn check_dependency(
        &self,
        snapshot: &mut S::Snapshot,
        document: &Document,
    ) -> Result<(), SigningError> {
        let dependency = match document.dependency.target() {
            Some(target) => self.store.get_latest_in(snapshot, target).await?,
            None => None,
        };
        match eligibility(document, dependency.as_ref()) {
            Eligibility::Signable => Ok(()),
            Eligibility::Blocked { blocking } => Err(SigningError::DependencyNotMet {
                document_id: document.id,
                blocking,
            }),
            Eligibility::UnresolvableDependency { missing } => {
                Err(SigningError::UnresolvableDependency {
                    document_id: document.id,
                    missing,
                })
            }
            Eligibility::Closed { signature_status } => Err(SigningError::AlreadySigned {
                document_id: document.id,
                status: signature_status,
            }),
        }
    }

    async fn check_identity(
        &self,
        snapshot: &mut S::Snapshot,
        document: &Document,
        auth: &SignatureAuth,
    ) -> Result<(), SigningError> {
        match auth {
            SignatureAuth::User(user) => {
                if document.signer.identity.matches_email(&user.email) {
                    Ok(())
                } else {
                    tracing::warn!(
                        document_id = %document.id,
                        user_id = %user.user_id,
                        "user is not the assigned signer"
                    );
                    Err(SigningError::NotAuthorized {
                        document_id: document.id,
                    })
                }
            }
            SignatureAuth::Token(token) => {
                self.tokens
                    .validate_for(snapshot, token, document.id)
                    .await?;
                Ok(())
            }
        }
    }

    async fn upload_certificate(
        &self,
        document: &Document,
        typed_name: &str,
        image: &SignatureImage,
        signed_at: DateTime<Utc>,
        submission: &SignatureSubmission,
    ) -> Result<String, SigningError> {
        let original = self.artifacts.download(&document.file_url).await?;
        let identity = &document.signer.identity;
        let certificate = SigningCertificate {
            document_id: document.id,
            version: document.version,
            kind: document.kind.as_str(),
            title: document.display_name(),
            signer_name: &identity.name,
            signer_email: &identity.email,
            signer_role: &identity.role,
            typed_name,
            signed_at,
            signer_ip: submission.signer_ip.as_deref(),
            signer_user_agent: submission.signer_user_agent.as_deref(),
            original_file_url: &document.file_url,
            original_sha256: sha256_hex(&original),
            signature_png: image.to_base64(),
            signature_sha256: sha256_hex(image.as_png()),
        };
        let bytes = serde_json::to_vec_pretty(&certificate)
            .map_err(|err| crate::artifact::ArtifactError::Io(err.to_string()))?;

        let key = format!(
            "signed/{}/v{}-{}.json",
            document.id,
            document.version,
            signed_at.timestamp()
        );
        Ok(self.artifacts.upload(&key, bytes, "application/json").await?)
    }
}

/// A guarded write that missed means another submission finished first.
fn lost_race(err: StoreError, document_id: DocumentId) -> SigningError {
    match err {
        StoreError::Conflict { .. } => {
            tracing::info!(document_id = %document_id, "lost signing race");
            SigningError::AlreadySigned {
                document_id,
                status: SignatureStatus::Signed,
            }
        }
        other => other.into(),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
