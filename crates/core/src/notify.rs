//! Signer-facing notification collaborator. Delivery is best-effort: a
//! failure is logged and never rolls back the workflow step that caused it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::document::SignerIdentity;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send(
        &self,
        signer: &SignerIdentity,
        document_titles: &[String],
        portal_url: &str,
    ) -> Result<(), NotifyError>;
}

/// Sole entry point for token-bearing signers.
pub fn portal_url(base_url: &str, token: &str) -> String {
    format!("{}/executive/sign?token={token}", base_url.trim_end_matches('/'))
}

/// Writes the message to the log instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        signer: &SignerIdentity,
        document_titles: &[String],
        portal_url: &str,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            signer_email = %signer.email,
            documents = ?document_titles,
            portal_url,
            "signing notification"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub signer_email: String,
    pub document_titles: Vec<String>,
    pub portal_url: String,
}

/// Keeps every message; optionally fails every delivery.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentNotification>>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Arc::default(),
            fail: true,
        }
    }

    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        signer: &SignerIdentity,
        document_titles: &[String],
        portal_url: &str,
    ) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::Delivery("mail relay unavailable".to_string()));
        }
        self.sent.lock().await.push(SentNotification {
            signer_email: signer.email.clone(),
            document_titles: document_titles.to_vec(),
            portal_url: portal_url.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portal_url_carries_token() {
        assert_eq!(
            portal_url("https://portal.example.com/", "abc_123"),
            "https://portal.example.com/executive/sign?token=abc_123"
        );
    }

    #[tokio::test]
    async fn recording_notifier_keeps_messages() {
        let notifier = RecordingNotifier::new();
        let signer = SignerIdentity::new("Ada", "ada@example.com", "CFO");
        notifier
            .send(&signer, &["Offer Letter".to_string()], "https://p/x")
            .await
            .unwrap();
        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].signer_email, "ada@example.com");

        let failing = RecordingNotifier::failing();
        assert!(failing.send(&signer, &[], "https://p/x").await.is_err());
    }
}
