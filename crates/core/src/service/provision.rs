use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use super::SigningService;
use crate::document::validate::{
    validate_file_url, validate_position, validate_signer, ValidationError,
};
use crate::document::{
    DependencyLink, Document, DocumentId, DocumentKind, DocumentStatus, SignatureStatus, Signer,
    SignerIdentity,
};
use crate::error::SigningError;
use crate::store::DocumentStore;

/// Provisioning input for one document of a packet.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDocument {
    #[serde(default)]
    pub id: Option<DocumentId>,
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(flatten)]
    pub signer: SignerIdentity,
    #[serde(default)]
    pub signing_stage: Option<i64>,
    #[serde(default)]
    pub signing_order: Option<i64>,
    #[serde(default)]
    pub depends_on_document_id: Option<DocumentId>,
    pub file_url: String,
    /// Start as `draft` instead of `pending_signature`.
    #[serde(default)]
    pub draft: bool,
}

impl<S: DocumentStore> SigningService<S> {
    /// Insert a packet of related documents in one snapshot.
    ///
    /// Every dependency must point at a document in the packet or one that
    /// already exists; self-references and cycles are rejected here so the
    /// resolver never has to deal with them.
    pub async fn provision_packet(
        &self,
        packet: Vec<NewDocument>,
    ) -> Result<Vec<Document>, SigningError> {
        let documents = self.prepare_packet(packet)?;

        let mut snapshot = self.store.begin().await?;
        let packet_ids: HashSet<DocumentId> = documents.iter().map(|d| d.id).collect();
        for document in &documents {
            let Some(target) = document.dependency.target() else {
                continue;
            };
            if packet_ids.contains(&target) {
                continue;
            }
            if self.store.get_latest_in(&mut snapshot, target).await?.is_none() {
                self.store.abort(snapshot).await?;
                return Err(ValidationError::UnknownDependency {
                    dependent: document.id.to_string(),
                    missing: target.to_string(),
                }
                .into());
            }
        }
        for document in &documents {
            self.store.insert_document(&mut snapshot, document).await?;
        }
        self.store.commit(snapshot).await?;

        tracing::info!(documents = documents.len(), "provisioned signing packet");
        Ok(documents)
    }

    fn prepare_packet(&self, packet: Vec<NewDocument>) -> Result<Vec<Document>, SigningError> {
        if packet.is_empty() {
            return Err(ValidationError::EmptyPacket.into());
        }
        let now = self.clock.now();
        let mut seen = HashSet::new();
        let mut documents = Vec::with_capacity(packet.len());

        for new in packet {
            validate_signer(&new.signer)?;
            validate_file_url(&new.file_url)?;
            validate_position(new.signing_stage, new.signing_order)?;

            let id = new.id.unwrap_or_default();
            if !seen.insert(id) {
                return Err(ValidationError::DuplicateId(id.to_string()).into());
            }
            if new.depends_on_document_id == Some(id) {
                return Err(ValidationError::SelfDependency(id.to_string()).into());
            }

            documents.push(Document {
                id,
                kind: new.kind,
                title: new.title,
                signer: Signer::pending(SignerIdentity {
                    name: new.signer.name.trim().to_string(),
                    email: new.signer.email.trim().to_string(),
                    role: new.signer.role,
                }),
                status: if new.draft {
                    DocumentStatus::Draft
                } else {
                    DocumentStatus::PendingSignature
                },
                signature_status: SignatureStatus::Pending,
                signing_stage: new.signing_stage.and_then(|s| u32::try_from(s).ok()),
                signing_order: new.signing_order.and_then(|o| u32::try_from(o).ok()),
                dependency: DependencyLink::from(new.depends_on_document_id),
                file_url: new.file_url,
                signed_file_url: None,
                signature_token: None,
                version: 1,
                is_latest_version: true,
                created_at: now,
                updated_at: now,
            });
        }

        reject_cycles(&documents)?;
        Ok(documents)
    }
}

/// Each document has at most one outgoing edge, so a cycle exists iff some
/// walk along `depends_on` inside the packet revisits a document.
fn reject_cycles(documents: &[Document]) -> Result<(), ValidationError> {
    let edges: HashMap<DocumentId, DocumentId> = documents
        .iter()
        .filter_map(|d| d.dependency.target().map(|t| (d.id, t)))
        .collect();

    for start in documents {
        let mut visited = HashSet::from([start.id]);
        let mut current = start.id;
        while let Some(&next) = edges.get(&current) {
            if !visited.insert(next) {
                return Err(ValidationError::DependencyCycle(next.to_string()));
            }
            current = next;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemoryArtifactStorage;
    use crate::error::ErrorKind;
    use crate::notify::LogNotifier;
    use crate::service::SigningSettings;
    use crate::store::MemoryDocumentStore;
    use std::sync::Arc;

    fn service() -> SigningService<MemoryDocumentStore> {
        SigningService::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryArtifactStorage::new()),
            Arc::new(LogNotifier),
            SigningSettings::default(),
        )
    }

    fn new_doc(id: DocumentId, depends_on: Option<DocumentId>) -> NewDocument {
        NewDocument {
            id: Some(id),
            kind: DocumentKind::AppointmentLetter,
            title: None,
            signer: SignerIdentity::new("Ada", "ada@example.com", "CFO"),
            signing_stage: Some(1),
            signing_order: None,
            depends_on_document_id: depends_on,
            file_url: "mem://a.pdf".to_string(),
            draft: false,
        }
    }

    #[tokio::test]
    async fn provisions_chain_in_one_snapshot() {
        let svc = service();
        let a = DocumentId::new();
        let b = DocumentId::new();
        let docs = svc
            .provision_packet(vec![new_doc(b, Some(a)), new_doc(a, None)])
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
        let stored = svc.store().get_latest(b).await.unwrap();
        assert_eq!(stored.dependency, DependencyLink::After(a));
        assert_eq!(stored.version, 1);
        assert!(stored.is_latest_version);
        assert_eq!(stored.status, DocumentStatus::PendingSignature);
    }

    #[tokio::test]
    async fn rejects_cycles_and_self_references() {
        let svc = service();
        let a = DocumentId::new();
        let b = DocumentId::new();
        let err = svc
            .provision_packet(vec![new_doc(a, Some(b)), new_doc(b, Some(a))])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SigningError::Validation(ValidationError::DependencyCycle(_))
        ));

        let err = svc
            .provision_packet(vec![new_doc(a, Some(a))])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SigningError::Validation(ValidationError::SelfDependency(_))
        ));
        assert!(svc.store().get_latest(a).await.is_err());
    }

    #[tokio::test]
    async fn rejects_unknown_dependency_without_writing() {
        let svc = service();
        let a = DocumentId::new();
        let ok = DocumentId::new();
        let err = svc
            .provision_packet(vec![new_doc(ok, None), new_doc(a, Some(DocumentId::new()))])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert!(svc.store().get_latest(ok).await.is_err());
    }

    #[tokio::test]
    async fn dependency_may_point_at_existing_document() {
        let svc = service();
        let a = DocumentId::new();
        svc.provision_packet(vec![new_doc(a, None)]).await.unwrap();
        let b = DocumentId::new();
        svc.provision_packet(vec![new_doc(b, Some(a))]).await.unwrap();
        assert_eq!(
            svc.store().get_latest(b).await.unwrap().dependency,
            DependencyLink::After(a)
        );
    }

    #[tokio::test]
    async fn rejects_bad_fields() {
        let svc = service();
        let mut bad = new_doc(DocumentId::new(), None);
        bad.signing_stage = Some(0);
        assert_eq!(
            svc.provision_packet(vec![bad]).await.unwrap_err().kind(),
            ErrorKind::ValidationFailed
        );
        assert_eq!(
            svc.provision_packet(Vec::new()).await.unwrap_err().kind(),
            ErrorKind::ValidationFailed
        );
        let id = DocumentId::new();
        assert!(matches!(
            svc.provision_packet(vec![new_doc(id, None), new_doc(id, None)])
                .await
                .unwrap_err(),
            SigningError::Validation(ValidationError::DuplicateId(_))
        ));
    }
}
