//! Signing eligibility over a signer's latest documents.
//!
//! Eligibility is derived on every read and never stored. Exactly one
//! dependency hop is evaluated: a document is signable when it is pending and
//! the document it depends on is signed. A dependency that cannot be found
//! blocks indefinitely.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::document::{DependencyLink, Document, DocumentId, DocumentKind, SignatureStatus};

/// Enough of a document to tell a signer what to complete first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: DocumentId,
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    pub name: String,
    pub signature_status: SignatureStatus,
}

impl From<&Document> for DocumentRef {
    fn from(document: &Document) -> Self {
        Self {
            id: document.id,
            kind: document.kind.clone(),
            name: document.display_name(),
            signature_status: document.signature_status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Eligibility {
    Signable,
    Blocked { blocking: DocumentRef },
    UnresolvableDependency { missing: DocumentId },
    /// Already signed, declined or expired.
    Closed { signature_status: SignatureStatus },
}

impl Eligibility {
    pub fn can_sign(&self) -> bool {
        matches!(self, Self::Signable)
    }
}

/// A document annotated with its current eligibility.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    #[serde(flatten)]
    pub document: Document,
    pub can_sign: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocking_documents: Vec<DocumentRef>,
    pub unresolvable_dependency: bool,
    pub eligibility: Eligibility,
}

impl DocumentView {
    fn new(document: Document, eligibility: Eligibility) -> Self {
        let blocking_documents = match &eligibility {
            Eligibility::Blocked { blocking } => vec![blocking.clone()],
            _ => Vec::new(),
        };
        Self {
            can_sign: eligibility.can_sign(),
            unresolvable_dependency: matches!(
                eligibility,
                Eligibility::UnresolvableDependency { .. }
            ),
            blocking_documents,
            document,
            eligibility,
        }
    }
}

/// Eligibility of `document` given the latest row of the document it depends
/// on, if that row could be found.
pub fn eligibility(document: &Document, dependency: Option<&Document>) -> Eligibility {
    if !document.is_pending() {
        return Eligibility::Closed {
            signature_status: document.signature_status,
        };
    }
    match document.dependency {
        DependencyLink::Independent => Eligibility::Signable,
        DependencyLink::After(target) => match dependency {
            Some(dep) if dep.id == target && dep.is_latest_version => {
                if dep.signature_status == SignatureStatus::Signed {
                    Eligibility::Signable
                } else {
                    Eligibility::Blocked {
                        blocking: DocumentRef::from(dep),
                    }
                }
            }
            _ => Eligibility::UnresolvableDependency { missing: target },
        },
    }
}

/// Resolve a signer's full document set. Non-latest rows are dropped.
pub fn resolve(documents: Vec<Document>) -> Vec<DocumentView> {
    resolve_against(documents, &[])
}

/// Like [`resolve`], but dependencies may also be looked up in `context`
/// (documents owned by other signers). Context documents are not returned.
pub fn resolve_against(documents: Vec<Document>, context: &[Document]) -> Vec<DocumentView> {
    let documents: Vec<Document> = documents
        .into_iter()
        .filter(|d| d.is_latest_version)
        .collect();

    let by_id: HashMap<DocumentId, &Document> = context
        .iter()
        .chain(documents.iter())
        .filter(|d| d.is_latest_version)
        .map(|d| (d.id, d))
        .collect();

    let eligibilities: Vec<Eligibility> = documents
        .iter()
        .map(|doc| {
            let dependency = doc
                .dependency
                .target()
                .and_then(|target| by_id.get(&target).copied());
            eligibility(doc, dependency)
        })
        .collect();

    let mut views: Vec<DocumentView> = documents
        .into_iter()
        .zip(eligibilities)
        .map(|(doc, eligibility)| DocumentView::new(doc, eligibility))
        .collect();
    views.sort_by(|a, b| signing_order(&a.document, &b.document));
    views
}

/// Display order: stage ascending (unstaged last), order ascending
/// (unordered last), newest first.
pub fn signing_order(a: &Document, b: &Document) -> Ordering {
    fn nulls_last(a: Option<u32>, b: Option<u32>) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
    nulls_last(a.signing_stage, b.signing_stage)
        .then_with(|| nulls_last(a.signing_order, b.signing_order))
        .then_with(|| b.created_at.cmp(&a.created_at))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    /// `None` groups documents without a stage.
    pub stage: Option<u32>,
    pub total: usize,
    pub signed: usize,
    pub complete: bool,
    pub unlocked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PacketProgress {
    pub stages: Vec<StageSummary>,
    pub total: usize,
    pub signed: usize,
    pub completion_percent: u8,
}

/// Per-stage progress of a resolved packet.
///
/// The lowest stage is always unlocked; a later stage unlocks once every
/// document in all earlier stages is signed. Unstaged documents are always
/// unlocked. Progress is informational; the dependency link alone gates
/// signing.
pub fn summarize_stages(views: &[DocumentView]) -> PacketProgress {
    let mut staged: BTreeMap<u32, (usize, usize)> = BTreeMap::new();
    let mut unstaged = (0usize, 0usize);

    for view in views {
        let signed = usize::from(view.document.signature_status == SignatureStatus::Signed);
        let slot = match view.document.signing_stage {
            Some(stage) => staged.entry(stage).or_default(),
            None => &mut unstaged,
        };
        slot.0 += 1;
        slot.1 += signed;
    }

    let mut stages = Vec::with_capacity(staged.len() + 1);
    let mut earlier_complete = true;
    for (stage, (total, signed)) in staged {
        let complete = signed == total;
        stages.push(StageSummary {
            stage: Some(stage),
            total,
            signed,
            complete,
            unlocked: earlier_complete,
        });
        earlier_complete &= complete;
    }
    if unstaged.0 > 0 {
        stages.push(StageSummary {
            stage: None,
            total: unstaged.0,
            signed: unstaged.1,
            complete: unstaged.0 == unstaged.1,
            unlocked: true,
        });
    }

    let total = views.len();
    let signed = stages.iter().map(|s| s.signed).sum();
    let completion_percent = if total == 0 {
        0
    } else {
        ((signed as f64 / total as f64) * 100.0).round() as u8
    };

    PacketProgress {
        stages,
        total,
        signed,
        completion_percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentStatus, Signer, SignerIdentity};
    use chrono::{Duration, Utc};

    fn doc(stage: Option<u32>, order: Option<u32>, depends_on: Option<DocumentId>) -> Document {
        let now = Utc::now();
        Document {
            id: DocumentId::new(),
            kind: DocumentKind::BoardResolution,
            title: None,
            signer: Signer::pending(SignerIdentity::new("Ada", "ada@example.com", "CFO")),
            status: DocumentStatus::PendingSignature,
            signature_status: SignatureStatus::Pending,
            signing_stage: stage,
            signing_order: order,
            dependency: DependencyLink::from(depends_on),
            file_url: "mem://doc.pdf".to_string(),
            signed_file_url: None,
            signature_token: None,
            version: 1,
            is_latest_version: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn view_of(views: &[DocumentView], id: DocumentId) -> &DocumentView {
        views.iter().find(|v| v.document.id == id).unwrap()
    }

    #[test]
    fn dependency_gates_until_signed() {
        let a = doc(Some(1), None, None);
        let mut b = doc(Some(2), None, Some(a.id));
        b.kind = DocumentKind::EmploymentAgreement;

        let views = resolve(vec![a.clone(), b.clone()]);
        assert!(view_of(&views, a.id).can_sign);
        let blocked = view_of(&views, b.id);
        assert!(!blocked.can_sign);
        assert_eq!(blocked.blocking_documents.len(), 1);
        assert_eq!(blocked.blocking_documents[0].id, a.id);
        assert_eq!(blocked.blocking_documents[0].name, "Board Resolution");

        let mut signed_a = a.clone();
        signed_a.signature_status = SignatureStatus::Signed;
        let views = resolve(vec![signed_a, b.clone()]);
        assert!(view_of(&views, b.id).can_sign);
        assert!(view_of(&views, b.id).blocking_documents.is_empty());
    }

    #[test]
    fn dangling_dependency_never_signable() {
        let b = doc(Some(2), None, Some(DocumentId::new()));
        let views = resolve(vec![b.clone()]);
        let view = view_of(&views, b.id);
        assert!(!view.can_sign);
        assert!(view.unresolvable_dependency);
        assert!(matches!(
            view.eligibility,
            Eligibility::UnresolvableDependency { .. }
        ));
    }

    #[test]
    fn declined_or_expired_dependency_keeps_blocking() {
        let mut a = doc(Some(1), None, None);
        let b = doc(Some(2), None, Some(a.id));
        for status in [SignatureStatus::Declined, SignatureStatus::Expired] {
            a.signature_status = status;
            let views = resolve(vec![a.clone(), b.clone()]);
            assert!(!view_of(&views, b.id).can_sign);
        }
    }

    #[test]
    fn only_one_hop_is_evaluated() {
        let mut a = doc(Some(1), None, None);
        a.signature_status = SignatureStatus::Pending;
        let mut b = doc(Some(2), None, Some(a.id));
        b.signature_status = SignatureStatus::Signed;
        let c = doc(Some(3), None, Some(b.id));

        let views = resolve(vec![a, b, c.clone()]);
        assert!(view_of(&views, c.id).can_sign);
    }

    #[test]
    fn context_documents_resolve_but_are_not_listed() {
        let mut other = doc(Some(1), None, None);
        other.signer.identity.email = "board@example.com".to_string();
        other.signature_status = SignatureStatus::Signed;
        let mine = doc(Some(2), None, Some(other.id));

        let views = resolve_against(vec![mine.clone()], &[other]);
        assert_eq!(views.len(), 1);
        assert!(views[0].can_sign);
    }

    #[test]
    fn terminal_documents_are_closed() {
        let mut a = doc(Some(1), None, None);
        a.signature_status = SignatureStatus::Signed;
        let views = resolve(vec![a]);
        assert!(!views[0].can_sign);
        assert_eq!(
            views[0].eligibility,
            Eligibility::Closed {
                signature_status: SignatureStatus::Signed
            }
        );
    }

    #[test]
    fn historical_rows_are_ignored() {
        let mut old = doc(Some(1), None, None);
        old.is_latest_version = false;
        assert!(resolve(vec![old]).is_empty());
    }

    #[test]
    fn sorts_by_stage_then_order_then_newest() {
        let base = Utc::now();
        let mut unstaged = doc(None, None, None);
        unstaged.created_at = base;
        let mut s2 = doc(Some(2), Some(1), None);
        s2.created_at = base;
        let mut s1_o2 = doc(Some(1), Some(2), None);
        s1_o2.created_at = base;
        let mut s1_o1_old = doc(Some(1), Some(1), None);
        s1_o1_old.created_at = base - Duration::days(1);
        let mut s1_o1_new = doc(Some(1), Some(1), None);
        s1_o1_new.created_at = base;

        let views = resolve(vec![
            unstaged.clone(),
            s2.clone(),
            s1_o2.clone(),
            s1_o1_old.clone(),
            s1_o1_new.clone(),
        ]);
        let order: Vec<DocumentId> = views.iter().map(|v| v.document.id).collect();
        assert_eq!(
            order,
            vec![s1_o1_new.id, s1_o1_old.id, s1_o2.id, s2.id, unstaged.id]
        );
    }

    #[test]
    fn stage_summary_unlocks_in_sequence() {
        let mut a = doc(Some(1), None, None);
        let b = doc(Some(2), None, Some(a.id));
        let loose = doc(None, None, None);

        let progress = summarize_stages(&resolve(vec![a.clone(), b.clone(), loose.clone()]));
        assert_eq!(progress.total, 3);
        assert_eq!(progress.signed, 0);
        assert!(progress.stages[0].unlocked);
        assert!(!progress.stages[1].unlocked);
        assert_eq!(progress.stages[2].stage, None);
        assert!(progress.stages[2].unlocked);

        a.signature_status = SignatureStatus::Signed;
        let progress = summarize_stages(&resolve(vec![a, b, loose]));
        assert!(progress.stages[0].complete);
        assert!(progress.stages[1].unlocked);
        assert_eq!(progress.completion_percent, 33);
    }
}
