use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{DocumentStore, SignatureWrite, StatusChange, StoreError};
use crate::document::{
    DependencyLink, Document, DocumentId, DocumentKind, DocumentStatus, SignatureStatus, Signer,
    SignerIdentity, SignerStatus, TokenGrant,
};

macro_rules! document_columns {
    () => {
        "document_id, version, is_latest_version, doc_type, title, \
         signer_name, signer_email, signer_role, signer_status, typed_name, signature_image, \
         signed_at, signer_ip, signer_user_agent, declined_at, decline_reason, \
         status, signature_status, signing_stage, signing_order, depends_on_document_id, \
         file_url, signed_file_url, signature_token, signature_token_expires_at, \
         created_at, updated_at"
    };
}

const SELECT_LATEST: &str = concat!(
    "SELECT ",
    document_columns!(),
    " FROM executive_documents WHERE document_id = $1 AND is_latest_version"
);

const SELECT_LATEST_FOR_UPDATE: &str = concat!(
    "SELECT ",
    document_columns!(),
    " FROM executive_documents WHERE document_id = $1 AND is_latest_version FOR UPDATE"
);

/// Locking selects read twice on a miss. Under READ COMMITTED a waiter
/// blocked behind `insert_version` re-checks `is_latest_version` on the
/// flipped row and drops it; the successor row is only visible to a fresh
/// statement.
const LOCK_ATTEMPTS: usize = 2;

const SELECT_BY_TOKEN: &str = concat!(
    "SELECT ",
    document_columns!(),
    " FROM executive_documents WHERE signature_token = $1 AND is_latest_version"
);

const SELECT_BY_TOKEN_FOR_UPDATE: &str = concat!(
    "SELECT ",
    document_columns!(),
    " FROM executive_documents WHERE signature_token = $1 AND is_latest_version FOR UPDATE"
);

const SELECT_FOR_SIGNER: &str = concat!(
    "SELECT ",
    document_columns!(),
    " FROM executive_documents WHERE lower(signer_email) = lower($1) AND is_latest_version"
);

const SELECT_VERSIONS: &str = concat!(
    "SELECT ",
    document_columns!(),
    " FROM executive_documents WHERE document_id = $1 ORDER BY version ASC"
);

const SELECT_VERSION: &str = concat!(
    "SELECT ",
    document_columns!(),
    " FROM executive_documents WHERE document_id = $1 AND version = $2"
);

const INSERT_ROW: &str = concat!(
    "INSERT INTO executive_documents (",
    document_columns!(),
    ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
     $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27)"
);

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Postgres-backed store. Row locks come from `SELECT ... FOR UPDATE`; the
/// partial unique index on `(document_id) WHERE is_latest_version` enforces
/// the single-latest invariant.
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_row(
        snapshot: &mut Transaction<'static, Postgres>,
        document: &Document,
    ) -> Result<(), StoreError> {
        let signer = &document.signer;
        sqlx::query(INSERT_ROW)
            .bind(document.id.as_uuid())
            .bind(document.version)
            .bind(document.is_latest_version)
            .bind(document.kind.as_str())
            .bind(&document.title)
            .bind(&signer.identity.name)
            .bind(&signer.identity.email)
            .bind(&signer.identity.role)
            .bind(signer.status.as_str())
            .bind(&signer.typed_name)
            .bind(&signer.signature_image)
            .bind(signer.signed_at)
            .bind(&signer.signer_ip)
            .bind(&signer.signer_user_agent)
            .bind(signer.declined_at)
            .bind(&signer.decline_reason)
            .bind(document.status.as_str())
            .bind(document.signature_status.as_str())
            .bind(to_column(document.signing_stage))
            .bind(to_column(document.signing_order))
            .bind(document.dependency.target().map(|id| id.as_uuid()))
            .bind(&document.file_url)
            .bind(&document.signed_file_url)
            .bind(document.signature_token.as_ref().map(|g| g.token.clone()))
            .bind(document.signature_token.as_ref().map(|g| g.expires_at))
            .bind(document.created_at)
            .bind(document.updated_at)
            .execute(&mut **snapshot)
            .await
            .map_err(|err| match &err {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StoreError::AlreadyExists {
                        document_id: document.id,
                    }
                }
                _ => StoreError::from(err),
            })?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    type Snapshot = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Snapshot, StoreError> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, snapshot: Self::Snapshot) -> Result<(), StoreError> {
        Ok(snapshot.commit().await?)
    }

    async fn abort(&self, snapshot: Self::Snapshot) -> Result<(), StoreError> {
        Ok(snapshot.rollback().await?)
    }

    async fn insert_document(
        &self,
        snapshot: &mut Self::Snapshot,
        document: &Document,
    ) -> Result<(), StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM executive_documents WHERE document_id = $1)",
        )
        .bind(document.id.as_uuid())
        .fetch_one(&mut **snapshot)
        .await?;
        if exists {
            return Err(StoreError::AlreadyExists {
                document_id: document.id,
            });
        }
        Self::insert_row(snapshot, document).await
    }

    async fn get_latest_in(
        &self,
        snapshot: &mut Self::Snapshot,
        document_id: DocumentId,
    ) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query_as::<_, DocumentRow>(SELECT_LATEST)
            .bind(document_id.as_uuid())
            .fetch_optional(&mut **snapshot)
            .await?;
        row.map(Document::try_from).transpose()
    }

    async fn get_latest_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        document_id: DocumentId,
    ) -> Result<Document, StoreError> {
        let mut row = None;
        for _ in 0..LOCK_ATTEMPTS {
            row = sqlx::query_as::<_, DocumentRow>(SELECT_LATEST_FOR_UPDATE)
                .bind(document_id.as_uuid())
                .fetch_optional(&mut **snapshot)
                .await?;
            if row.is_some() {
                break;
            }
        }
        Document::try_from(row.ok_or(StoreError::NotFound { document_id })?)
    }

    async fn find_by_token_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        token: &str,
    ) -> Result<Option<Document>, StoreError> {
        let mut row = None;
        for _ in 0..LOCK_ATTEMPTS {
            row = sqlx::query_as::<_, DocumentRow>(SELECT_BY_TOKEN_FOR_UPDATE)
                .bind(token)
                .fetch_optional(&mut **snapshot)
                .await?;
            if row.is_some() {
                break;
            }
        }
        row.map(Document::try_from).transpose()
    }

    async fn apply_signature(
        &self,
        snapshot: &mut Self::Snapshot,
        document_id: DocumentId,
        expected_version: i32,
        write: &SignatureWrite,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE executive_documents SET \
               signature_status = 'signed', status = 'signed', signer_status = 'signed', \
               typed_name = $3, signature_image = $4, signed_at = $5, signer_ip = $6, \
               signer_user_agent = $7, signed_file_url = $8, \
               signature_token = NULL, signature_token_expires_at = NULL, updated_at = $5 \
             WHERE document_id = $1 AND version = $2 AND is_latest_version \
               AND signature_status = 'pending'",
        )
        .bind(document_id.as_uuid())
        .bind(expected_version)
        .bind(&write.typed_name)
        .bind(&write.signature_image)
        .bind(write.signed_at)
        .bind(&write.signer_ip)
        .bind(&write.signer_user_agent)
        .bind(&write.signed_file_url)
        .execute(&mut **snapshot)
        .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Conflict {
                document_id,
                expected_version,
            });
        }
        Ok(())
    }

    async fn change_signature_status(
        &self,
        snapshot: &mut Self::Snapshot,
        document_id: DocumentId,
        expected_version: i32,
        change: &StatusChange,
    ) -> Result<(), StoreError> {
        let status = change.to.document_status().ok_or(StoreError::Conflict {
            document_id,
            expected_version,
        })?;
        let declined = change.to == SignatureStatus::Declined;
        let result = sqlx::query(
            "UPDATE executive_documents SET \
               signature_status = $3, status = $4, \
               signer_status = CASE WHEN $5 THEN 'declined' ELSE signer_status END, \
               declined_at = CASE WHEN $5 THEN $6 ELSE declined_at END, \
               decline_reason = CASE WHEN $5 THEN $7 ELSE decline_reason END, \
               signature_token = NULL, signature_token_expires_at = NULL, updated_at = $6 \
             WHERE document_id = $1 AND version = $2 AND is_latest_version \
               AND signature_status = 'pending'",
        )
        .bind(document_id.as_uuid())
        .bind(expected_version)
        .bind(change.to.as_str())
        .bind(status.as_str())
        .bind(declined)
        .bind(change.at)
        .bind(&change.reason)
        .execute(&mut **snapshot)
        .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Conflict {
                document_id,
                expected_version,
            });
        }
        Ok(())
    }

    async fn set_token(
        &self,
        snapshot: &mut Self::Snapshot,
        document_id: DocumentId,
        grant: Option<&TokenGrant>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE executive_documents SET \
               signature_token = $2, signature_token_expires_at = $3, \
               status = CASE WHEN status = 'draft' AND $2 IS NOT NULL \
                             THEN 'pending_signature' ELSE status END \
             WHERE document_id = $1 AND is_latest_version",
        )
        .bind(document_id.as_uuid())
        .bind(grant.map(|g| g.token.clone()))
        .bind(grant.map(|g| g.expires_at))
        .execute(&mut **snapshot)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { document_id });
        }
        Ok(())
    }

    async fn insert_version(
        &self,
        snapshot: &mut Self::Snapshot,
        document: &Document,
    ) -> Result<(), StoreError> {
        let expected_version = document.version - 1;
        let flipped = sqlx::query(
            "UPDATE executive_documents SET is_latest_version = FALSE \
             WHERE document_id = $1 AND version = $2 AND is_latest_version",
        )
        .bind(document.id.as_uuid())
        .bind(expected_version)
        .execute(&mut **snapshot)
        .await?;

        if flipped.rows_affected() != 1 {
            return Err(StoreError::Conflict {
                document_id: document.id,
                expected_version,
            });
        }

        let mut next = document.clone();
        next.is_latest_version = true;
        Self::insert_row(snapshot, &next).await
    }

    async fn get_latest(&self, document_id: DocumentId) -> Result<Document, StoreError> {
        let row = sqlx::query_as::<_, DocumentRow>(SELECT_LATEST)
            .bind(document_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound { document_id })?;
        Document::try_from(row)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query_as::<_, DocumentRow>(SELECT_BY_TOKEN)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Document::try_from).transpose()
    }

    async fn list_latest_for_signer(&self, email: &str) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query_as::<_, DocumentRow>(SELECT_FOR_SIGNER)
            .bind(email.trim())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Document::try_from).collect()
    }

    async fn list_versions(&self, document_id: DocumentId) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query_as::<_, DocumentRow>(SELECT_VERSIONS)
            .bind(document_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound { document_id });
        }
        rows.into_iter().map(Document::try_from).collect()
    }

    async fn get_version(
        &self,
        document_id: DocumentId,
        version: i32,
    ) -> Result<Document, StoreError> {
        let row = sqlx::query_as::<_, DocumentRow>(SELECT_VERSION)
            .bind(document_id.as_uuid())
            .bind(version)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::VersionNotFound {
                document_id,
                version,
            })?;
        Document::try_from(row)
    }

    async fn list_expirable(&self, now: DateTime<Utc>) -> Result<Vec<DocumentId>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT document_id FROM executive_documents \
             WHERE is_latest_version AND signature_status = 'pending' \
               AND signature_token_expires_at IS NOT NULL AND signature_token_expires_at <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(DocumentId::from_uuid).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Database row representation of one document version.
#[derive(Debug, Clone, sqlx::FromRow)]
struct DocumentRow {
    document_id: Uuid,
    version: i32,
    is_latest_version: bool,
    doc_type: String,
    title: Option<String>,
    signer_name: String,
    signer_email: String,
    signer_role: String,
    signer_status: String,
    typed_name: Option<String>,
    signature_image: Option<Vec<u8>>,
    signed_at: Option<DateTime<Utc>>,
    signer_ip: Option<String>,
    signer_user_agent: Option<String>,
    declined_at: Option<DateTime<Utc>>,
    decline_reason: Option<String>,
    status: String,
    signature_status: String,
    signing_stage: Option<i32>,
    signing_order: Option<i32>,
    depends_on_document_id: Option<Uuid>,
    file_url: String,
    signed_file_url: Option<String>,
    signature_token: Option<String>,
    signature_token_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DocumentRow> for Document {
    type Error = StoreError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        let document_id = DocumentId::from_uuid(row.document_id);
        let corrupt = |reason: String| StoreError::Corrupt {
            document_id,
            reason,
        };

        let status = DocumentStatus::parse(&row.status)
            .ok_or_else(|| corrupt(format!("unknown status {:?}", row.status)))?;
        let signature_status = SignatureStatus::parse(&row.signature_status).ok_or_else(|| {
            corrupt(format!(
                "unknown signature_status {:?}",
                row.signature_status
            ))
        })?;
        let signer_status = SignerStatus::parse(&row.signer_status)
            .ok_or_else(|| corrupt(format!("unknown signer_status {:?}", row.signer_status)))?;
        let signing_stage = from_column(row.signing_stage)
            .map_err(|_| corrupt("signing_stage is negative".to_string()))?;
        let signing_order = from_column(row.signing_order)
            .map_err(|_| corrupt("signing_order is negative".to_string()))?;
        let signature_token = match (row.signature_token, row.signature_token_expires_at) {
            (Some(token), Some(expires_at)) => Some(TokenGrant { token, expires_at }),
            (None, _) => None,
            (Some(_), None) => return Err(corrupt("token without expiry".to_string())),
        };

        Ok(Document {
            id: document_id,
            kind: DocumentKind::parse(&row.doc_type),
            title: row.title,
            signer: Signer {
                identity: SignerIdentity {
                    name: row.signer_name,
                    email: row.signer_email,
                    role: row.signer_role,
                },
                status: signer_status,
                typed_name: row.typed_name,
                signature_image: row.signature_image,
                signed_at: row.signed_at,
                signer_ip: row.signer_ip,
                signer_user_agent: row.signer_user_agent,
                declined_at: row.declined_at,
                decline_reason: row.decline_reason,
            },
            status,
            signature_status,
            signing_stage,
            signing_order,
            dependency: DependencyLink::from(row.depends_on_document_id.map(DocumentId::from_uuid)),
            file_url: row.file_url,
            signed_file_url: row.signed_file_url,
            signature_token,
            version: row.version,
            is_latest_version: row.is_latest_version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn to_column(value: Option<u32>) -> Option<i32> {
    value.map(|v| i32::try_from(v).unwrap_or(i32::MAX))
}

fn from_column(value: Option<i32>) -> Result<Option<u32>, std::num::TryFromIntError> {
    value.map(u32::try_from).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_list_matches_insert_placeholders() {
        let columns = document_columns!().split(',').count();
        let placeholders = INSERT_ROW.matches('$').count();
        assert_eq!(columns, placeholders);
    }

    #[test]
    fn position_columns_round_trip() {
        assert_eq!(to_column(Some(3)), Some(3));
        assert_eq!(from_column(Some(3)).unwrap(), Some(3));
        assert!(from_column(Some(-1)).is_err());
        assert_eq!(from_column(None).unwrap(), None);
    }
}
