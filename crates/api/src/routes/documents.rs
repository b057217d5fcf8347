use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use exec_signing_core::document::{Document, DocumentChanges, DocumentId};
use exec_signing_core::resolver::DocumentView;
use exec_signing_core::service::{IssuedLink, NewDocument, SignerPacket};
use exec_signing_core::signature::{DeclineRequest, SignatureAuth};
use exec_signing_core::store::DocumentStore;
use serde::Deserialize;

use crate::auth::{AdminUser, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes<S: DocumentStore>() -> Router<AppState<S>> {
    Router::new()
        .route("/v1/documents", post(provision::<S>).get(list::<S>))
        .route("/v1/documents/by-token", get(by_token::<S>))
        .route(
            "/v1/documents/{id}/versions",
            get(versions::<S>).post(create_version::<S>),
        )
        .route("/v1/documents/{id}/versions/{version}", get(version::<S>))
        .route("/v1/documents/{id}/token", post(issue_token::<S>))
        .route("/v1/documents/{id}/decline", post(decline::<S>))
}

fn parse_id(raw: &str) -> ApiResult<DocumentId> {
    DocumentId::parse(raw).map_err(|_| ApiError::BadRequest(format!("invalid document id: {raw}")))
}

#[derive(Debug, Deserialize)]
struct ProvisionRequest {
    documents: Vec<NewDocument>,
}

async fn provision<S: DocumentStore>(
    State(state): State<AppState<S>>,
    AdminUser(admin): AdminUser,
    Json(body): Json<ProvisionRequest>,
) -> ApiResult<(StatusCode, Json<Vec<Document>>)> {
    tracing::info!(
        user_id = %admin.user.user_id,
        documents = body.documents.len(),
        "provision request"
    );
    let documents = state.signing().provision_packet(body.documents).await?;
    Ok((StatusCode::CREATED, Json(documents)))
}

/// The caller's own latest documents, resolved and sorted.
async fn list<S: DocumentStore>(
    State(state): State<AppState<S>>,
    user: AuthUser,
) -> ApiResult<Json<SignerPacket>> {
    Ok(Json(state.signing().list_for_signer(user.email()).await?))
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: String,
}

async fn by_token<S: DocumentStore>(
    State(state): State<AppState<S>>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<Json<DocumentView>> {
    Ok(Json(state.signing().view_for_token(&query.token).await?))
}

async fn versions<S: DocumentStore>(
    State(state): State<AppState<S>>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Document>>> {
    let id = parse_id(&id)?;
    Ok(Json(state.signing().version_history(id).await?))
}

async fn version<S: DocumentStore>(
    State(state): State<AppState<S>>,
    _admin: AdminUser,
    Path((id, version)): Path<(String, i32)>,
) -> ApiResult<Json<Document>> {
    let id = parse_id(&id)?;
    Ok(Json(state.signing().get_version(id, version).await?))
}

async fn create_version<S: DocumentStore>(
    State(state): State<AppState<S>>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(changes): Json<DocumentChanges>,
) -> ApiResult<(StatusCode, Json<Document>)> {
    let id = parse_id(&id)?;
    let document = state.signing().create_version(id, changes).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

async fn issue_token<S: DocumentStore>(
    State(state): State<AppState<S>>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> ApiResult<Json<IssuedLink>> {
    let id = parse_id(&id)?;
    Ok(Json(state.signing().issue_and_notify(id).await?))
}

#[derive(Debug, Deserialize)]
struct DeclineBody {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    signature_token: Option<String>,
}

async fn decline<S: DocumentStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<DeclineBody>,
) -> ApiResult<Json<Document>> {
    let id = parse_id(&id)?;
    let auth = caller_auth(&state, &headers, body.signature_token)?;
    let document = state
        .signing()
        .decline(DeclineRequest {
            document_id: id,
            reason: body.reason,
            auth,
        })
        .await?;
    Ok(Json(document))
}

/// A portal token in the body wins over a bearer header; one of the two is
/// required.
pub(crate) fn caller_auth<S: DocumentStore>(
    state: &AppState<S>,
    headers: &HeaderMap,
    signature_token: Option<String>,
) -> ApiResult<SignatureAuth> {
    if let Some(token) = signature_token.filter(|t| !t.trim().is_empty()) {
        return Ok(SignatureAuth::Token(token));
    }
    AuthUser::from_headers(headers, &state.config().jwt_secret)?
        .map(|caller| SignatureAuth::User(caller.user))
        .ok_or(ApiError::Unauthorized)
}
