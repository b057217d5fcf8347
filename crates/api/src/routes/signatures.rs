use axum::{
    extract::State,
    http::{header, HeaderMap},
    routing::post,
    Json, Router,
};
use exec_signing_core::document::DocumentId;
use exec_signing_core::signature::{SignatureSubmission, SubmitReceipt};
use exec_signing_core::store::DocumentStore;
use serde::Deserialize;

use super::documents::caller_auth;
use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes<S: DocumentStore>() -> Router<AppState<S>> {
    Router::new().route("/v1/signatures", post(submit::<S>))
}

#[derive(Debug, Deserialize)]
struct SubmitBody {
    document_id: DocumentId,
    typed_name: String,
    signature_image: String,
    #[serde(default)]
    signer_ip: Option<String>,
    #[serde(default)]
    signer_user_agent: Option<String>,
    #[serde(default)]
    signature_token: Option<String>,
}

async fn submit<S: DocumentStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(body): Json<SubmitBody>,
) -> ApiResult<Json<SubmitReceipt>> {
    let auth = caller_auth(&state, &headers, body.signature_token)?;
    let submission = SignatureSubmission {
        document_id: body.document_id,
        typed_name: body.typed_name,
        signature_image: body.signature_image,
        signer_ip: body.signer_ip.or_else(|| forwarded_for(&headers)),
        signer_user_agent: body.signer_user_agent.or_else(|| header_str(&headers, header::USER_AGENT)),
        auth,
    };
    Ok(Json(state.signing().submit(submission).await?))
}

/// First hop of `X-Forwarded-For`, as set by the fronting proxy.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    header_str(headers, header::HeaderName::from_static("x-forwarded-for"))
        .and_then(|value| value.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
