use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use exec_signing_core::{ErrorKind, SigningError};
use serde_json::json;

/// API error type. Workflow failures answer `{ok:false, error:<kind>}`;
/// everything else uses the `{error:{type,message,statusCode}}` envelope.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("internal error: {0}")]
    Internal(String),
}

/// HTTP status for a workflow failure.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotAuthorized => StatusCode::FORBIDDEN,
        ErrorKind::AlreadySigned
        | ErrorKind::DocumentFinalized
        | ErrorKind::InvalidTransition
        | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::DependencyNotMet
        | ErrorKind::UnresolvableDependency
        | ErrorKind::EmptySignature
        | ErrorKind::InvalidSignatureImage
        | ErrorKind::ValidationFailed => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::TokenNotFound | ErrorKind::TokenInvalid => StatusCode::UNAUTHORIZED,
        ErrorKind::TokenExpired => StatusCode::GONE,
        ErrorKind::DocumentNotFound => StatusCode::NOT_FOUND,
        ErrorKind::StorageFailure => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::NotificationFailure => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            ApiError::Signing(err) => return signing_response(err),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "badRequest", msg.clone()),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Authentication required".to_string(),
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "forbidden",
                "Admin role required".to_string(),
            ),
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internalError",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": {
                "type": error_type,
                "message": message,
                "statusCode": status.as_u16(),
            }
        });

        (status, Json(body)).into_response()
    }
}

fn signing_response(err: &SigningError) -> Response {
    let kind = err.kind();
    let status = status_for(kind);
    if status.is_server_error() {
        tracing::error!(kind = %kind, error = %err, "signing request failed");
    }

    let mut body = json!({
        "ok": false,
        "error": kind.as_str(),
        "message": err.to_string(),
    });
    if let SigningError::DependencyNotMet { blocking, .. } = err {
        body["blocking_document"] = json!(blocking);
    }
    (status, Json(body)).into_response()
}

/// Convenience type alias for route handlers.
pub type ApiResult<T> = Result<T, ApiError>;
