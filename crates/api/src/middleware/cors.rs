use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};

/// CORS for the signer portal. Only the configured portal origin may call
/// the API from a browser; an unparsable origin falls back to permissive.
pub fn cors_layer(portal_base_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    match HeaderValue::from_str(portal_base_url.trim_end_matches('/')) {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            tracing::warn!(portal_base_url, "portal origin is not a valid header value; allowing any origin");
            layer.allow_origin(Any)
        }
    }
}
