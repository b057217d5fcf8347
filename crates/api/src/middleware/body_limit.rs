use tower_http::limit::RequestBodyLimitLayer;

/// Must exceed the base64 size of the largest accepted signature PNG.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

pub fn body_limit_layer() -> RequestBodyLimitLayer {
    RequestBodyLimitLayer::new(MAX_BODY_BYTES)
}
