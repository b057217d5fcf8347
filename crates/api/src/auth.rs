//! Bearer JWTs issued by the upstream identity provider.
//!
//! Only verification happens here: HS256, `exp` required, `sub` and `email`
//! claims, plus an optional `role`. Sessions and login live elsewhere.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};
use exec_signing_core::signature::AuthenticatedUser;
use exec_signing_core::store::DocumentStore;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// Role that may provision, revise and audit documents and issue links.
pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: AuthenticatedUser,
    pub role: Option<String>,
}

impl AuthUser {
    pub fn email(&self) -> &str {
        &self.user.email
    }

    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some(ADMIN_ROLE)
    }

    /// `Ok(None)` when no bearer header is present; an invalid token is
    /// always an error.
    pub fn from_headers(headers: &HeaderMap, secret: &str) -> Result<Option<Self>, ApiError> {
        let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() else {
            return Ok(None);
        };
        verify(bearer.token(), secret).map(Some)
    }
}

pub fn verify(token: &str, secret: &str) -> Result<AuthUser, ApiError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|err| {
        tracing::debug!(error = %err, "rejected bearer token");
        ApiError::Unauthorized
    })?;

    Ok(AuthUser {
        user: AuthenticatedUser {
            user_id: data.claims.sub,
            email: data.claims.email,
        },
        role: data.claims.role,
    })
}

impl<S: DocumentStore> FromRequestParts<AppState<S>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers, &state.config().jwt_secret)?.ok_or(ApiError::Unauthorized)
    }
}

/// An authenticated caller holding the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

impl<S: DocumentStore> FromRequestParts<AppState<S>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_headers(&parts.headers, &state.config().jwt_secret)?
            .ok_or(ApiError::Unauthorized)?;
        if !user.is_admin() {
            tracing::warn!(user_id = %user.user.user_id, "admin route refused");
            return Err(ApiError::Forbidden);
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(role: Option<&str>) -> String {
        let claims = Claims {
            sub: "user-1".to_string(),
            email: "ada@example.com".to_string(),
            exp: 4_102_444_800,
            role: role.map(str::to_string),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"s3cret")).unwrap()
    }

    #[test]
    fn role_claim_is_optional() {
        let signer = verify(&token(None), "s3cret").unwrap();
        assert_eq!(signer.email(), "ada@example.com");
        assert!(!signer.is_admin());

        assert!(verify(&token(Some(ADMIN_ROLE)), "s3cret").unwrap().is_admin());
        assert!(!verify(&token(Some("signer")), "s3cret").unwrap().is_admin());
    }

    #[test]
    fn wrong_secret_is_unauthorized() {
        assert!(matches!(
            verify(&token(None), "other"),
            Err(ApiError::Unauthorized)
        ));
    }
}
