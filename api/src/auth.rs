use crate::errors::ApiError;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use gateway::AccessToken;

/// Upstream token presented by the caller as `Authorization: Bearer <token>`.
pub struct BearerToken(pub AccessToken);

impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let (scheme, token) = header.split_once(' ').ok_or(ApiError::Unauthorized)?;
        let token = AccessToken::new(token.trim());
        if !scheme.eq_ignore_ascii_case("bearer") || !token.is_well_formed() {
            return Err(ApiError::Unauthorized);
        }
        Ok(BearerToken(token))
    }
}
