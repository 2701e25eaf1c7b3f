use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    Json,
};
use server_api::Identity;
use shared::error::ApiError;

use crate::{app_state::AppState, error_response};

/// The verified bearer-token identity of an HTTP caller.
pub(crate) struct AuthIdentity(pub(crate) Identity);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthIdentity {
    type Rejection = (StatusCode, Json<ApiError>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(|| error_response(ApiError::unauthorized("missing bearer token")))?;
        let identity = state.api.tokens.verify(token).map_err(error_response)?;
        Ok(Self(identity))
    }
}

fn bearer_token(raw: &str) -> Option<&str> {
    let (scheme, token) = raw.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
