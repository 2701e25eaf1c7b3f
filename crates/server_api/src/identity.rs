use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{Role, TenantId, UserId},
    error::ApiError,
    protocol::TokenResponse,
};
use tracing::debug;

use crate::{internal, ApiContext};

/// An authenticated caller. `permissions` is the snapshot taken when the token was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub role: Role,
    pub permissions: Vec<String>,
}

impl Identity {
    pub fn has_permission(&self, name: &str) -> bool {
        self.permissions.iter().any(|p| p == name)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    tenant_id: i64,
    role: Role,
    permissions: Vec<String>,
    iat: i64,
    exp: i64,
}

/// Upper bound on token lifetime. Longer requests are clamped to it.
pub const MAX_TOKEN_TTL_SECONDS: i64 = 30 * 24 * 3600;

#[derive(Clone)]
pub struct TokenService {
    secret: String,
    ttl_seconds: i64,
}

impl TokenService {
    pub fn new(secret: impl Into<String>, ttl_seconds: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl_seconds: ttl_seconds.clamp(1, MAX_TOKEN_TTL_SECONDS),
        }
    }

    pub fn issue(&self, identity: &Identity) -> Result<TokenResponse, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let ttl = Duration::try_seconds(self.ttl_seconds).unwrap_or_else(Duration::zero);
        let expires_at = now + ttl;
        let claims = Claims {
            sub: identity.user_id.0,
            tenant_id: identity.tenant_id.0,
            role: identity.role,
            permissions: identity.permissions.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;
        Ok(TokenResponse { token, expires_at })
    }

    /// Any decoding failure, including expiry, is reported as Unauthorized.
    pub fn verify(&self, token: &str) -> Result<Identity, ApiError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| {
            debug!(error = %e, "token rejected");
            ApiError::unauthorized("invalid or expired token")
        })?;
        Ok(Identity {
            user_id: UserId(data.claims.sub),
            tenant_id: TenantId(data.claims.tenant_id),
            role: data.claims.role,
            permissions: data.claims.permissions,
        })
    }
}

/// Builds a fresh identity for a stored user, re-reading role, permissions and the active flag.
pub async fn identity_for_user(
    ctx: &ApiContext,
    tenant_id: TenantId,
    user_id: UserId,
) -> Result<Identity, ApiError> {
    let user = ctx
        .storage
        .get_user(tenant_id, user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::unauthorized("unknown user"))?;
    if !user.is_active {
        return Err(ApiError::unauthorized("user is inactive"));
    }
    let permissions = ctx
        .storage
        .permissions_for_user(user_id)
        .await
        .map_err(internal)?;
    Ok(Identity {
        user_id,
        tenant_id,
        role: user.role,
        permissions,
    })
}

/// The explicit refresh: a new token carrying the current permission snapshot.
pub async fn refresh_token(ctx: &ApiContext, identity: &Identity) -> Result<TokenResponse, ApiError> {
    let fresh = identity_for_user(ctx, identity.tenant_id, identity.user_id).await?;
    ctx.tokens
        .issue(&fresh)
        .map_err(|e| internal(anyhow::Error::new(e)))
}

#[cfg(test)]
#[path = "tests/identity_tests.rs"]
mod tests;
