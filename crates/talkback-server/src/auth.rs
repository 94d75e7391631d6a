//! Session token verification.
//!
//! Tokens are HS256 JWTs issued by the login service. This server only
//! verifies them; [`issue_token`] exists for tooling and tests.

use crate::AppState;
use axum::{body::Body, http::Request, http::StatusCode, middleware::Next, response::Response};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use talkback_types::UserId;
use thiserror::Error;

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,
    pub username: String,
    #[serde(default)]
    pub is_admin: bool,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
}

/// The authenticated caller, inserted into request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: UserId,
    pub username: String,
    pub is_admin: bool,
}

impl From<Claims> for SessionUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            username: claims.username,
            is_admin: claims.is_admin,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing session token")]
    Missing,

    #[error("invalid session token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

/// Verifies `token` against `secret` and returns the caller it names.
pub fn verify_token(token: &str, secret: &str) -> Result<SessionUser, AuthError> {
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    Ok(data.claims.into())
}

/// Signs a token for `user` that expires after `ttl`.
pub fn issue_token(secret: &str, user: &SessionUser, ttl: Duration) -> Result<String, AuthError> {
    let exp = chrono::Utc::now().timestamp().max(0) as u64 + ttl.as_secs();
    let claims = Claims {
        user_id: user.user_id,
        username: user.username.clone(),
        is_admin: user.is_admin,
        exp,
    };
    Ok(jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

fn bearer_token(req: &Request<Body>) -> Result<&str, AuthError> {
    let value = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(AuthError::Missing)?;
    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::Missing)
}

/// Requires `Authorization: Bearer <token>` and inserts the [`SessionUser`].
pub async fn auth_middleware(mut req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    let user = bearer_token(&req)
        .and_then(|token| verify_token(token, &state.jwt_secret))
        .map_err(|e| {
            tracing::debug!(path = %req.uri().path(), "rejecting request: {}", e);
            StatusCode::UNAUTHORIZED
        })?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
