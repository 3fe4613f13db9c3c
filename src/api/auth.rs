//! Identity for notification sockets.
//!
//! - In dev mode the client names itself with `?user_id=`.
//! - Otherwise the client sends `jwt.<token>` in `Sec-WebSocket-Protocol`;
//!   the token's `sub` is the user id.
//!
//! Login and token issuance belong to the task manager; this module only
//! verifies.

use axum::http::{HeaderMap, StatusCode};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};

use crate::config::Config;
use crate::util::jwt_from_protocols;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Issued-at unix seconds
    pub iat: i64,
    /// Expiration unix seconds
    pub exp: i64,
}

/// Sign a token for `user_id`. The task manager issues these in production.
pub fn issue_jwt(secret: &str, user_id: &str, ttl_days: i64) -> anyhow::Result<String> {
    let now = Utc::now();
    let exp = now + Duration::days(ttl_days.max(1));
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };
    let token = jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

pub fn verify_jwt(token: &str, secret: &str) -> anyhow::Result<Claims> {
    let validation = Validation::default();
    let token_data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(token_data.claims)
}

/// Work out which user a socket belongs to.
pub fn resolve_socket_user(
    headers: &HeaderMap,
    query_user_id: Option<&str>,
    config: &Config,
) -> Result<String, (StatusCode, &'static str)> {
    if config.dev_mode {
        return match query_user_id.map(str::trim) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err((StatusCode::BAD_REQUEST, "Missing user_id")),
        };
    }

    let secret = config
        .jwt_secret
        .as_deref()
        .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "JWT_SECRET not configured"))?;

    let token = headers
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .and_then(jwt_from_protocols)
        .ok_or((StatusCode::UNAUTHORIZED, "Missing websocket JWT"))?;

    match verify_jwt(&token, secret) {
        Ok(claims) if !claims.sub.trim().is_empty() => Ok(claims.sub),
        _ => Err((StatusCode::UNAUTHORIZED, "Invalid or expired token")),
    }
}
