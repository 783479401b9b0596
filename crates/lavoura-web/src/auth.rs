//! Bearer-token auth: HMAC-SHA256 signed tokens with a 10 minute lifetime.
//!
//! `POST /token` issues a token for the configured credentials; write
//! endpoints require it via the [`Authenticated`] extractor.

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{ApiError, AppState};

/// Token lifetime in seconds.
pub const TOKEN_TTL_SECS: i64 = 600;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    pub token_secret: String,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        Self {
            username: std::env::var("AUTH_USERNAME").unwrap_or_else(|_| "username".to_string()),
            password: std::env::var("AUTH_PASSWORD").unwrap_or_else(|_| "password".to_string()),
            token_secret: std::env::var("SECRET_KEY")
                .unwrap_or_else(|_| "change-me-in-production".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

fn sign(payload: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(payload.as_bytes());
    B64.encode(mac.finalize().into_bytes())
}

/// Issue a `payload.signature` token for `user`, expiring at
/// `now + TOKEN_TTL_SECS`.
pub fn issue_token(user: &str, now: i64, secret: &str) -> String {
    let claims = Claims {
        sub: user.to_string(),
        exp: now + TOKEN_TTL_SECS,
    };
    let payload = B64.encode(serde_json::to_vec(&claims).expect("claims serialize"));
    let signature = sign(&payload, secret);
    format!("{payload}.{signature}")
}

/// Verify signature and expiry; returns the claims on success.
pub fn verify_token(token: &str, now: i64, secret: &str) -> Result<Claims, ApiError> {
    let (payload, signature) = token.split_once('.').ok_or(ApiError::Unauthorized)?;
    if sign(payload, secret) != signature {
        return Err(ApiError::Unauthorized);
    }
    let bytes = B64.decode(payload).map_err(|_| ApiError::Unauthorized)?;
    let claims: Claims = serde_json::from_slice(&bytes).map_err(|_| ApiError::Unauthorized)?;
    if claims.exp <= now {
        return Err(ApiError::Unauthorized);
    }
    Ok(claims)
}

/// Zero-size marker: present in a handler means the request carried a valid
/// bearer token.
pub struct Authenticated;

impl<S, P> FromRequestParts<AppState<S, P>> for Authenticated
where
    S: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S, P>,
    ) -> Result<Self, Self::Rejection> {
        let header_val = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;
        let token = header_val
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized)?;
        verify_token(token, chrono::Utc::now().timestamp(), &state.auth.token_secret)?;
        Ok(Authenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn issued_token_verifies_and_carries_subject() {
        let token = issue_token("username", 1_000_000, SECRET);
        let claims = verify_token(&token, 1_000_000, SECRET).unwrap();
        assert_eq!(claims.sub, "username");
        assert_eq!(claims.exp, 1_000_000 + TOKEN_TTL_SECS);
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue_token("username", 1_000_000, SECRET);
        let err = verify_token(&token, 1_000_000 + TOKEN_TTL_SECS, SECRET);
        assert!(matches!(err, Err(ApiError::Unauthorized)));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let token = issue_token("username", 1_000_000, SECRET);
        let (_, signature) = token.split_once('.').unwrap();
        let forged_payload = B64.encode(
            serde_json::to_vec(&Claims {
                sub: "intruder".into(),
                exp: i64::MAX,
            })
            .unwrap(),
        );
        let forged = format!("{forged_payload}.{signature}");
        assert!(matches!(
            verify_token(&forged, 1_000_000, SECRET),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = issue_token("username", 1_000_000, "other-secret");
        assert!(matches!(
            verify_token(&token, 1_000_000, SECRET),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(matches!(
            verify_token("not-a-token", 0, SECRET),
            Err(ApiError::Unauthorized)
        ));
    }
}
