use anyhow::{anyhow, Context, Result};
use axum::{extract::FromRequestParts, http::header, http::request::Parts};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use uuid::Uuid;

use crate::{api::errors::AppError, AppState};

type HmacSha256 = Hmac<Sha256>;

/// Bearer tokens stay valid for a week, matching the mobile client's
/// re-login cadence.
const TOKEN_TTL_DAYS: i64 = 7;

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    /// Unix timestamp (seconds) when this token expires.
    pub exp: i64,
}

/// Signs and verifies API bearer tokens: a base64url JSON payload followed
/// by an uppercase-hex HMAC-SHA256 tag, `"{payload}.{tag}"`.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Arc<Vec<u8>>,
}

impl TokenSigner {
    pub fn new(secret: &str) -> Self {
        Self { secret: Arc::new(secret.as_bytes().to_vec()) }
    }

    pub fn issue(&self, user_id: Uuid, username: &str) -> String {
        let claims = Claims {
            sub: user_id,
            username: username.to_owned(),
            exp: (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).timestamp(),
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &Claims) -> String {
        let payload = URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(claims).expect("claims always serialize"));
        format!("{payload}.{}", self.tag(&payload))
    }

    fn tag(&self, payload: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes()).to_uppercase()
    }

    /// Verify signature and expiry, returning the embedded claims.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let (payload, tag) = token.split_once('.').ok_or_else(|| anyhow!("malformed token"))?;

        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        let tag_bytes = hex::decode(tag.to_lowercase()).context("malformed token tag")?;
        mac.verify_slice(&tag_bytes)
            .map_err(|_| anyhow!("token signature mismatch"))?;

        let claims: Claims = serde_json::from_slice(
            &URL_SAFE_NO_PAD.decode(payload).context("malformed token payload")?,
        )
        .context("malformed token claims")?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(anyhow!("token expired"));
        }
        Ok(claims)
    }
}

// ---------------------------------------------------------------------------
// Passwords
// ---------------------------------------------------------------------------

pub fn hash_password(plain: &str) -> Result<String> {
    bcrypt::hash(plain, bcrypt::DEFAULT_COST).context("failed to hash password")
}

pub fn verify_password(plain: &str, hash: &str) -> bool {
    bcrypt::verify(plain, hash).unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// The authenticated user behind a `Bearer` token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::Unauthorized("token required".to_owned()))?;

        let claims = state
            .tokens
            .verify(token)
            .map_err(|_| AppError::Unauthorized("invalid or expired token".to_owned()))?;

        Ok(Self { id: claims.sub, username: claims.username })
    }
}

/// Guard for device-facing endpoints. When `DEVICE_API_KEY` is configured,
/// the firmware must present it in `x-device-key` (or `x-api-key`).
#[derive(Debug, Clone, Copy)]
pub struct DeviceGate;

impl FromRequestParts<AppState> for DeviceGate {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = &state.device_api_key else {
            return Ok(Self);
        };

        let provided = parts
            .headers
            .get("x-device-key")
            .or_else(|| parts.headers.get("x-api-key"))
            .and_then(|v| v.to_str().ok());

        if provided == Some(expected.as_str()) {
            Ok(Self)
        } else {
            Err(AppError::Unauthorized("device API key required".to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new("test-secret")
    }

    #[test]
    fn issue_and_verify_roundtrip() {
        let id = Uuid::new_v4();
        let token = signer().issue(id, "alice");
        let claims = signer().verify(&token).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.username, "alice");
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let token = signer().issue(Uuid::new_v4(), "alice");
        let (payload, tag) = token.split_once('.').unwrap();

        let mut claims: Claims =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap();
        claims.username = "mallory".to_owned();
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());

        assert!(signer().verify(&format!("{forged_payload}.{tag}")).is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = signer().issue(Uuid::new_v4(), "alice");
        assert!(TokenSigner::new("other-secret").verify(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let s = signer();
        let claims = Claims {
            sub: Uuid::new_v4(),
            username: "alice".to_owned(),
            exp: (Utc::now() - Duration::hours(1)).timestamp(),
        };
        let token = s.sign(&claims);
        let err = s.verify(&token).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        assert!(signer().verify("").is_err());
        assert!(signer().verify("no-dot-here").is_err());
        assert!(signer().verify("payload.nothex!").is_err());
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not-a-bcrypt-hash"));
    }
}
