//! HS256 bearer tokens.
//!
//! Claims carry the user id, display name and role. They are only a hint:
//! the gate re-reads the user on every request.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Identity, Role};
use crate::AppError;

pub const DEFAULT_EXPIRY_SECONDS: u64 = 24 * 60 * 60;
pub const MIN_SECRET_CHARS: usize = 32;
const DEV_SECRET: &str = "dev-mode-secret-not-for-production-use-123456";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: i64,
    pub username: String,
    pub role: Role,
    pub iat: u64,
    pub exp: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("JWT secret is required outside dev mode")]
    MissingSecret,
    #[error("JWT secret must be at least {MIN_SECRET_CHARS} characters")]
    SecretTooShort,
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
    #[error("failed to sign token: {0}")]
    Sign(String),
    #[error("system clock error: {0}")]
    Clock(String),
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired | TokenError::Invalid => {
                AppError::unauthorized("Invalid or expired token").with_context("reason", err.to_string())
            }
            TokenError::MissingSecret | TokenError::SecretTooShort => {
                AppError::new("CONFIG/JWT_SECRET", err.to_string())
            }
            TokenError::Sign(_) | TokenError::Clock(_) => {
                AppError::new("AUTH/TOKEN_SIGN", err.to_string())
            }
        }
    }
}

#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
    expiry_seconds: u64,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("expiry_seconds", &self.expiry_seconds)
            .finish_non_exhaustive()
    }
}

fn unix_now() -> Result<u64, TokenError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| TokenError::Clock(e.to_string()))
}

impl TokenIssuer {
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::MissingSecret);
        }
        if secret.chars().count() < MIN_SECRET_CHARS {
            return Err(TokenError::SecretTooShort);
        }
        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    /// Fixed, publicly known secret. Only for local development.
    pub fn new_dev(expiry_seconds: u64) -> Self {
        Self {
            secret: DEV_SECRET.to_string(),
            expiry_seconds,
        }
    }

    pub fn expiry_seconds(&self) -> u64 {
        self.expiry_seconds
    }

    pub fn issue(&self, identity: &Identity) -> Result<String, TokenError> {
        let now = unix_now()?;
        let claims = Claims {
            sub: identity.id,
            username: identity.username.clone(),
            role: identity.role,
            iat: now,
            exp: now + self.expiry_seconds,
        };
        self.sign(&claims)
    }

    pub(crate) fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| TokenError::Sign(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|err| match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid,
        })
    }
}

/// Token from an `Authorization: Bearer <token>` header value.
pub fn extract_bearer(header: Option<&str>) -> Option<&str> {
    let value = header?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
