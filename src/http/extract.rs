use axum::async_trait;
use axum::body::Bytes;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::de::DeserializeOwned;

use crate::auth::{authenticate, Identity};
use crate::state::AppState;
use crate::{AppError, AppResult};

/// The authenticated caller. Rejects with 401/403 before the handler runs.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        authenticate(&state.db, &state.issuer, header)
            .await
            .map(AuthUser)
    }
}

/// Decode an optional JSON body. An empty body yields the default.
pub fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> AppResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|err| AppError::new(super::error::INVALID_REQUEST, format!("Invalid JSON body: {err}")))
}

/// Record ids arrive as path text; anything but a positive integer is a bad request.
pub fn parse_id(field: &str, raw: &str) -> AppResult<i64> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::invalid_field(field, "expected a positive integer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Body {
        minutes: Option<i64>,
    }

    #[test]
    fn empty_body_is_default() {
        let body: Body = optional_json(&Bytes::from_static(b"  ")).unwrap();
        assert_eq!(body, Body::default());
        let body: Body = optional_json(&Bytes::from_static(br#"{"minutes": 15}"#)).unwrap();
        assert_eq!(body.minutes, Some(15));
        assert!(optional_json::<Body>(&Bytes::from_static(b"{oops")).is_err());
    }

    #[test]
    fn ids_must_be_positive_integers() {
        assert_eq!(parse_id("id", "42").unwrap(), 42);
        assert!(parse_id("id", "0").is_err());
        assert!(parse_id("id", "abc").is_err());
    }
}
