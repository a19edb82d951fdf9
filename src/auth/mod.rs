//! Auth gate: bearer tokens in, a freshly loaded [`Identity`] out.

pub mod jwt;
pub mod password;
pub mod users;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::db::Db;
use crate::{AppError, AppResult};

pub use jwt::{extract_bearer, TokenIssuer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            _ => None,
        }
    }
}

/// The caller on whose behalf every service call runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Identity {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub role: Role,
}

/// Resolve the caller from an `Authorization` header value.
///
/// The token only names the user. Storage decides whether that user still
/// exists and is active, so a disabled account is locked out immediately.
pub async fn authenticate(
    db: &Db,
    issuer: &TokenIssuer,
    authorization: Option<&str>,
) -> AppResult<Identity> {
    let token = extract_bearer(authorization)
        .ok_or_else(|| AppError::unauthorized("Access token required"))?;
    let claims = issuer.verify(token)?;
    let user = users::find_by_id(db, claims.sub)
        .await?
        .ok_or_else(|| AppError::unauthorized("User not found"))?;
    if !user.is_active {
        return Err(users::account_disabled());
    }
    user.identity()
}

pub fn require_role(identity: &Identity, role: Role) -> AppResult<()> {
    if identity.role == role {
        Ok(())
    } else {
        Err(AppError::forbidden(format!("{} access required", role.as_str()))
            .with_context("role", identity.role.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_gate() {
        let mut who = Identity {
            id: 1,
            username: "u".into(),
            email: "u@example.com".into(),
            full_name: None,
            role: Role::User,
        };
        let err = require_role(&who, Role::Admin).unwrap_err();
        assert_eq!(err.code(), AppError::FORBIDDEN);
        who.role = Role::Admin;
        assert!(require_role(&who, Role::Admin).is_ok());
    }

    #[test]
    fn roles_round_trip_through_text() {
        for role in [Role::Admin, Role::User] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("root"), None);
    }
}
