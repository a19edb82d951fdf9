use serde::Serialize;
use sqlx::FromRow;
use ts_rs::TS;

use super::password::{check_new_password, hash_password, verify_password};
use super::{Identity, Role, TokenIssuer};
use crate::db::Db;
use crate::time::now_ms;
use crate::{AppError, AppResult};

const USER_COLUMNS: &str = "id, username, email, password_hash, full_name, role, is_active";

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub role: String,
    pub is_active: bool,
}

impl UserRow {
    pub fn identity(&self) -> AppResult<Identity> {
        let role = Role::parse(&self.role).ok_or_else(|| {
            AppError::new("AUTH/INVALID_ROLE", "Stored user role is not recognised")
                .with_context("role", self.role.clone())
        })?;
        Ok(Identity {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            role,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LoginResponse {
    pub token: String,
    pub user: Identity,
}

pub fn account_disabled() -> AppError {
    AppError::new(AppError::ACCOUNT_DISABLED, "Account is disabled")
}

fn invalid_credentials() -> AppError {
    AppError::unauthorized("Invalid credentials")
}

async fn blocking<T, F>(work: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> AppResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| AppError::new("AUTH/HASH_TASK", err.to_string()))?
}

pub async fn find_by_id(db: &Db, id: i64) -> AppResult<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    db.timed(async {
        Ok(sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(db.pool())
            .await?)
    })
    .await
}

pub async fn find_by_username(db: &Db, username: &str) -> AppResult<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?");
    db.timed(async {
        Ok(sqlx::query_as::<_, UserRow>(&sql)
            .bind(username)
            .fetch_optional(db.pool())
            .await?)
    })
    .await
}

pub async fn create_user(db: &Db, new_user: &NewUser) -> AppResult<Identity> {
    let username = new_user.username.trim();
    let email = new_user.email.trim();
    if username.is_empty() {
        return Err(AppError::missing_field("username"));
    }
    if email.is_empty() {
        return Err(AppError::missing_field("email"));
    }
    if new_user.password.is_empty() {
        return Err(AppError::missing_field("password"));
    }
    check_new_password(&new_user.password).map_err(|err| err.with_context("field", "password"))?;

    let password = new_user.password.clone();
    let password_hash = blocking(move || Ok(hash_password(&password)?)).await?;
    let now = now_ms();
    let sql = format!(
        "INSERT INTO users (username, email, password_hash, full_name, role, is_active, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, 1, ?, ?) RETURNING {USER_COLUMNS}"
    );
    let row = db
        .timed(async {
            Ok(sqlx::query_as::<_, UserRow>(&sql)
                .bind(username)
                .bind(email)
                .bind(&password_hash)
                .bind(new_user.full_name.as_deref())
                .bind(new_user.role.as_str())
                .bind(now)
                .bind(now)
                .fetch_one(db.pool())
                .await?)
        })
        .await
        .map_err(|err| {
            if err.code() == AppError::CONFLICT {
                AppError::conflict("Username or email already exists")
                    .with_context("username", username.to_string())
            } else {
                err
            }
        })?;
    tracing::info!(
        target: "kinboard",
        event = "user_created",
        user_id = row.id,
        role = new_user.role.as_str()
    );
    row.identity()
}

pub async fn set_active(db: &Db, username: &str, active: bool) -> AppResult<()> {
    let changed = db
        .timed(async {
            Ok(sqlx::query("UPDATE users SET is_active = ?, updated_at = ? WHERE username = ?")
                .bind(active)
                .bind(now_ms())
                .bind(username)
                .execute(db.pool())
                .await?
                .rows_affected())
        })
        .await?;
    if changed == 0 {
        return Err(AppError::not_found("User").with_context("username", username.to_string()));
    }
    tracing::info!(target: "kinboard", event = "user_active_changed", username, active);
    Ok(())
}

/// Check credentials and issue a token.
///
/// Unknown users and wrong passwords are indistinguishable to the caller.
pub async fn login(
    db: &Db,
    issuer: &TokenIssuer,
    username: &str,
    password: &str,
) -> AppResult<LoginResponse> {
    if username.trim().is_empty() || password.is_empty() {
        return Err(AppError::new(
            AppError::MISSING_FIELD,
            "Username and password required",
        ));
    }
    let user = find_by_username(db, username.trim())
        .await?
        .ok_or_else(invalid_credentials)?;
    if !user.is_active {
        return Err(account_disabled());
    }
    let candidate = password.to_string();
    let stored = user.password_hash.clone();
    let valid = blocking(move || Ok(verify_password(&candidate, &stored)?)).await?;
    if !valid {
        tracing::info!(target: "kinboard", event = "login_rejected", user_id = user.id);
        return Err(invalid_credentials());
    }
    let identity = user.identity()?;
    let token = issuer.issue(&identity)?;
    tracing::info!(target: "kinboard", event = "login", user_id = identity.id);
    Ok(LoginResponse {
        token,
        user: identity,
    })
}

pub async fn change_password(
    db: &Db,
    identity: &Identity,
    current_password: &str,
    new_password: &str,
) -> AppResult<()> {
    if current_password.is_empty() || new_password.is_empty() {
        return Err(AppError::new(
            AppError::MISSING_FIELD,
            "Current and new password required",
        ));
    }
    check_new_password(new_password)?;
    let user = find_by_id(db, identity.id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    let candidate = current_password.to_string();
    let stored = user.password_hash.clone();
    let valid = blocking(move || Ok(verify_password(&candidate, &stored)?)).await?;
    if !valid {
        return Err(AppError::unauthorized("Current password is incorrect"));
    }
    let fresh = new_password.to_string();
    let password_hash = blocking(move || Ok(hash_password(&fresh)?)).await?;
    db.timed(async {
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(&password_hash)
            .bind(now_ms())
            .bind(identity.id)
            .execute(db.pool())
            .await?;
        Ok(())
    })
    .await?;
    tracing::info!(target: "kinboard", event = "password_changed", user_id = identity.id);
    Ok(())
}
