use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::extract::AuthUser;
use crate::auth::users::{self, NewUser};
use crate::auth::{require_role, Role};
use crate::state::AppState;
use crate::{AppError, AppResult};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChangePasswordBody {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegisterBody {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub role: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginBody>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(body) = body?;
    let response = users::login(&state.db, &state.issuer, &body.username, &body.password).await?;
    Ok(Json(json!({
        "success": true,
        "token": response.token,
        "user": response.user,
    })))
}

pub async fn me(AuthUser(user): AuthUser) -> impl IntoResponse {
    Json(json!({ "user": user }))
}

pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Result<Json<ChangePasswordBody>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(body) = body?;
    users::change_password(&state.db, &user, &body.current_password, &body.new_password).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Password changed successfully",
    })))
}

pub async fn register(
    State(state): State<AppState>,
    AuthUser(admin): AuthUser,
    body: Result<Json<RegisterBody>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    require_role(&admin, Role::Admin)?;
    let Json(body) = body?;
    if body.username.trim().is_empty() || body.email.trim().is_empty() || body.password.is_empty() {
        return Err(AppError::new(
            AppError::MISSING_FIELD,
            "Username, email, and password required",
        ));
    }
    let role = match body.role.as_deref() {
        None | Some("") => Role::User,
        Some(raw) => Role::parse(raw).ok_or_else(|| AppError::invalid_field("role", "Invalid role"))?,
    };
    let user = users::create_user(
        &state.db,
        &NewUser {
            username: body.username,
            email: body.email,
            password: body.password,
            full_name: body.full_name,
            role,
        },
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "user": user })),
    ))
}
