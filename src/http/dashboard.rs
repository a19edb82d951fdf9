use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::extract::AuthUser;
use crate::state::AppState;
use crate::{audit, export, import, AppResult};

pub async fn health(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    state
        .db
        .timed(async {
            sqlx::query("SELECT 1").execute(state.db.pool()).await?;
            Ok(())
        })
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn stats(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<impl IntoResponse> {
    let stats = state.stats.get(&state.db, user.id).await?;
    Ok(Json(stats))
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityParams {
    pub limit: Option<i64>,
}

pub async fn activity_logs(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    params: Result<Query<ActivityParams>, QueryRejection>,
) -> AppResult<impl IntoResponse> {
    let Query(params) = params?;
    let logs = audit::recent(&state.db, user.id, params.limit).await?;
    Ok(Json(json!({ "success": true, "data": logs })))
}

pub async fn export_all(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<impl IntoResponse> {
    let bundle = export::export_all(&state.db, user.id).await?;
    Ok(Json(bundle))
}

pub async fn import_all(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Result<Json<Value>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(bundle) = body?;
    let report = import::import_all(&state.db, user.id, &bundle).await?;
    state.stats.invalidate(user.id);
    Ok(Json(report))
}
