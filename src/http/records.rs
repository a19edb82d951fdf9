use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::extract::{parse_id, AuthUser};
use crate::commands;
use crate::family::resolve_member_names;
use crate::query::{ListQuery, Page};
use crate::schema::get_schema;
use crate::state::AppState;
use crate::AppResult;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub resolve_members: Option<bool>,
}

type Body = Result<Json<Map<String, Value>>, JsonRejection>;
type Params = Result<Query<ListParams>, QueryRejection>;

async fn list_records(
    state: &AppState,
    owner_id: i64,
    entity_type: &str,
    params: ListParams,
) -> AppResult<Json<Value>> {
    let query = ListQuery {
        search: params.search,
        page: Page::new(params.page, params.limit),
    };
    let mut page = commands::list_command(&state.db, entity_type, owner_id, &query).await?;
    if params.resolve_members.unwrap_or(false) && get_schema(entity_type)?.references_family_members() {
        resolve_member_names(&state.db, owner_id, &mut page.records).await?;
    }
    Ok(Json(json!({
        "success": true,
        "data": page.records,
        "pagination": {
            "page": page.page,
            "limit": page.page_size,
            "total": page.total,
            "totalPages": page.total_pages,
        },
    })))
}

async fn get_record(state: &AppState, owner_id: i64, entity_type: &str, id: &str) -> AppResult<Json<Value>> {
    let id = parse_id("id", id)?;
    let record = commands::get_command(&state.db, entity_type, owner_id, id).await?;
    Ok(Json(json!({ "success": true, "data": record })))
}

async fn create_record(
    state: &AppState,
    owner_id: i64,
    entity_type: &str,
    payload: Map<String, Value>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let record = commands::create_command(&state.db, entity_type, owner_id, &payload).await?;
    state.stats.invalidate(owner_id);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": record })),
    ))
}

async fn update_record(
    state: &AppState,
    owner_id: i64,
    entity_type: &str,
    id: &str,
    payload: Map<String, Value>,
) -> AppResult<Json<Value>> {
    let id = parse_id("id", id)?;
    let record = commands::update_command(&state.db, entity_type, owner_id, id, &payload).await?;
    state.stats.invalidate(owner_id);
    Ok(Json(json!({ "success": true, "data": record })))
}

async fn delete_record(state: &AppState, owner_id: i64, entity_type: &str, id: &str) -> AppResult<Json<Value>> {
    let id = parse_id("id", id)?;
    commands::delete_command(&state.db, entity_type, owner_id, id).await?;
    state.stats.invalidate(owner_id);
    Ok(Json(json!({
        "success": true,
        "message": "Record deleted successfully",
    })))
}

pub async fn list(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(entity_type): Path<String>,
    params: Params,
) -> AppResult<impl IntoResponse> {
    let Query(params) = params?;
    list_records(&state, user.id, &entity_type, params).await
}

pub async fn get(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((entity_type, id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    get_record(&state, user.id, &entity_type, &id).await
}

pub async fn create(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(entity_type): Path<String>,
    body: Body,
) -> AppResult<impl IntoResponse> {
    let Json(payload) = body?;
    create_record(&state, user.id, &entity_type, payload).await
}

pub async fn update(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((entity_type, id)): Path<(String, String)>,
    body: Body,
) -> AppResult<impl IntoResponse> {
    let Json(payload) = body?;
    update_record(&state, user.id, &entity_type, &id, payload).await
}

pub async fn delete(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((entity_type, id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    delete_record(&state, user.id, &entity_type, &id).await
}

// `/api/reminders/...` also carries the engine routes, so plain reminder CRUD
// is registered on fixed paths rather than through `/api/:entity`.
const REMINDERS: &str = "reminders";

pub async fn list_reminders(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    params: Params,
) -> AppResult<impl IntoResponse> {
    let Query(params) = params?;
    list_records(&state, user.id, REMINDERS, params).await
}

pub async fn get_reminder(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    get_record(&state, user.id, REMINDERS, &id).await
}

pub async fn create_reminder(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Body,
) -> AppResult<impl IntoResponse> {
    let Json(payload) = body?;
    create_record(&state, user.id, REMINDERS, payload).await
}

pub async fn update_reminder(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    body: Body,
) -> AppResult<impl IntoResponse> {
    let Json(payload) = body?;
    update_record(&state, user.id, REMINDERS, &id, payload).await
}

pub async fn delete_reminder(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    delete_record(&state, user.id, REMINDERS, &id).await
}
