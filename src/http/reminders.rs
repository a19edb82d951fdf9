use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::extract::{optional_json, parse_id, AuthUser};
use crate::reminders::{self, DEFAULT_SNOOZE_MINUTES};
use crate::state::AppState;
use crate::time::now_ms;
use crate::AppResult;

#[derive(Debug, Default, Deserialize)]
pub struct SnoozeBody {
    pub minutes: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScheduleBody {
    #[serde(alias = "reminderDate")]
    pub reminder_date: Option<Value>,
}

fn transitioned(reminder: Value, message: String) -> Json<Value> {
    Json(json!({
        "success": true,
        "reminder": reminder,
        "message": message,
    }))
}

pub async fn due(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<impl IntoResponse> {
    let due = reminders::due(&state.db, user.id, now_ms()).await?;
    Ok(Json(due))
}

pub async fn complete(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let id = parse_id("id", &id)?;
    let reminder = reminders::complete(&state.db, user.id, id, now_ms()).await?;
    state.stats.invalidate(user.id);
    Ok(transitioned(reminder, "Reminder marked as completed".into()))
}

pub async fn snooze(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let id = parse_id("id", &id)?;
    let body: SnoozeBody = optional_json(&body)?;
    let minutes = body.minutes.unwrap_or(DEFAULT_SNOOZE_MINUTES);
    let reminder = reminders::snooze(&state.db, user.id, id, Some(minutes), now_ms()).await?;
    state.stats.invalidate(user.id);
    Ok(transitioned(reminder, format!("Reminder snoozed for {minutes} minutes")))
}

pub async fn schedule(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let id = parse_id("id", &id)?;
    let body: ScheduleBody = optional_json(&body)?;
    let reminder =
        reminders::schedule(&state.db, user.id, id, body.reminder_date.as_ref(), now_ms()).await?;
    state.stats.invalidate(user.id);
    Ok(transitioned(reminder, "Reminder scheduled".into()))
}

pub async fn remind_tomorrow(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let id = parse_id("id", &id)?;
    let reminder = reminders::remind_tomorrow(&state.db, user.id, id, now_ms()).await?;
    state.stats.invalidate(user.id);
    Ok(transitioned(reminder, "Reminder moved to tomorrow".into()))
}

pub async fn notified(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let id = parse_id("id", &id)?;
    let reminder = reminders::mark_notified(&state.db, user.id, id, now_ms()).await?;
    Ok(Json(reminder))
}

pub async fn cancel(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let id = parse_id("id", &id)?;
    let reminder = reminders::cancel(&state.db, user.id, id, now_ms()).await?;
    state.stats.invalidate(user.id);
    Ok(transitioned(reminder, "Reminder cancelled".into()))
}
