//! Activity audit trail.
//!
//! Writes happen after the primary mutation has committed. A failed audit
//! write is logged and dropped; it never changes the caller's outcome.

use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::FromRow;
use ts_rs::TS;

use crate::db::Db;
use crate::time::now_ms;
use crate::{AppError, AppResult};

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;
const SUMMARY_MAX_CHARS: usize = 1000;
const REDACTED: &str = "[redacted]";
const SECRET_MARKERS: [&str; 4] = ["password", "cvv", "pin", "token"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ActivityLog {
    pub id: i64,
    pub user_id: i64,
    pub action: String,
    pub table_name: Option<String>,
    pub record_id: Option<String>,
    pub details: Option<String>,
    pub created_at: i64,
}

fn is_secret_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SECRET_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Replace the values of secret-looking keys, recursively.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, inner) in map {
                let replaced = if is_secret_key(key) && !inner.is_null() {
                    Value::String(REDACTED.to_string())
                } else {
                    redact(inner)
                };
                out.insert(key.clone(), replaced);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

/// Redacted, length-bounded JSON rendering of a payload.
pub fn summarize(payload: &Value) -> String {
    let rendered = redact(payload).to_string();
    match rendered.char_indices().nth(SUMMARY_MAX_CHARS) {
        Some((cut, _)) => format!("{}…", &rendered[..cut]),
        None => rendered,
    }
}

pub async fn record(
    db: &Db,
    owner_id: i64,
    action: AuditAction,
    table: &str,
    record_id: &str,
    details: Option<&Value>,
) {
    let summary = details.map(summarize);
    let write = sqlx::query(
        "INSERT INTO activity_logs (user_id, action, table_name, record_id, details, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(owner_id)
    .bind(action.as_str())
    .bind(table)
    .bind(record_id)
    .bind(summary)
    .bind(now_ms())
    .execute(db.pool());

    let outcome = db.timed(async { write.await.map_err(AppError::from) }).await;
    if let Err(err) = outcome {
        tracing::warn!(
            target: "kinboard",
            event = "audit_write_failed",
            owner_id,
            action = action.as_str(),
            table,
            record_id,
            code = err.code(),
            error = %err
        );
    }
}

/// Caller's most recent entries, newest first.
pub async fn recent(db: &Db, owner_id: i64, limit: Option<i64>) -> AppResult<Vec<ActivityLog>> {
    let limit = limit
        .filter(|limit| *limit >= 1)
        .map(|limit| limit.min(MAX_LIMIT))
        .unwrap_or(DEFAULT_LIMIT);
    db.timed(async {
        let rows = sqlx::query_as::<_, ActivityLog>(
            "SELECT id, user_id, action, table_name, record_id, details, created_at
             FROM activity_logs WHERE user_id = ?
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(owner_id)
        .bind(limit)
        .fetch_all(db.pool())
        .await?;
        Ok(rows)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn secrets_are_redacted_at_any_depth() {
        let payload = json!({
            "name": "HDFC",
            "password": "hunter2",
            "card": {"cvv": "123", "atm_pin": "9999"},
            "tokens": [{"access_token": "abc"}],
            "login_password": null
        });
        let out = redact(&payload);
        assert_eq!(out["name"], "HDFC");
        assert_eq!(out["password"], REDACTED);
        assert_eq!(out["card"]["cvv"], REDACTED);
        assert_eq!(out["card"]["atm_pin"], REDACTED);
        assert_eq!(out["tokens"], REDACTED);
        assert!(out["login_password"].is_null());
    }

    #[test]
    fn summary_is_bounded() {
        let payload = json!({ "notes": "x".repeat(5000) });
        let summary = summarize(&payload);
        assert!(summary.ends_with('…'));
        assert_eq!(summary.chars().count(), SUMMARY_MAX_CHARS + 1);
    }
}
