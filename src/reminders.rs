//! Reminder lifecycle.
//!
//! Every transition is first judged by [`ReminderStatus::check`] against the
//! stored status, then written with one guarded `UPDATE ... RETURNING *`. A
//! guarded write that matches nothing means the status moved underneath us
//! and is reported as a conflict.

use std::future::Future;

use serde_json::{json, Value};

use crate::attachments::list_for_records;
use crate::audit::{self, AuditAction};
use crate::db::Db;
use crate::op_log::LogScope;
use crate::query::{SqlValue, Statement};
use crate::repo::{fetch_all, fetch_optional};
use crate::schema::{get_schema, EntitySchema, REMINDER_STATUS};
use crate::time::{next_morning_ms, parse_instant_ms};
use crate::{AppError, AppResult};

pub const DEFAULT_SNOOZE_MINUTES: i64 = 5;
pub const MAX_SNOOZE_MINUTES: i64 = 525_600;
pub const TOMORROW_FALLBACK_MINUTES: i64 = 1440;
const MINUTE_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Complete,
    Snooze { minutes: i64 },
    Schedule { at_ms: i64 },
    MarkNotified,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Apply,
    /// Already in the target state; return the reminder unchanged.
    Unchanged,
    Reject,
}

impl ReminderStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match REMINDER_STATUS.canonical(raw)? {
            "Active" => Some(ReminderStatus::Active),
            "Completed" => Some(ReminderStatus::Completed),
            "Cancelled" => Some(ReminderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReminderStatus::Active => "Active",
            ReminderStatus::Completed => "Completed",
            ReminderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ReminderStatus::Active)
    }

    pub fn check(self, transition: Transition) -> Verdict {
        match (self, transition) {
            (_, Transition::MarkNotified) => Verdict::Apply,
            (ReminderStatus::Active, _) => Verdict::Apply,
            (ReminderStatus::Completed, Transition::Complete)
            | (ReminderStatus::Cancelled, Transition::Cancel) => Verdict::Unchanged,
            _ => Verdict::Reject,
        }
    }
}

impl Transition {
    pub fn name(self) -> &'static str {
        match self {
            Transition::Complete => "complete",
            Transition::Snooze { .. } => "snooze",
            Transition::Schedule { .. } => "schedule",
            Transition::MarkNotified => "mark_notified",
            Transition::Cancel => "cancel",
        }
    }

    fn validate(self) -> AppResult<()> {
        if let Transition::Snooze { minutes } = self {
            if !(1..=MAX_SNOOZE_MINUTES).contains(&minutes) {
                return Err(AppError::invalid_field(
                    "minutes",
                    format!("must be between 1 and {MAX_SNOOZE_MINUTES}"),
                ));
            }
        }
        Ok(())
    }

    /// SET list and its parameters.
    fn assignments(self, now_ms: i64) -> (Vec<&'static str>, Vec<SqlValue>) {
        match self {
            Transition::Complete => (
                vec!["status = 'Completed'", "notification_sent = 1"],
                vec![],
            ),
            Transition::Snooze { minutes } => (
                vec![
                    "snooze_until = ?",
                    "notification_sent = 0",
                    "snooze_count = snooze_count + 1",
                ],
                vec![SqlValue::Integer(now_ms + minutes * MINUTE_MS)],
            ),
            Transition::Schedule { at_ms } => (
                vec![
                    "reminder_date = ?",
                    "snooze_until = NULL",
                    "notification_sent = 0",
                ],
                vec![SqlValue::Integer(at_ms)],
            ),
            // An expired snooze has fired once it is acknowledged.
            Transition::MarkNotified => (
                vec![
                    "notification_sent = 1",
                    "snooze_until = CASE WHEN snooze_until <= ? THEN NULL ELSE snooze_until END",
                ],
                vec![SqlValue::Integer(now_ms)],
            ),
            Transition::Cancel => (vec!["status = 'Cancelled'"], vec![]),
        }
    }

    fn audit_details(self) -> Value {
        match self {
            Transition::Snooze { minutes } => json!({ "transition": self.name(), "minutes": minutes }),
            Transition::Schedule { at_ms } => {
                json!({ "transition": self.name(), "reminder_date": at_ms })
            }
            _ => json!({ "transition": self.name() }),
        }
    }
}

pub fn build_transition(owner_id: i64, id: i64, transition: Transition, now_ms: i64) -> Statement {
    let (mut sets, mut params) = transition.assignments(now_ms);
    sets.push("updated_at = MAX(?, updated_at + 1)");
    params.push(SqlValue::Integer(now_ms));
    params.push(SqlValue::Integer(id));
    params.push(SqlValue::Integer(owner_id));
    let guard = if transition == Transition::MarkNotified {
        ""
    } else {
        " AND status = 'Active'"
    };
    Statement {
        sql: format!(
            "UPDATE reminders SET {} WHERE id = ? AND user_id = ?{guard} RETURNING *",
            sets.join(", ")
        ),
        params,
    }
}

/// Reminders needing a fresh notification: first firing or an expired snooze.
pub fn build_due(owner_id: i64, now_ms: i64) -> Statement {
    Statement {
        sql: "SELECT * FROM reminders \
              WHERE user_id = ? AND status = 'Active' \
              AND reminder_date IS NOT NULL AND reminder_date <= ? \
              AND (notification_sent = 0 OR (snooze_until IS NOT NULL AND snooze_until <= ?)) \
              ORDER BY reminder_date ASC, id ASC"
            .to_string(),
        params: vec![
            SqlValue::Integer(owner_id),
            SqlValue::Integer(now_ms),
            SqlValue::Integer(now_ms),
        ],
    }
}

fn schema() -> AppResult<&'static EntitySchema> {
    get_schema("reminders")
}

fn stored_status(reminder: &Value) -> AppResult<ReminderStatus> {
    let raw = reminder.get("status").and_then(Value::as_str).unwrap_or_default();
    ReminderStatus::parse(raw).ok_or_else(|| {
        AppError::new("REMINDER/INVALID_STATE", "Stored reminder status is not recognised")
            .with_context("status", raw.to_string())
    })
}

async fn load(db: &Db, schema: &EntitySchema, owner_id: i64, id: i64) -> AppResult<Value> {
    let stmt = crate::query::build_get(schema, owner_id, id);
    db.timed(fetch_optional(db.pool(), &stmt, Some(schema)))
        .await?
        .ok_or_else(|| AppError::not_found("Reminder"))
}

async fn apply(
    db: &Db,
    owner_id: i64,
    id: i64,
    transition: Transition,
    now_ms: i64,
) -> AppResult<Value> {
    transition.validate()?;
    let schema = schema()?;
    let current = load(db, schema, owner_id, id).await?;
    let status = stored_status(&current)?;
    match status.check(transition) {
        Verdict::Unchanged => return Ok(current),
        Verdict::Reject => {
            return Err(AppError::conflict(format!(
                "Reminder is {} and cannot {}",
                status.as_str(),
                transition.name()
            ))
            .with_context("status", status.as_str()))
        }
        Verdict::Apply => {}
    }
    let stmt = build_transition(owner_id, id, transition, now_ms);
    let updated = db
        .timed(fetch_optional(db.pool(), &stmt, Some(schema)))
        .await?
        .ok_or_else(|| AppError::conflict("Reminder changed while it was being updated"))?;
    audit::record(
        db,
        owner_id,
        AuditAction::Update,
        schema.name,
        &id.to_string(),
        Some(&transition.audit_details()),
    )
    .await;
    Ok(updated)
}

async fn transition_command(
    db: &Db,
    owner_id: i64,
    id: i64,
    transition: Transition,
    now_ms: i64,
) -> AppResult<Value> {
    let scope = LogScope::new("reminders", transition.name(), "reminders", owner_id);
    let result = apply(db, owner_id, id, transition, now_ms)
        .await
        .map_err(|err| err.with_context("id", id.to_string()));
    scope.finish(result, |_| 1)
}

pub async fn complete(db: &Db, owner_id: i64, id: i64, now_ms: i64) -> AppResult<Value> {
    transition_command(db, owner_id, id, Transition::Complete, now_ms).await
}

/// Postpone by `minutes`, five when not given.
pub async fn snooze(
    db: &Db,
    owner_id: i64,
    id: i64,
    minutes: Option<i64>,
    now_ms: i64,
) -> AppResult<Value> {
    let minutes = minutes.unwrap_or(DEFAULT_SNOOZE_MINUTES);
    transition_command(db, owner_id, id, Transition::Snooze { minutes }, now_ms).await
}

/// Move the reminder to a new instant, given as epoch ms or RFC 3339.
pub async fn schedule(
    db: &Db,
    owner_id: i64,
    id: i64,
    reminder_date: Option<&Value>,
    now_ms: i64,
) -> AppResult<Value> {
    let raw = reminder_date
        .filter(|value| !value.is_null())
        .ok_or_else(|| AppError::missing_field("reminder_date"))?;
    let at_ms = parse_instant_ms(raw)
        .ok_or_else(|| AppError::invalid_field("reminder_date", "expected a timestamp"))?;
    transition_command(db, owner_id, id, Transition::Schedule { at_ms }, now_ms).await
}

pub async fn mark_notified(db: &Db, owner_id: i64, id: i64, now_ms: i64) -> AppResult<Value> {
    transition_command(db, owner_id, id, Transition::MarkNotified, now_ms).await
}

pub async fn cancel(db: &Db, owner_id: i64, id: i64, now_ms: i64) -> AppResult<Value> {
    transition_command(db, owner_id, id, Transition::Cancel, now_ms).await
}

/// Delivery acknowledgement from the poller. Not audited.
pub(crate) async fn acknowledge(db: &Db, owner_id: i64, id: i64, now_ms: i64) -> AppResult<()> {
    let stmt = build_transition(owner_id, id, Transition::MarkNotified, now_ms);
    db.timed(fetch_optional(db.pool(), &stmt, None))
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::not_found("Reminder"))
}

/// Schedule for 09:00 UTC tomorrow, falling back to a one-day snooze.
pub async fn remind_tomorrow(db: &Db, owner_id: i64, id: i64, now_ms: i64) -> AppResult<Value> {
    remind_tomorrow_with(db, owner_id, id, now_ms, |at_ms| {
        transition_command(db, owner_id, id, Transition::Schedule { at_ms }, now_ms)
    })
    .await
}

/// [`remind_tomorrow`] with the scheduling step supplied by the caller.
///
/// Any failure of `schedule_at` falls back to a one-day snooze. A reminder
/// that cannot be snoozed either surfaces the snooze error.
pub async fn remind_tomorrow_with<F, Fut>(
    db: &Db,
    owner_id: i64,
    id: i64,
    now_ms: i64,
    schedule_at: F,
) -> AppResult<Value>
where
    F: FnOnce(i64) -> Fut,
    Fut: Future<Output = AppResult<Value>>,
{
    match schedule_at(next_morning_ms(now_ms)).await {
        Ok(reminder) => Ok(reminder),
        Err(err) => {
            tracing::warn!(
                target: "kinboard",
                event = "reminder_schedule_fallback",
                owner_id,
                id,
                code = err.code()
            );
            snooze(db, owner_id, id, Some(TOMORROW_FALLBACK_MINUTES), now_ms).await
        }
    }
}

async fn due_reminders(db: &Db, owner_id: i64, now_ms: i64) -> AppResult<Vec<Value>> {
    let schema = schema()?;
    let stmt = build_due(owner_id, now_ms);
    let mut reminders = db.timed(fetch_all(db.pool(), &stmt, Some(schema))).await?;
    let ids: Vec<i64> = reminders
        .iter()
        .filter_map(|r| r.get("id").and_then(Value::as_i64))
        .collect();
    let mut files = list_for_records(db, schema.name, owner_id, &ids).await?;
    for reminder in reminders.iter_mut() {
        let attached = reminder
            .get("id")
            .and_then(Value::as_i64)
            .and_then(|id| files.remove(&id))
            .unwrap_or_default();
        if let Some(map) = reminder.as_object_mut() {
            map.insert("files".to_string(), serde_json::to_value(attached)?);
        }
    }
    Ok(reminders)
}

/// Due reminders, oldest first, each with its attachment metadata as `files`.
pub async fn due(db: &Db, owner_id: i64, now_ms: i64) -> AppResult<Vec<Value>> {
    let scope = LogScope::new("reminders", "due", "reminders", owner_id);
    scope.finish(due_reminders(db, owner_id, now_ms).await, Vec::len)
}

/// Owners with at least one due reminder.
pub async fn due_owners(db: &Db, now_ms: i64) -> AppResult<Vec<i64>> {
    db.timed(async {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT r.user_id FROM reminders r
             JOIN users u ON u.id = r.user_id AND u.is_active = 1
             WHERE r.status = 'Active' AND r.reminder_date IS NOT NULL AND r.reminder_date <= ?1
             AND (r.notification_sent = 0 OR (r.snooze_until IS NOT NULL AND r.snooze_until <= ?1))
             ORDER BY r.user_id",
        )
        .bind(now_ms)
        .fetch_all(db.pool())
        .await?)
    })
    .await
}

/// A snooze that has not yet expired.
pub fn snooze_pending(reminder: &Value, now_ms: i64) -> bool {
    reminder
        .get("snooze_until")
        .and_then(Value::as_i64)
        .is_some_and(|until| until > now_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_only_accept_notification_acks() {
        use ReminderStatus::*;
        let all = [
            Transition::Complete,
            Transition::Snooze { minutes: 5 },
            Transition::Schedule { at_ms: 0 },
            Transition::MarkNotified,
            Transition::Cancel,
        ];
        for t in all {
            assert_eq!(Active.check(t), Verdict::Apply, "{t:?}");
        }
        assert_eq!(Completed.check(Transition::Complete), Verdict::Unchanged);
        assert_eq!(Completed.check(Transition::MarkNotified), Verdict::Apply);
        assert_eq!(Completed.check(Transition::Snooze { minutes: 5 }), Verdict::Reject);
        assert_eq!(Completed.check(Transition::Cancel), Verdict::Reject);
        assert_eq!(Cancelled.check(Transition::Cancel), Verdict::Unchanged);
        assert_eq!(Cancelled.check(Transition::Complete), Verdict::Reject);
        assert_eq!(Cancelled.check(Transition::Schedule { at_ms: 1 }), Verdict::Reject);
    }

    #[test]
    fn legacy_pending_parses_as_active() {
        assert_eq!(ReminderStatus::parse("pending"), Some(ReminderStatus::Active));
        assert_eq!(ReminderStatus::parse("Pending"), Some(ReminderStatus::Active));
        assert_eq!(ReminderStatus::parse("done"), None);
        assert!(ReminderStatus::Completed.is_terminal());
    }

    #[test]
    fn snooze_minutes_are_bounded() {
        assert!(Transition::Snooze { minutes: 0 }.validate().is_err());
        assert!(Transition::Snooze { minutes: MAX_SNOOZE_MINUTES + 1 }.validate().is_err());
        assert!(Transition::Snooze { minutes: 1 }.validate().is_ok());
    }

    #[test]
    fn guarded_update_shape() {
        let stmt = build_transition(7, 3, Transition::Snooze { minutes: 5 }, 1_000);
        assert!(stmt.sql.ends_with("WHERE id = ? AND user_id = ? AND status = 'Active' RETURNING *"));
        assert_eq!(
            stmt.params,
            vec![
                SqlValue::Integer(1_000 + 5 * MINUTE_MS),
                SqlValue::Integer(1_000),
                SqlValue::Integer(3),
                SqlValue::Integer(7),
            ]
        );
        let ack = build_transition(7, 3, Transition::MarkNotified, 1_000);
        assert!(!ack.sql.contains("status ="));
    }

    #[test]
    fn pending_snooze_detection() {
        assert!(snooze_pending(&json!({"snooze_until": 2_000}), 1_000));
        assert!(!snooze_pending(&json!({"snooze_until": 500}), 1_000));
        assert!(!snooze_pending(&json!({"snooze_until": null}), 1_000));
    }
}
