use anyhow::Result;
use kinboard_lib::commands::{create_command, update_command};
use kinboard_lib::reminders::{self, due};
use kinboard_lib::time::now_ms;
use kinboard_lib::{AppError, ErrorKind};
use serde_json::{json, Value};

#[path = "util.rs"]
mod util;
use util::{fields, id_of, memory_db, owner};

const HOUR_MS: i64 = 60 * 60 * 1000;
const MINUTE_MS: i64 = 60 * 1000;

async fn reminder(db: &kinboard_lib::db::Db, owner_id: i64, title: &str, at: Option<i64>) -> Result<i64> {
    let mut payload = json!({ "title": title });
    if let Some(at) = at {
        payload["reminder_date"] = json!(at);
    }
    let created = create_command(db, "reminders", owner_id, &fields(payload)).await?;
    Ok(id_of(&created))
}

fn ids(reminders: &[Value]) -> Vec<i64> {
    reminders.iter().map(id_of).collect()
}

#[tokio::test]
async fn defaults_on_create() -> Result<()> {
    let db = memory_db().await;
    let me = owner(&db, "asha").await;
    let created = create_command(&db, "reminders", me, &fields(json!({"title": "Renew"}))).await?;
    assert_eq!(created["status"], "Active");
    assert_eq!(created["priority"], "medium");
    assert_eq!(created["notification_sent"], json!(false));
    assert_eq!(created["snooze_count"].as_i64(), Some(0));
    assert!(created["snooze_until"].is_null());
    Ok(())
}

#[tokio::test]
async fn due_query_selects_only_actionable_reminders() -> Result<()> {
    let db = memory_db().await;
    let me = owner(&db, "asha").await;
    let now = now_ms();

    let past = reminder(&db, me, "Pay premium", Some(now - HOUR_MS)).await?;
    let future = reminder(&db, me, "Later", Some(now + HOUR_MS)).await?;
    let undated = reminder(&db, me, "Someday", None).await?;
    let notified = reminder(&db, me, "Already told", Some(now - 2 * HOUR_MS)).await?;
    reminders::mark_notified(&db, me, notified, now).await?;

    let found = ids(&due(&db, me, now).await?);
    assert_eq!(found, vec![past]);
    assert!(!found.contains(&future));
    assert!(!found.contains(&undated));

    let with_files = due(&db, me, now).await?;
    assert_eq!(with_files[0]["files"], json!([]));

    reminders::complete(&db, me, past, now).await?;
    assert!(due(&db, me, now).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn complete_is_idempotent_and_terminal() -> Result<()> {
    let db = memory_db().await;
    let me = owner(&db, "asha").await;
    let now = now_ms();
    let id = reminder(&db, me, "Renew", Some(now)).await?;

    let first = reminders::complete(&db, me, id, now).await?;
    assert_eq!(first["status"], "Completed");
    assert_eq!(first["notification_sent"], json!(true));
    let second = reminders::complete(&db, me, id, now + 1).await?;
    assert_eq!(second["status"], "Completed");

    let err = reminders::snooze(&db, me, id, Some(5), now).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    let err = reminders::cancel(&db, me, id, now).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    Ok(())
}

#[tokio::test]
async fn snooze_resets_notification() -> Result<()> {
    let db = memory_db().await;
    let me = owner(&db, "asha").await;
    let now = now_ms();
    let id = reminder(&db, me, "Call bank", Some(now - HOUR_MS)).await?;
    reminders::mark_notified(&db, me, id, now).await?;

    let snoozed = reminders::snooze(&db, me, id, None, now).await?;
    assert_eq!(snoozed["notification_sent"], json!(false));
    assert_eq!(snoozed["snooze_until"].as_i64(), Some(now + 5 * MINUTE_MS));
    assert_eq!(snoozed["snooze_count"].as_i64(), Some(1));
    assert!(reminders::snooze_pending(&snoozed, now));

    // Once the snooze expires the acknowledgement clears it.
    let later = now + 6 * MINUTE_MS;
    assert!(ids(&due(&db, me, later).await?).contains(&id));
    let acked = reminders::mark_notified(&db, me, id, later).await?;
    assert!(acked["snooze_until"].is_null());
    assert!(due(&db, me, later).await?.is_empty());

    for bad in [0, -5, 525_601] {
        let err = reminders::snooze(&db, me, id, Some(bad), now).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{bad} minutes");
    }
    Ok(())
}

#[tokio::test]
async fn schedule_moves_the_reminder() -> Result<()> {
    let db = memory_db().await;
    let me = owner(&db, "asha").await;
    let now = now_ms();
    let id = reminder(&db, me, "Tax filing", Some(now - HOUR_MS)).await?;

    let err = reminders::schedule(&db, me, id, None, now).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let moved = reminders::schedule(&db, me, id, Some(&json!("2030-01-02T09:00:00Z")), now).await?;
    assert_eq!(moved["reminder_date"].as_i64(), Some(1_893_574_800_000));
    assert!(due(&db, me, now).await?.is_empty());

    let tomorrow = reminders::remind_tomorrow(&db, me, id, now).await?;
    let at = tomorrow["reminder_date"].as_i64().unwrap_or_default();
    assert!(at > now && at <= now + 24 * HOUR_MS);
    Ok(())
}

#[tokio::test]
async fn remind_tomorrow_snoozes_a_day_when_scheduling_fails() -> Result<()> {
    let db = memory_db().await;
    let me = owner(&db, "asha").await;
    let now = now_ms();
    let id = reminder(&db, me, "Car service", Some(now - HOUR_MS)).await?;

    let snoozed = reminders::remind_tomorrow_with(&db, me, id, now, |_| async {
        Err::<Value, _>(AppError::storage_unavailable("scheduler offline"))
    })
    .await?;
    assert_eq!(snoozed["snooze_count"].as_i64(), Some(1));
    assert_eq!(snoozed["notification_sent"], json!(false));
    let until = snoozed["snooze_until"].as_i64().unwrap_or_default();
    assert!((until - (now + reminders::TOMORROW_FALLBACK_MINUTES * MINUTE_MS)).abs() < MINUTE_MS);
    assert_eq!(snoozed["reminder_date"].as_i64(), Some(now - HOUR_MS));
    Ok(())
}

#[tokio::test]
async fn remind_tomorrow_fallback_still_respects_ownership() -> Result<()> {
    let db = memory_db().await;
    let me = owner(&db, "asha").await;
    let other = owner(&db, "ravi").await;
    let now = now_ms();
    let id = reminder(&db, me, "Car service", Some(now - HOUR_MS)).await?;

    let err = reminders::remind_tomorrow_with(&db, other, id, now, |_| async {
        Err::<Value, _>(AppError::storage_unavailable("scheduler offline"))
    })
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn record_edits_bypass_the_transition_rules() -> Result<()> {
    let db = memory_db().await;
    let me = owner(&db, "asha").await;
    let now = now_ms();
    let id = reminder(&db, me, "Passport", Some(now - HOUR_MS)).await?;

    reminders::complete(&db, me, id, now).await?;
    let err = reminders::snooze(&db, me, id, Some(5), now).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let reopened = update_command(
        &db,
        "reminders",
        me,
        id,
        &fields(json!({"status": "Active", "notification_sent": false})),
    )
    .await?;
    assert_eq!(reopened["status"], "Active");
    assert_eq!(ids(&due(&db, me, now).await?), vec![id]);
    Ok(())
}

#[tokio::test]
async fn cancel_and_ownership() -> Result<()> {
    let db = memory_db().await;
    let me = owner(&db, "asha").await;
    let other = owner(&db, "ravi").await;
    let now = now_ms();
    let id = reminder(&db, me, "Dentist", Some(now - HOUR_MS)).await?;

    let err = reminders::complete(&db, other, id, now).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(due(&db, other, now).await?.is_empty());

    let cancelled = reminders::cancel(&db, me, id, now).await?;
    assert_eq!(cancelled["status"], "Cancelled");
    let again = reminders::cancel(&db, me, id, now).await?;
    assert_eq!(again["status"], "Cancelled");
    assert!(due(&db, me, now).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn legacy_pending_status_is_active() -> Result<()> {
    let db = memory_db().await;
    let me = owner(&db, "asha").await;
    let created = create_command(
        &db,
        "reminders",
        me,
        &fields(json!({"title": "Old", "status": "pending"})),
    )
    .await?;
    assert_eq!(created["status"], "Active");
    Ok(())
}
