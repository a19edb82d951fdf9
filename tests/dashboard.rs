use std::time::Duration;

use anyhow::Result;
use kinboard_lib::audit;
use kinboard_lib::commands::{create_command, delete_command, update_command};
use kinboard_lib::family::{resolve_member_names, MEMBER_NAME_FIELD};
use kinboard_lib::reminders;
use kinboard_lib::stats::{compute, StatsCache};
use kinboard_lib::time::now_ms;
use serde_json::json;

#[path = "util.rs"]
mod util;
use util::{fields, id_of, memory_db, owner};

#[tokio::test]
async fn stats_count_owner_records_only() -> Result<()> {
    let db = memory_db().await;
    let me = owner(&db, "asha").await;
    let other = owner(&db, "ravi").await;
    let now = now_ms();

    create_command(&db, "properties", me, &fields(json!({"name": "Villa A"}))).await?;
    create_command(&db, "properties", other, &fields(json!({"name": "Not mine"}))).await?;
    let soon = create_command(&db, "reminders", me, &fields(json!({"title": "Soon", "reminder_date": now + 1000}))).await?;
    create_command(&db, "reminders", me, &fields(json!({"title": "Undated"}))).await?;
    let done = create_command(&db, "reminders", me, &fields(json!({"title": "Done", "reminder_date": now - 1000}))).await?;
    reminders::complete(&db, me, id_of(&done), now).await?;

    let stats = compute(&db, me).await?;
    assert_eq!(stats.stats.by_entity_type["properties"], 1);
    assert_eq!(stats.stats.by_entity_type["reminders"], 3);
    assert_eq!(stats.stats.by_entity_type["loans"], 0);
    assert_eq!(stats.stats.active_reminders, 2);
    assert_eq!(stats.stats.files, 0);
    let upcoming: Vec<i64> = stats.upcoming_reminders.iter().map(id_of).collect();
    assert_eq!(upcoming[0], id_of(&soon));
    assert_eq!(upcoming.len(), 2);

    let body = serde_json::to_value(&stats)?;
    assert_eq!(body["stats"]["properties"], 1);
    assert_eq!(body["stats"]["activeReminders"], 2);
    assert!(body["upcomingReminders"].is_array());
    Ok(())
}

#[tokio::test]
async fn stats_cache_serves_until_invalidated() -> Result<()> {
    let db = memory_db().await;
    let me = owner(&db, "asha").await;
    let cache = StatsCache::new(Duration::from_secs(60));

    assert_eq!(cache.get(&db, me).await?.stats.by_entity_type["loans"], 0);
    create_command(
        &db,
        "loans",
        me,
        &fields(json!({
            "name": "Home loan",
            "borrower_name": "Asha",
            "lender_name": "SBI",
            "loan_amount": 2500000,
            "loan_start_date": "2024-04-01",
            "loan_status": "Active"
        })),
    )
    .await?;
    assert_eq!(cache.get(&db, me).await?.stats.by_entity_type["loans"], 0);
    cache.invalidate(me);
    assert_eq!(cache.get(&db, me).await?.stats.by_entity_type["loans"], 1);
    Ok(())
}

#[tokio::test]
async fn mutations_are_audited_without_secrets() -> Result<()> {
    let db = memory_db().await;
    let me = owner(&db, "asha").await;
    let other = owner(&db, "ravi").await;

    let account = create_command(
        &db,
        "banking_details",
        me,
        &fields(json!({"name": "Salary account", "bank_name": "HDFC", "password": "hunter2"})),
    )
    .await?;
    let id = id_of(&account);
    update_command(&db, "banking_details", me, id, &fields(json!({"branch": "Fort"}))).await?;
    delete_command(&db, "banking_details", me, id).await?;

    let logs = audit::recent(&db, me, None).await?;
    let actions: Vec<&str> = logs.iter().map(|log| log.action.as_str()).collect();
    assert_eq!(actions, vec!["DELETE", "UPDATE", "CREATE"]);
    assert!(logs.iter().all(|log| log.table_name.as_deref() == Some("banking_details")));
    assert!(logs.iter().all(|log| log.record_id.as_deref() == Some(id.to_string().as_str())));
    let created = logs[2].details.as_deref().unwrap_or_default();
    assert!(!created.contains("hunter2"));
    assert!(created.contains("[redacted]"));

    assert!(audit::recent(&db, other, None).await?.is_empty());
    assert_eq!(audit::recent(&db, me, Some(1)).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn member_names_resolve_per_owner() -> Result<()> {
    let db = memory_db().await;
    let me = owner(&db, "asha").await;
    let other = owner(&db, "ravi").await;
    let mine = create_command(&db, "family_members", me, &fields(json!({"name": "Meera", "relationship": "Mother"}))).await?;
    let theirs = create_command(&db, "family_members", other, &fields(json!({"name": "Kiran", "relationship": "Son"}))).await?;

    let mut records = vec![
        json!({"id": 1, "family_member_id": id_of(&mine)}),
        json!({"id": 2, "family_member_id": id_of(&theirs)}),
        json!({"id": 3, "family_member_id": null}),
    ];
    resolve_member_names(&db, me, &mut records).await?;
    assert_eq!(records[0][MEMBER_NAME_FIELD], "Meera");
    assert_eq!(records[1][MEMBER_NAME_FIELD], id_of(&theirs).to_string());
    assert!(records[2].get(MEMBER_NAME_FIELD).is_none());
    Ok(())
}
