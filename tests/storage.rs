use std::time::Duration;

use anyhow::Result;
use kinboard_lib::commands::list_command;
use kinboard_lib::db::{open_sqlite_pool, Db, PoolSettings};
use kinboard_lib::migrate::{apply_migrations, migration_names};
use kinboard_lib::query::ListQuery;
use kinboard_lib::ErrorKind;
use tempfile::tempdir;

#[tokio::test]
async fn migrations_apply_once_to_a_file_database() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("nested").join("kinboard.sqlite3");
    let database = path.display().to_string();

    let pool = open_sqlite_pool(&database, &PoolSettings::default()).await?;
    apply_migrations(&pool).await?;
    apply_migrations(&pool).await?;
    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
        .fetch_one(&pool)
        .await?;
    assert_eq!(applied as usize, migration_names().count());
    let mode: String = sqlx::query_scalar("PRAGMA journal_mode").fetch_one(&pool).await?;
    assert_eq!(mode.to_ascii_lowercase(), "wal");
    pool.close().await;

    // Reopening sees the same ledger and applies nothing new.
    let reopened = open_sqlite_pool(&database, &PoolSettings::default()).await?;
    apply_migrations(&reopened).await?;
    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
        .fetch_one(&reopened)
        .await?;
    assert_eq!(applied as usize, migration_names().count());
    assert!(path.exists());
    Ok(())
}

#[tokio::test]
async fn exhausted_pool_is_storage_unavailable() -> Result<()> {
    let dir = tempdir()?;
    let database = dir.path().join("busy.sqlite3").display().to_string();
    let settings = PoolSettings {
        max_connections: 1,
        acquire_timeout: Duration::from_millis(100),
        statement_timeout: Duration::from_secs(5),
    };
    let pool = open_sqlite_pool(&database, &settings).await?;
    apply_migrations(&pool).await?;
    let db = Db::new(pool.clone(), settings.statement_timeout);

    let held = pool.acquire().await?;
    let err = list_command(&db, "properties", 1, &ListQuery::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    drop(held);

    let page = list_command(&db, "properties", 1, &ListQuery::default()).await?;
    assert_eq!(page.total, 0);
    Ok(())
}
