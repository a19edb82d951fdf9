use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite, SqlitePool, Transaction};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::{AppError, AppResult};

pub const MEMORY_URL: &str = "sqlite::memory:";

#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            max_connections: 8,
            acquire_timeout: Duration::from_secs(30),
            statement_timeout: Duration::from_secs(30),
        }
    }
}

fn is_memory(database: &str) -> bool {
    database == MEMORY_URL || database == ":memory:"
}

/// Open the pool for a file path or `sqlite::memory:`.
///
/// An in-memory database lives inside a single connection, so the pool is
/// pinned to one connection that is never recycled.
pub async fn open_sqlite_pool(database: &str, settings: &PoolSettings) -> AppResult<SqlitePool> {
    let memory = is_memory(database);
    let opts = if memory {
        SqliteConnectOptions::from_str(MEMORY_URL)?
    } else {
        let path = Path::new(database);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                tracing::error!(
                    target: "kinboard",
                    error = %e,
                    event = "db_dir_create_failed",
                    path = %parent.display()
                );
                AppError::from(e).with_context("path", parent.display().to_string())
            })?;
        }
        tracing::info!(target: "kinboard", event = "db_path", path = %path.display());
        SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
    };

    let mut pool_opts = SqlitePoolOptions::new().acquire_timeout(settings.acquire_timeout);
    pool_opts = if memory {
        pool_opts
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        pool_opts.max_connections(settings.max_connections)
    };

    let pool = pool_opts
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys=ON;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA wal_autocheckpoint = 1000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(opts)
        .await?;

    log_effective_pragmas(&pool, memory).await;

    Ok(pool)
}

async fn log_effective_pragmas(pool: &Pool<Sqlite>, memory: bool) {
    use tracing::{info, warn};

    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let fks: (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    let busy: (i64,) = sqlx::query_as("PRAGMA busy_timeout;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "kinboard",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0,
        foreign_keys = %fks.0,
        busy_timeout_ms = %busy.0,
        memory
    );

    if !memory && !jm.0.eq_ignore_ascii_case("wal") {
        warn!(
            target: "kinboard",
            event = "db_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}

/// Pool handle plus the per-statement time limit applied by every service.
#[derive(Debug, Clone)]
pub struct Db {
    pool: SqlitePool,
    statement_timeout: Duration,
}

impl Db {
    pub fn new(pool: SqlitePool, statement_timeout: Duration) -> Self {
        Db {
            pool,
            statement_timeout,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }

    /// Bound a storage round trip. Expiry surfaces as `STORAGE/UNAVAILABLE`.
    pub async fn timed<T, F>(&self, work: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match tokio::time::timeout(self.statement_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    target: "kinboard",
                    event = "db_statement_timeout",
                    timeout_ms = self.statement_timeout.as_millis() as u64
                );
                Err(AppError::storage_unavailable("Database statement timed out")
                    .with_context("timeout_ms", self.statement_timeout.as_millis().to_string()))
            }
        }
    }
}

/// Run work inside a transaction. Commits on success, rolls back on error.
pub async fn run_in_tx<R, E, F>(pool: &SqlitePool, f: F) -> Result<R, E>
where
    E: From<sqlx::Error>,
    F: for<'c> FnOnce(&'c mut Transaction<'static, Sqlite>) -> BoxFuture<'c, Result<R, E>>,
{
    use tracing::{debug, error, warn};

    let mut tx = pool.begin().await.map_err(E::from)?;
    debug!(target: "kinboard", event = "db_tx_begin");
    match f(&mut tx).await {
        Ok(val) => {
            tx.commit().await.map_err(E::from)?;
            debug!(target: "kinboard", event = "db_tx_commit");
            Ok(val)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                error!(target: "kinboard", event = "db_tx_rollback_failed", error = %rb);
            } else {
                warn!(target: "kinboard", event = "db_tx_rollback");
            }
            Err(e)
        }
    }
}
