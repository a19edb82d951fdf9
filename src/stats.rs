//! Dashboard counters with a short per-owner cache.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use serde::Serialize;
use serde_json::Value;

use crate::db::Db;
use crate::query::{build_count, SqlValue, Statement};
use crate::repo::{fetch_all, fetch_count};
use crate::schema::{entity_types, get_schema};
use crate::AppResult;

pub const DEFAULT_TTL: Duration = Duration::from_secs(10);
const UPCOMING_LIMIT: i64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsCounts {
    #[serde(flatten)]
    pub by_entity_type: BTreeMap<String, i64>,
    pub files: i64,
    pub active_reminders: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub stats: StatsCounts,
    pub upcoming_reminders: Vec<Value>,
}

fn owner_count(sql: &str, owner_id: i64) -> Statement {
    Statement {
        sql: sql.to_string(),
        params: vec![SqlValue::Integer(owner_id)],
    }
}

pub async fn compute(db: &Db, owner_id: i64) -> AppResult<DashboardStats> {
    let statements: Vec<(&'static str, Statement)> = entity_types()
        .map(|schema| (schema.name, build_count(schema, owner_id, None)))
        .collect();
    let counts = try_join_all(
        statements
            .iter()
            .map(|(_, stmt)| db.timed(fetch_count(db.pool(), stmt))),
    )
    .await?;
    let by_entity_type = statements
        .iter()
        .map(|(name, _)| name.to_string())
        .zip(counts)
        .collect();

    let files_stmt = owner_count("SELECT COUNT(*) FROM attachments WHERE user_id = ?", owner_id);
    let files = db.timed(fetch_count(db.pool(), &files_stmt)).await?;

    let active_stmt = owner_count(
        "SELECT COUNT(*) FROM reminders WHERE user_id = ? AND status = 'Active'",
        owner_id,
    );
    let active_reminders = db.timed(fetch_count(db.pool(), &active_stmt)).await?;

    let upcoming_stmt = Statement {
        sql: "SELECT * FROM reminders WHERE user_id = ? AND status = 'Active' \
              ORDER BY reminder_date IS NULL, reminder_date ASC, id ASC LIMIT ?"
            .to_string(),
        params: vec![
            SqlValue::Integer(owner_id),
            SqlValue::Integer(UPCOMING_LIMIT),
        ],
    };
    let reminders = get_schema("reminders")?;
    let upcoming_reminders = db
        .timed(fetch_all(db.pool(), &upcoming_stmt, Some(reminders)))
        .await?;

    Ok(DashboardStats {
        stats: StatsCounts {
            by_entity_type,
            files,
            active_reminders,
        },
        upcoming_reminders,
    })
}

/// Per-owner cache that bounds repeated dashboard refreshes.
#[derive(Debug)]
pub struct StatsCache {
    ttl: Duration,
    entries: Mutex<HashMap<i64, (Instant, DashboardStats)>>,
}

impl StatsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, owner_id: i64) -> Option<DashboardStats> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(&owner_id)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, stats)| stats.clone())
    }

    pub async fn get(&self, db: &Db, owner_id: i64) -> AppResult<DashboardStats> {
        if let Some(hit) = self.cached(owner_id) {
            tracing::debug!(target: "kinboard", event = "stats_cache_hit", owner_id);
            return Ok(hit);
        }
        let fresh = compute(db, owner_id).await?;
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(owner_id, (Instant::now(), fresh.clone()));
        }
        Ok(fresh)
    }

    /// Drop the owner's entry after a mutation.
    pub fn invalidate(&self, owner_id: i64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&owner_id);
        }
    }
}

impl Default for StatsCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
