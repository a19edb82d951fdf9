#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::time::Duration;

use kinboard_lib::auth::users::{self, NewUser};
use kinboard_lib::auth::{Identity, Role, TokenIssuer};
use kinboard_lib::db::{open_sqlite_pool, Db, PoolSettings, MEMORY_URL};
use kinboard_lib::migrate::apply_migrations;
use kinboard_lib::state::AppState;
use kinboard_lib::time::now_ms;
use serde_json::{Map, Value};

pub const PASSWORD: &str = "correct horse";

pub async fn memory_db() -> Db {
    let pool = open_sqlite_pool(MEMORY_URL, &PoolSettings::default())
        .await
        .expect("open sqlite::memory:");
    apply_migrations(&pool).await.expect("apply migrations");
    Db::new(pool, Duration::from_secs(5))
}

/// Insert an owner row directly; the hash is never checked.
pub async fn owner(db: &Db, username: &str) -> i64 {
    let now = now_ms();
    sqlx::query_scalar(
        "INSERT INTO users (username, email, password_hash, role, is_active, created_at, updated_at)
         VALUES (?, ?, 'unused', 'user', 1, ?, ?) RETURNING id",
    )
    .bind(username)
    .bind(format!("{username}@example.com"))
    .bind(now)
    .bind(now)
    .fetch_one(db.pool())
    .await
    .expect("insert owner")
}

/// A real account with an argon2 hash of [`PASSWORD`].
pub async fn account(db: &Db, username: &str, role: Role) -> Identity {
    users::create_user(
        db,
        &NewUser {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password: PASSWORD.to_string(),
            full_name: None,
            role,
        },
    )
    .await
    .expect("create account")
}

pub fn app_state(db: &Db) -> AppState {
    AppState::new(db.clone(), TokenIssuer::new_dev(3600))
}

pub fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

pub fn id_of(record: &Value) -> i64 {
    record["id"].as_i64().expect("record id")
}
