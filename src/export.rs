//! Owner-scoped export in the `{entityType: Record[]}` shape.

use serde_json::{Map, Value};

use crate::db::Db;
use crate::query::{SqlValue, Statement};
use crate::repo::fetch_all;
use crate::schema::entity_types;
use crate::AppResult;

pub async fn export_all(db: &Db, owner_id: i64) -> AppResult<Map<String, Value>> {
    let mut bundle = Map::new();
    for schema in entity_types() {
        let stmt = Statement {
            sql: format!("SELECT * FROM {} WHERE user_id = ? ORDER BY id ASC", schema.name),
            params: vec![SqlValue::Integer(owner_id)],
        };
        let records = db.timed(fetch_all(db.pool(), &stmt, Some(schema))).await?;
        bundle.insert(schema.name.to_string(), Value::Array(records));
    }
    let total: usize = bundle
        .values()
        .filter_map(Value::as_array)
        .map(Vec::len)
        .sum();
    tracing::info!(target: "kinboard", event = "export_complete", owner_id, records = total);
    Ok(bundle)
}
