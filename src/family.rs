//! Display-time resolution of `family_member_id` weak references.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::db::Db;
use crate::query::{SqlValue, Statement};
use crate::repo::fetch_all;
use crate::AppResult;

pub const MEMBER_NAME_FIELD: &str = "family_member_name";

fn member_ids(records: &[Value]) -> BTreeSet<i64> {
    records
        .iter()
        .filter_map(|record| record.get("family_member_id").and_then(Value::as_i64))
        .collect()
}

async fn member_names(db: &Db, owner_id: i64, ids: &BTreeSet<i64>) -> AppResult<HashMap<i64, String>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let mut params = vec![SqlValue::Integer(owner_id)];
    params.extend(ids.iter().map(|id| SqlValue::Integer(*id)));
    let stmt = Statement {
        sql: format!(
            "SELECT id, name FROM family_members WHERE user_id = ? AND id IN ({placeholders})"
        ),
        params,
    };
    let rows = db.timed(fetch_all(db.pool(), &stmt, None)).await?;
    Ok(rows
        .iter()
        .filter_map(|row| {
            let id = row.get("id")?.as_i64()?;
            let name = row.get("name")?.as_str()?.to_string();
            Some((id, name))
        })
        .collect())
}

/// Add `family_member_name` to every record carrying a member reference.
///
/// A reference that does not resolve for this owner shows the raw id.
pub async fn resolve_member_names(db: &Db, owner_id: i64, records: &mut [Value]) -> AppResult<()> {
    let ids = member_ids(records);
    let names = member_names(db, owner_id, &ids).await?;
    for record in records.iter_mut() {
        let Some(map) = record.as_object_mut() else {
            continue;
        };
        let resolved = match map.get("family_member_id") {
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|id| names.get(&id).cloned())
                .unwrap_or_else(|| n.to_string()),
            _ => continue,
        };
        map.insert(MEMBER_NAME_FIELD.to_string(), Value::String(resolved));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collects_distinct_member_ids() {
        let records = vec![
            json!({"id": 1, "family_member_id": 4}),
            json!({"id": 2, "family_member_id": 4}),
            json!({"id": 3, "family_member_id": null}),
            json!({"id": 4}),
        ];
        assert_eq!(member_ids(&records).into_iter().collect::<Vec<_>>(), vec![4]);
    }
}
