//! Import of an exported `{entityType: Record[]}` bundle.
//!
//! Records are validated exactly like API writes. Rejected records are
//! reported and skipped; everything accepted is inserted in one transaction.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};

use crate::audit::{self, AuditAction};
use crate::commands::prepare_insert;
use crate::db::{run_in_tx, Db};
use crate::query::Statement;
use crate::repo::fetch_optional;
use crate::schema::get_schema;
use crate::security::error_map::public_message;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRecord {
    pub entity_type: String,
    /// Position in the submitted array; absent when the whole type was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: BTreeMap<String, usize>,
    pub skipped: Vec<SkippedRecord>,
}

#[derive(Debug, Default)]
pub struct ImportPlan {
    pub inserts: Vec<(&'static str, Statement)>,
    pub skipped: Vec<SkippedRecord>,
}

fn skip(entity_type: &str, index: Option<usize>, error: impl Into<String>) -> SkippedRecord {
    SkippedRecord {
        entity_type: entity_type.to_string(),
        index,
        error: error.into(),
    }
}

/// Validate every record and build its insert. Touches no storage.
pub fn build_plan(owner_id: i64, bundle: &Value) -> AppResult<ImportPlan> {
    let types = bundle.as_object().ok_or_else(|| {
        AppError::invalid_field("body", "expected an object keyed by entity type")
    })?;
    let mut plan = ImportPlan::default();
    for (entity_type, records) in types {
        let schema = match get_schema(entity_type) {
            Ok(schema) => schema,
            Err(err) => {
                plan.skipped.push(skip(entity_type, None, public_message(&err)));
                continue;
            }
        };
        let Some(records) = records.as_array() else {
            plan.skipped.push(skip(entity_type, None, "expected an array of records"));
            continue;
        };
        for (index, record) in records.iter().enumerate() {
            let Some(fields) = record.as_object() else {
                plan.skipped.push(skip(entity_type, Some(index), "expected an object"));
                continue;
            };
            match prepare_insert(schema, owner_id, fields) {
                Ok((stmt, _)) => plan.inserts.push((schema.name, stmt)),
                Err(err) => plan.skipped.push(skip(entity_type, Some(index), public_message(&err))),
            }
        }
    }
    Ok(plan)
}

pub async fn execute_plan(db: &Db, owner_id: i64, plan: ImportPlan) -> AppResult<ImportReport> {
    let ImportPlan { inserts, skipped } = plan;
    let imported = db
        .timed(run_in_tx(db.pool(), move |tx| {
            Box::pin(async move {
                let mut imported: BTreeMap<String, usize> = BTreeMap::new();
                for (table, stmt) in &inserts {
                    fetch_optional(&mut **tx, stmt, None).await?;
                    *imported.entry(table.to_string()).or_default() += 1;
                }
                Ok::<_, AppError>(imported)
            })
        }))
        .await?;
    for (table, count) in &imported {
        audit::record(
            db,
            owner_id,
            AuditAction::Create,
            table,
            "import",
            Some(&json!({ "imported": count })),
        )
        .await;
    }
    tracing::info!(
        target: "kinboard",
        event = "import_complete",
        owner_id,
        imported = imported.values().sum::<usize>(),
        skipped = skipped.len()
    );
    Ok(ImportReport { imported, skipped })
}

pub async fn import_all(db: &Db, owner_id: i64, bundle: &Value) -> AppResult<ImportReport> {
    let plan = build_plan(owner_id, bundle)?;
    execute_plan(db, owner_id, plan).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_reports_unknown_types_and_invalid_records() {
        let bundle = json!({
            "properties": [
                {"id": 4, "user_id": 99, "created_at": 1, "updated_at": 2, "name": "Villa A"},
                {"property_value": 10},
                "not a record"
            ],
            "spaceships": [{"name": "x"}],
            "loans": {"name": "not an array"}
        });
        let plan = build_plan(1, &bundle).unwrap();
        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.inserts[0].0, "properties");
        assert!(!plan.inserts[0].1.sql.contains("created_at, created_at"));

        let skipped: Vec<_> = plan
            .skipped
            .iter()
            .map(|s| (s.entity_type.as_str(), s.index))
            .collect();
        assert!(skipped.contains(&("properties", Some(1))));
        assert!(skipped.contains(&("properties", Some(2))));
        assert!(skipped.contains(&("spaceships", None)));
        assert!(skipped.contains(&("loans", None)));
    }

    #[test]
    fn non_object_bundle_is_rejected() {
        let err = build_plan(1, &json!([1, 2])).unwrap_err();
        assert_eq!(err.code(), AppError::INVALID_FIELD);
    }
}
