use serde::Serialize;
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::audit::{self, AuditAction};
use crate::db::{run_in_tx, Db};
use crate::op_log::LogScope;
use crate::query::{
    build_count, build_delete, build_get, build_insert, build_list, build_update, ListQuery,
    Statement,
};
use crate::repo::{fetch_all, fetch_count, fetch_optional};
use crate::schema::{get_schema, is_present, is_read_only, EntitySchema};
use crate::time::now_ms;
use crate::{AppError, AppResult};

/// One page of records plus the totals for the whole filtered set.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct RecordPage {
    #[ts(type = "Array<Record<string, unknown>>")]
    pub records: Vec<Value>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
}

/// Check a client payload against the schema and normalise every value.
///
/// Read-only keys are dropped so a record read from the API can be sent back
/// as-is. Any other key outside the schema is rejected. On create a `null`
/// for a defaulted column is dropped so storage applies its default.
pub fn validate_payload(
    schema: &EntitySchema,
    payload: &Map<String, Value>,
    mode: WriteMode,
) -> AppResult<Map<String, Value>> {
    let mut out = Map::new();
    for (key, raw) in payload {
        if is_read_only(key) {
            continue;
        }
        let column = schema.column(key).ok_or_else(|| {
            AppError::new(AppError::UNKNOWN_FIELD, format!("Unknown field: {key}"))
                .with_context("field", key.clone())
        })?;
        let value = column.coerce(raw)?;
        if column.required && !is_present(&value) {
            return Err(AppError::missing_field(column.name));
        }
        if value.is_null() && !column.nullable {
            match mode {
                WriteMode::Create => continue,
                WriteMode::Update => {
                    return Err(AppError::invalid_field(column.name, "cannot be cleared"))
                }
            }
        }
        out.insert(key.clone(), value);
    }
    if mode == WriteMode::Create {
        if let Some(missing) = schema.required_fields().find(|name| !out.contains_key(*name)) {
            return Err(AppError::missing_field(missing));
        }
    }
    Ok(out)
}

/// Validated insert statement, shared with the importer's transaction.
pub fn prepare_insert(
    schema: &EntitySchema,
    owner_id: i64,
    payload: &Map<String, Value>,
) -> AppResult<(Statement, Map<String, Value>)> {
    let fields = validate_payload(schema, payload, WriteMode::Create)?;
    Ok((build_insert(schema, owner_id, &fields, now_ms()), fields))
}

pub(crate) fn record_id(record: &Value) -> String {
    match record.get("id") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

fn no_row_returned(schema: &EntitySchema) -> AppError {
    AppError::new("RECORD/WRITE_EMPTY", "Write returned no row")
        .with_context("entity_type", schema.name)
}

async fn list(db: &Db, entity_type: &str, owner_id: i64, query: &ListQuery) -> AppResult<RecordPage> {
    let schema = get_schema(entity_type)?;
    let count = build_count(schema, owner_id, query.search.as_deref());
    let total = db.timed(fetch_count(db.pool(), &count)).await?;
    let stmt = build_list(schema, owner_id, query);
    let records = db.timed(fetch_all(db.pool(), &stmt, Some(schema))).await?;
    Ok(RecordPage {
        records,
        page: query.page.page,
        page_size: query.page.page_size,
        total,
        total_pages: query.page.total_pages(total),
    })
}

async fn get(db: &Db, entity_type: &str, owner_id: i64, id: i64) -> AppResult<Value> {
    let schema = get_schema(entity_type)?;
    let stmt = build_get(schema, owner_id, id);
    db.timed(fetch_optional(db.pool(), &stmt, Some(schema)))
        .await?
        .ok_or_else(|| AppError::not_found("Record"))
}

async fn create(
    db: &Db,
    entity_type: &str,
    owner_id: i64,
    payload: &Map<String, Value>,
) -> AppResult<Value> {
    let schema = get_schema(entity_type)?;
    let (stmt, fields) = prepare_insert(schema, owner_id, payload)?;
    let record = db
        .timed(fetch_optional(db.pool(), &stmt, Some(schema)))
        .await?
        .ok_or_else(|| no_row_returned(schema))?;
    audit::record(
        db,
        owner_id,
        AuditAction::Create,
        schema.name,
        &record_id(&record),
        Some(&Value::Object(fields)),
    )
    .await;
    Ok(record)
}

async fn update(
    db: &Db,
    entity_type: &str,
    owner_id: i64,
    id: i64,
    payload: &Map<String, Value>,
) -> AppResult<Value> {
    let schema = get_schema(entity_type)?;
    let fields = validate_payload(schema, payload, WriteMode::Update)?;
    let stmt = build_update(schema, owner_id, id, &fields, now_ms());
    let record = db
        .timed(fetch_optional(db.pool(), &stmt, Some(schema)))
        .await?
        .ok_or_else(|| AppError::not_found("Record"))?;
    audit::record(
        db,
        owner_id,
        AuditAction::Update,
        schema.name,
        &id.to_string(),
        Some(&Value::Object(fields)),
    )
    .await;
    Ok(record)
}

async fn delete(db: &Db, entity_type: &str, owner_id: i64, id: i64) -> AppResult<()> {
    let schema = get_schema(entity_type)?;
    let stmt = build_delete(schema, owner_id, id);
    let table = schema.name;
    db.timed(run_in_tx(db.pool(), move |tx| {
        Box::pin(async move {
            fetch_optional(&mut **tx, &stmt, None)
                .await?
                .ok_or_else(|| AppError::not_found("Record"))?;
            sqlx::query(
                "DELETE FROM attachments WHERE entity_type = ? AND entity_id = ? AND user_id = ?",
            )
            .bind(table)
            .bind(id)
            .bind(owner_id)
            .execute(&mut **tx)
            .await?;
            Ok::<_, AppError>(())
        })
    }))
    .await?;
    audit::record(db, owner_id, AuditAction::Delete, table, &id.to_string(), None).await;
    Ok(())
}

pub async fn list_command(
    db: &Db,
    entity_type: &str,
    owner_id: i64,
    query: &ListQuery,
) -> AppResult<RecordPage> {
    let scope = LogScope::new("records", "list", entity_type, owner_id);
    let result = list(db, entity_type, owner_id, query)
        .await
        .map_err(|err| err.with_context("owner_id", owner_id.to_string()));
    scope.finish(result, |page| page.records.len())
}

pub async fn get_command(db: &Db, entity_type: &str, owner_id: i64, id: i64) -> AppResult<Value> {
    let scope = LogScope::new("records", "get", entity_type, owner_id);
    let result = get(db, entity_type, owner_id, id).await.map_err(|err| {
        err.with_context("owner_id", owner_id.to_string())
            .with_context("id", id.to_string())
    });
    scope.finish(result, |_| 1)
}

pub async fn create_command(
    db: &Db,
    entity_type: &str,
    owner_id: i64,
    payload: &Map<String, Value>,
) -> AppResult<Value> {
    let scope = LogScope::new("records", "create", entity_type, owner_id);
    let result = create(db, entity_type, owner_id, payload)
        .await
        .map_err(|err| err.with_context("owner_id", owner_id.to_string()));
    scope.finish(result, |_| 1)
}

pub async fn update_command(
    db: &Db,
    entity_type: &str,
    owner_id: i64,
    id: i64,
    payload: &Map<String, Value>,
) -> AppResult<Value> {
    let scope = LogScope::new("records", "update", entity_type, owner_id);
    let result = update(db, entity_type, owner_id, id, payload)
        .await
        .map_err(|err| {
            err.with_context("owner_id", owner_id.to_string())
                .with_context("id", id.to_string())
        });
    scope.finish(result, |_| 1)
}

pub async fn delete_command(db: &Db, entity_type: &str, owner_id: i64, id: i64) -> AppResult<()> {
    let scope = LogScope::new("records", "delete", entity_type, owner_id);
    let result = delete(db, entity_type, owner_id, id).await.map_err(|err| {
        err.with_context("owner_id", owner_id.to_string())
            .with_context("id", id.to_string())
    });
    scope.finish(result, |_| 1)
}
