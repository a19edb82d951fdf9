use serde_json::{Map, Value};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Executor, Row, Sqlite, TypeInfo, ValueRef};

use crate::query::{SqlValue, Statement};
use crate::schema::{EntitySchema, FieldKind};
use crate::AppResult;

pub(crate) fn bind_value<'q>(
    q: Query<'q, Sqlite, SqliteArguments<'q>>,
    v: &SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match v {
        SqlValue::Null => q.bind(Option::<i64>::None),
        SqlValue::Integer(i) => q.bind(*i),
        SqlValue::Real(f) => q.bind(*f),
        SqlValue::Text(s) => q.bind(s.clone()),
    }
}

fn prepare(stmt: &Statement) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    stmt.params
        .iter()
        .fold(sqlx::query(&stmt.sql), |q, param| bind_value(q, param))
}

fn raw_to_value(row: &SqliteRow, idx: usize) -> Value {
    let Ok(raw) = row.try_get_raw(idx) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }
    match raw.type_info().name() {
        "INTEGER" => row
            .try_get::<i64, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" => row
            .try_get::<f64, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        // Payload bytes never travel inside a record.
        "BLOB" => Value::Null,
        _ => row
            .try_get::<String, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
    }
}

/// Shape a value read from storage by the column's declared kind.
fn shape(kind: FieldKind, value: Value) -> Value {
    match (kind, value) {
        (FieldKind::Bool, Value::Number(n)) => Value::Bool(n.as_i64().unwrap_or(0) != 0),
        (FieldKind::Decimal, Value::Number(n)) => n.as_f64().map(Value::from).unwrap_or(Value::Null),
        (_, other) => other,
    }
}

pub fn row_to_value(schema: Option<&EntitySchema>, row: &SqliteRow) -> Value {
    let mut map = Map::new();
    for col in row.columns() {
        let name = col.name();
        let mut val = raw_to_value(row, col.ordinal());
        if name == "notification_sent" {
            val = shape(FieldKind::Bool, val);
        } else if let Some(column) = schema.and_then(|s| s.column(name)) {
            val = shape(column.kind, val);
        }
        map.insert(name.to_string(), val);
    }
    Value::Object(map)
}

pub async fn fetch_all<'e, E>(
    exec: E,
    stmt: &Statement,
    schema: Option<&EntitySchema>,
) -> AppResult<Vec<Value>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = prepare(stmt).fetch_all(exec).await?;
    Ok(rows.iter().map(|row| row_to_value(schema, row)).collect())
}

pub async fn fetch_optional<'e, E>(
    exec: E,
    stmt: &Statement,
    schema: Option<&EntitySchema>,
) -> AppResult<Option<Value>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = prepare(stmt).fetch_optional(exec).await?;
    Ok(row.map(|row| row_to_value(schema, &row)))
}

pub async fn fetch_count<'e, E>(exec: E, stmt: &Statement) -> AppResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = prepare(stmt).fetch_one(exec).await?;
    Ok(row.try_get::<i64, _>(0)?)
}
