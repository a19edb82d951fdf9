//! Pure statement builders for the generic entity tables.
//!
//! Nothing here touches the database. Every column name written into SQL text
//! comes from an [`EntitySchema`]; payload keys only select which of those
//! columns take part.

use serde_json::{Map, Value};

use crate::schema::EntitySchema;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 500;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<&Value> for SqlValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(*b as i64),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    SqlValue::Real(f)
                } else {
                    SqlValue::Null
                }
            }
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

/// SQL text plus its positional parameters, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Normalised pagination window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub page_size: i64,
}

impl Page {
    /// Non-positive or missing values fall back to page 1 and the default size.
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        let page = page.filter(|p| *p >= 1).unwrap_or(1);
        let page_size = page_size
            .filter(|size| *size >= 1)
            .map(|size| size.min(MAX_PAGE_SIZE))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        Page { page, page_size }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    pub fn total_pages(&self, total: i64) -> i64 {
        if total <= 0 {
            0
        } else {
            (total + self.page_size - 1) / self.page_size
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new(None, None)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub search: Option<String>,
    pub page: Page,
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

/// Owner predicate plus the optional search filter shared by list and count.
fn owner_filter(schema: &EntitySchema, owner_id: i64, search: Option<&str>) -> Statement {
    let mut sql = String::from("user_id = ?");
    let mut params = vec![SqlValue::Integer(owner_id)];
    let term = search.map(str::trim).filter(|term| !term.is_empty());
    if let Some(term) = term {
        let columns = schema.nameable_columns();
        if !columns.is_empty() {
            let pattern = escape_like(term);
            // SQLite LIKE folds ASCII case only; other letters match exactly.
            let clauses: Vec<String> = columns
                .iter()
                .map(|column| format!("{column} LIKE ? ESCAPE '\\'"))
                .collect();
            sql.push_str(&format!(" AND ({})", clauses.join(" OR ")));
            params.extend(columns.iter().map(|_| SqlValue::Text(pattern.clone())));
        }
    }
    Statement { sql, params }
}

pub fn build_list(schema: &EntitySchema, owner_id: i64, query: &ListQuery) -> Statement {
    let filter = owner_filter(schema, owner_id, query.search.as_deref());
    let mut params = filter.params;
    params.push(SqlValue::Integer(query.page.page_size));
    params.push(SqlValue::Integer(query.page.offset()));
    Statement {
        sql: format!(
            "SELECT * FROM {} WHERE {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            schema.name, filter.sql
        ),
        params,
    }
}

pub fn build_count(schema: &EntitySchema, owner_id: i64, search: Option<&str>) -> Statement {
    let filter = owner_filter(schema, owner_id, search);
    Statement {
        sql: format!("SELECT COUNT(*) FROM {} WHERE {}", schema.name, filter.sql),
        params: filter.params,
    }
}

pub fn build_get(schema: &EntitySchema, owner_id: i64, id: i64) -> Statement {
    Statement {
        sql: format!("SELECT * FROM {} WHERE id = ? AND user_id = ?", schema.name),
        params: vec![SqlValue::Integer(id), SqlValue::Integer(owner_id)],
    }
}

/// Schema columns supplied in the payload, in schema order.
fn supplied<'a>(
    schema: &EntitySchema,
    payload: &'a Map<String, Value>,
) -> Vec<(&'static str, &'a Value)> {
    schema
        .columns
        .iter()
        .filter_map(|column| payload.get(column.name).map(|value| (column.name, value)))
        .collect()
}

pub fn build_insert(
    schema: &EntitySchema,
    owner_id: i64,
    payload: &Map<String, Value>,
    now_ms: i64,
) -> Statement {
    let fields = supplied(schema, payload);
    let mut columns = vec!["user_id"];
    let mut params = vec![SqlValue::Integer(owner_id)];
    for (name, value) in &fields {
        columns.push(*name);
        params.push(SqlValue::from(*value));
    }
    columns.push("created_at");
    columns.push("updated_at");
    params.push(SqlValue::Integer(now_ms));
    params.push(SqlValue::Integer(now_ms));
    let placeholders = vec!["?"; columns.len()].join(", ");
    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            schema.name,
            columns.join(", "),
            placeholders
        ),
        params,
    }
}

pub fn build_update(
    schema: &EntitySchema,
    owner_id: i64,
    id: i64,
    payload: &Map<String, Value>,
    now_ms: i64,
) -> Statement {
    let fields = supplied(schema, payload);
    let mut assignments: Vec<String> = fields
        .iter()
        .map(|(name, _)| format!("{name} = ?"))
        .collect();
    let mut params: Vec<SqlValue> = fields.iter().map(|(_, value)| SqlValue::from(*value)).collect();
    // Strictly increasing even when two writes land in the same millisecond.
    assignments.push("updated_at = MAX(?, updated_at + 1)".to_string());
    params.push(SqlValue::Integer(now_ms));
    params.push(SqlValue::Integer(id));
    params.push(SqlValue::Integer(owner_id));
    Statement {
        sql: format!(
            "UPDATE {} SET {} WHERE id = ? AND user_id = ? RETURNING *",
            schema.name,
            assignments.join(", ")
        ),
        params,
    }
}

pub fn build_delete(schema: &EntitySchema, owner_id: i64, id: i64) -> Statement {
    Statement {
        sql: format!(
            "DELETE FROM {} WHERE id = ? AND user_id = ? RETURNING id",
            schema.name
        ),
        params: vec![SqlValue::Integer(id), SqlValue::Integer(owner_id)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{get_schema, SERVER_MANAGED};
    use proptest::prelude::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn insert_columns(sql: &str) -> Vec<String> {
        let start = sql.find('(').unwrap() + 1;
        let end = sql.find(')').unwrap();
        sql[start..end].split(", ").map(str::to_string).collect()
    }

    #[test]
    fn list_filters_by_owner_and_orders_newest_first() {
        let schema = get_schema("properties").unwrap();
        let stmt = build_list(schema, 7, &ListQuery::default());
        assert_eq!(
            stmt.sql,
            "SELECT * FROM properties WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        );
        assert_eq!(
            stmt.params,
            vec![SqlValue::Integer(7), SqlValue::Integer(50), SqlValue::Integer(0)]
        );
    }

    #[test]
    fn search_ors_across_nameable_columns() {
        let schema = get_schema("shareholdings").unwrap();
        let query = ListQuery {
            search: Some("50%_off".into()),
            page: Page::new(Some(3), Some(10)),
        };
        let stmt = build_list(schema, 1, &query);
        assert!(stmt.sql.contains(
            "AND (holder_name LIKE ? ESCAPE '\\' OR company_name LIKE ? ESCAPE '\\')"
        ));
        assert_eq!(stmt.params[1], SqlValue::Text("%50\\%\\_off%".into()));
        assert_eq!(stmt.params[2], stmt.params[1]);
        assert_eq!(stmt.params[3], SqlValue::Integer(10));
        assert_eq!(stmt.params[4], SqlValue::Integer(20));
    }

    #[test]
    fn search_is_ignored_without_nameable_columns() {
        let schema = get_schema("cards").unwrap();
        let stmt = build_count(schema, 1, Some("visa"));
        assert_eq!(stmt.sql, "SELECT COUNT(*) FROM cards WHERE user_id = ?");
        assert_eq!(stmt.params.len(), 1);
    }

    #[test]
    fn insert_injects_owner_and_drops_unknown_keys() {
        let schema = get_schema("properties").unwrap();
        let body = payload(json!({
            "name": "Villa A",
            "user_id": 99,
            "property_value": 5_000_000,
            "name) VALUES (1); DROP TABLE users; --": "x"
        }));
        let stmt = build_insert(schema, 1, &body, 1_000);
        assert_eq!(
            stmt.sql,
            "INSERT INTO properties (user_id, name, property_value, created_at, updated_at) VALUES (?, ?, ?, ?, ?) RETURNING *"
        );
        assert_eq!(stmt.params[0], SqlValue::Integer(1));
        assert_eq!(stmt.params[1], SqlValue::Text("Villa A".into()));
    }

    #[test]
    fn update_sets_only_supplied_columns_and_bumps_updated_at() {
        let schema = get_schema("properties").unwrap();
        let body = payload(json!({"property_value": 5_200_000, "id": 3}));
        let stmt = build_update(schema, 1, 3, &body, 2_000);
        assert_eq!(
            stmt.sql,
            "UPDATE properties SET property_value = ?, updated_at = MAX(?, updated_at + 1) WHERE id = ? AND user_id = ? RETURNING *"
        );
        assert_eq!(
            stmt.params,
            vec![
                SqlValue::Integer(5_200_000),
                SqlValue::Integer(2_000),
                SqlValue::Integer(3),
                SqlValue::Integer(1)
            ]
        );
    }

    #[test]
    fn empty_update_still_refreshes_timestamp() {
        let schema = get_schema("loans").unwrap();
        let stmt = build_update(schema, 1, 3, &Map::new(), 5);
        assert!(stmt.sql.starts_with("UPDATE loans SET updated_at = MAX(?, updated_at + 1) WHERE"));
    }

    #[test]
    fn get_and_delete_require_owner() {
        let schema = get_schema("loans").unwrap();
        let get = build_get(schema, 2, 9);
        assert!(get.sql.ends_with("WHERE id = ? AND user_id = ?"));
        let delete = build_delete(schema, 2, 9);
        assert_eq!(
            delete.sql,
            "DELETE FROM loans WHERE id = ? AND user_id = ? RETURNING id"
        );
        assert_eq!(delete.params, vec![SqlValue::Integer(9), SqlValue::Integer(2)]);
    }

    #[test]
    fn page_defaults_and_clamps() {
        assert_eq!(Page::new(None, None), Page { page: 1, page_size: 50 });
        assert_eq!(Page::new(Some(0), Some(-3)), Page { page: 1, page_size: 50 });
        assert_eq!(Page::new(Some(2), Some(10_000)).page_size, MAX_PAGE_SIZE);
        assert_eq!(Page::new(None, None).total_pages(0), 0);
    }

    proptest! {
        #[test]
        fn arbitrary_payload_keys_never_reach_sql(
            keys in proptest::collection::vec("[a-z_;() '\\-]{1,16}", 0..12)
        ) {
            let schema = get_schema("assets").unwrap();
            let mut body = Map::new();
            for key in &keys {
                body.insert(key.clone(), json!("v"));
            }
            let stmt = build_insert(schema, 1, &body, 0);
            for column in insert_columns(&stmt.sql) {
                prop_assert!(
                    schema.has_column(&column) || SERVER_MANAGED.contains(&column.as_str()),
                    "unexpected column {column}"
                );
            }
            let update = build_update(schema, 1, 1, &body, 0);
            prop_assert_eq!(update.params.len(), stmt.params.len());
        }

        #[test]
        fn pages_partition_the_dataset(total in 0i64..400, size in 1i64..60) {
            let first = Page::new(Some(1), Some(size));
            let pages = first.total_pages(total);
            prop_assert_eq!(pages, (total + size - 1) / size);
            let mut seen = 0i64;
            for number in 1..=pages {
                let page = Page::new(Some(number), Some(size));
                prop_assert_eq!(page.offset(), seen);
                let rows = (total - page.offset()).clamp(0, size);
                if number == pages {
                    let expected = if total % size == 0 { size } else { total % size };
                    prop_assert_eq!(rows, expected);
                } else {
                    prop_assert_eq!(rows, size);
                }
                seen += rows;
            }
            prop_assert_eq!(seen, total);
        }
    }
}
