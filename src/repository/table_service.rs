//! Generic row access over an allow-listed set of tables.
//!
//! Rows travel as `serde_json::Value` produced by `row_to_json`, and writes
//! go through `jsonb_populate_record` so Postgres resolves column types
//! (uuid, date, numeric, boolean) from the table definition itself.

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, PgConnection, Postgres, QueryBuilder, Row};

use crate::error::AppError;

const ALLOWED_TABLES: &[&str] = &[
    "app_users",
    "expenses",
    "mid_term_bookings",
    "monthly_reconciliations",
    "ownerrez_bookings",
    "properties",
    "property_owners",
    "reconciliation_audit_log",
    "reconciliation_line_items",
    "visits",
];

/// Filter keys may carry a `__gte` / `__lte` / `__gt` / `__lt` suffix;
/// bare keys compare with equality, array values become `= ANY(...)`.
pub async fn list_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = if order_by.trim().is_empty() {
        "created_at"
    } else {
        validate_identifier(order_by)?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    if let Some(filter_map) = filters {
        for (key, value) in filter_map {
            push_filter(&mut query, key, value)?;
        }
    }
    query.push(" ORDER BY t.").push(order_name);
    query.push(if ascending { " ASC" } else { " DESC" });
    query.push(" LIMIT ").push_bind(limit.clamp(1, 5000));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(rows
        .into_iter()
        .filter_map(extract_row)
        .collect::<Vec<Value>>())
}

pub async fn get_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE t.id = ");
    match uuid::Uuid::parse_str(row_id.trim()) {
        Ok(parsed) => {
            query.push_bind(parsed);
        }
        Err(_) => {
            query.push("NULL::uuid");
        }
    }
    query.push(" LIMIT 1");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;
    row.and_then(extract_row)
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn create_row(
    pool: &sqlx::PgPool,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let mut conn = pool.acquire().await.map_err(map_db_error)?;
    create_row_tx(&mut conn, table, payload).await
}

/// Insert variant usable inside an open transaction.
pub async fn create_row_tx(
    conn: &mut PgConnection,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let keys = sorted_keys(table_name, payload)?;

    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name).push(" (");
    push_column_list(&mut query, &keys);
    query.push(") SELECT ");
    push_record_refs(&mut query, &keys);
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query
        .push(") r RETURNING row_to_json(")
        .push(table_name)
        .push(".*) AS row");

    let row = query
        .build()
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;
    row.and_then(extract_row)
        .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
}

pub async fn update_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let mut conn = pool.acquire().await.map_err(map_db_error)?;
    update_row_tx(&mut conn, table, row_id, payload).await
}

/// Update variant usable inside an open transaction.
pub async fn update_row_tx(
    conn: &mut PgConnection,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let keys = sorted_keys(table_name, payload)?;
    let row_uuid = uuid::Uuid::parse_str(row_id.trim())
        .map_err(|_| AppError::BadRequest(format!("Invalid {table_name} id.")))?;

    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(key.as_str());
            separated.push_unseparated(" = r.");
            separated.push_unseparated(key.as_str());
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query.push(") r WHERE t.id = ").push_bind(row_uuid);
    query.push(" RETURNING row_to_json(t) AS row");

    let row = query
        .build()
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;
    row.and_then(extract_row)
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn delete_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
) -> Result<Value, AppError> {
    let existing = get_row(pool, table, row_id).await?;
    let table_name = validate_table(table)?;
    let row_uuid = uuid::Uuid::parse_str(row_id.trim())
        .map_err(|_| AppError::BadRequest(format!("Invalid {table_name} id.")))?;

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" WHERE id = ").push_bind(row_uuid);
    query.build().execute(pool).await.map_err(map_db_error)?;
    Ok(existing)
}

fn sorted_keys(table_name: &str, payload: &Map<String, Value>) -> Result<Vec<String>, AppError> {
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "No fields provided for {table_name}."
        )));
    }
    let mut keys = payload.keys().cloned().collect::<Vec<_>>();
    keys.sort_unstable();
    for key in &keys {
        validate_identifier(key)?;
    }
    Ok(keys)
}

fn push_column_list(query: &mut QueryBuilder<Postgres>, keys: &[String]) {
    let mut separated = query.separated(", ");
    for key in keys {
        separated.push(key.as_str());
    }
}

fn push_record_refs(query: &mut QueryBuilder<Postgres>, keys: &[String]) {
    let mut separated = query.separated(", ");
    for key in keys {
        separated.push("r.");
        separated.push_unseparated(key.as_str());
    }
}

#[derive(Debug, Clone, Copy)]
enum Comparison {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => " = ",
            Self::Gt => " > ",
            Self::Gte => " >= ",
            Self::Lt => " < ",
            Self::Lte => " <= ",
        }
    }
}

fn split_filter_key(filter_key: &str) -> Result<(&str, Comparison), AppError> {
    if let Some((column, suffix)) = filter_key.rsplit_once("__") {
        let comparison = match suffix {
            "gt" => Some(Comparison::Gt),
            "gte" => Some(Comparison::Gte),
            "lt" => Some(Comparison::Lt),
            "lte" => Some(Comparison::Lte),
            _ => None,
        };
        if let Some(comparison) = comparison {
            return Ok((validate_identifier(column)?, comparison));
        }
    }
    Ok((validate_identifier(filter_key)?, Comparison::Eq))
}

fn push_filter(
    query: &mut QueryBuilder<Postgres>,
    filter_key: &str,
    value: &Value,
) -> Result<(), AppError> {
    let (column, comparison) = split_filter_key(filter_key)?;

    match value {
        Value::Null => Ok(()),
        Value::Array(items) => {
            if items.is_empty() {
                return Ok(());
            }
            if !matches!(comparison, Comparison::Eq) {
                return Err(AppError::BadRequest(format!(
                    "Filter '{filter_key}' does not support array values."
                )));
            }
            query.push(" AND t.").push(column);
            if is_uuid_column(column) {
                let mut ids = Vec::with_capacity(items.len());
                for item in items {
                    let parsed = item
                        .as_str()
                        .and_then(|text| uuid::Uuid::parse_str(text.trim()).ok())
                        .ok_or_else(|| {
                            AppError::BadRequest(format!("Filter '{filter_key}' expects uuids."))
                        })?;
                    ids.push(parsed);
                }
                query.push(" = ANY(").push_bind(ids).push(")");
            } else {
                let texts = items
                    .iter()
                    .map(render_text)
                    .collect::<Vec<String>>();
                query
                    .push("::text = ANY(")
                    .push_bind(texts)
                    .push(")");
            }
            Ok(())
        }
        _ => {
            query.push(" AND ");
            push_scalar(query, column, comparison, value);
            Ok(())
        }
    }
}

fn push_scalar(
    query: &mut QueryBuilder<Postgres>,
    column: &str,
    comparison: Comparison,
    value: &Value,
) {
    query.push("t.").push(column);
    let op = comparison.sql();
    match value {
        Value::Bool(flag) => {
            query.push(op).push_bind(*flag);
        }
        Value::Number(number) => {
            if let Some(as_i64) = number.as_i64() {
                query.push(op).push_bind(as_i64);
            } else {
                query.push(op).push_bind(number.as_f64().unwrap_or(0.0));
            }
        }
        Value::String(text) => {
            let trimmed = text.trim();
            if is_uuid_column(column) {
                if let Ok(parsed) = uuid::Uuid::parse_str(trimmed) {
                    query.push(op).push_bind(parsed);
                    return;
                }
            }
            if is_date_column(column) {
                if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                    query.push(op).push_bind(parsed);
                    return;
                }
            }
            if is_timestamp_column(column) {
                if let Ok(parsed) = DateTime::<FixedOffset>::parse_from_rfc3339(trimmed) {
                    query.push(op).push_bind(parsed);
                    return;
                }
            }
            query.push("::text").push(op).push_bind(text.clone());
        }
        _ => {
            query.push("::text").push(op).push_bind(value.to_string());
        }
    }
}

fn render_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn extract_row(row: PgRow) -> Option<Value> {
    row.try_get::<Option<Value>, _>("row").ok().flatten()
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    let starts_alpha = trimmed
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_lowercase());
    let valid_chars = trimmed.chars().all(|character| {
        character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
    });
    if trimmed.is_empty() || !starts_alpha || !valid_chars {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    Ok(trimmed)
}

fn is_uuid_column(column: &str) -> bool {
    column == "id" || column.ends_with("_id") || column.ends_with("_by")
}

fn is_date_column(column: &str) -> bool {
    column.ends_with("_date")
        || matches!(column, "month" | "check_in" | "check_out" | "start_date" | "end_date")
}

fn is_timestamp_column(column: &str) -> bool {
    column.ends_with("_at")
}

fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");
    if message.contains("23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    AppError::Dependency("Database operation failed.".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};
    use sqlx::{Postgres, QueryBuilder};

    use super::{push_filter, split_filter_key, validate_identifier, validate_table, Comparison};

    #[test]
    fn allow_list_covers_billing_tables_only() {
        assert!(validate_table("monthly_reconciliations").is_ok());
        assert!(validate_table("reconciliation_line_items").is_ok());
        assert!(validate_table("ownerrez_bookings").is_ok());
        assert!(validate_table("pg_catalog").is_err());
        assert!(validate_table("users; DROP TABLE x").is_err());
    }

    #[test]
    fn rejects_hostile_identifiers() {
        assert!(validate_identifier("expense_date").is_ok());
        assert!(validate_identifier("1st_column").is_err());
        assert!(validate_identifier("a-b").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn splits_comparison_suffixes() {
        let (column, comparison) = split_filter_key("expense_date__gte").unwrap();
        assert_eq!(column, "expense_date");
        assert!(matches!(comparison, Comparison::Gte));

        let (column, comparison) = split_filter_key("status").unwrap();
        assert_eq!(column, "status");
        assert!(matches!(comparison, Comparison::Eq));
    }

    #[test]
    fn builds_typed_filter_sql() {
        let mut query =
            QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM expenses t WHERE 1=1");
        let mut filters = Map::new();
        filters.insert(
            "property_id".to_string(),
            Value::String("550e8400-e29b-41d4-a716-446655440000".to_string()),
        );
        filters.insert("exported".to_string(), Value::Bool(false));
        filters.insert(
            "expense_date__gte".to_string(),
            Value::String("2026-01-01".to_string()),
        );
        for (key, value) in &filters {
            push_filter(&mut query, key, value).unwrap();
        }
        let sql = query.sql();
        assert!(sql.contains("t.property_id = "), "got: {sql}");
        assert!(sql.contains("t.exported = "), "got: {sql}");
        assert!(sql.contains("t.expense_date >= "), "got: {sql}");
    }

    #[test]
    fn array_filters_refuse_comparison_suffixes() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 WHERE 1=1");
        let result = push_filter(
            &mut query,
            "amount__gte",
            &Value::Array(vec![json!(1), json!(2)]),
        );
        assert!(result.is_err());
    }
}
