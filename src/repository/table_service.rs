use chrono::{DateTime, FixedOffset, NaiveDate};
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, Executor, PgPool, Postgres, QueryBuilder, Row, Transaction};

use crate::error::AppError;

const ALLOWED_TABLES: &[&str] = &[
    "bills",
    "contract_tenants",
    "contracts",
    "meter_readings",
    "residency_records",
    "rooms",
    "tenants",
    "users",
];

/// Tables carrying an `updated_at` column refreshed on every update.
const TIMESTAMPED_TABLES: &[&str] = &[
    "bills",
    "contracts",
    "meter_readings",
    "residency_records",
    "rooms",
    "tenants",
    "users",
];

/// Case-insensitive substring match over a set of text columns.
#[derive(Debug, Clone, Copy)]
pub struct TextSearch<'a> {
    pub columns: &'a [&'a str],
    pub term: &'a str,
}

pub async fn begin(pool: &PgPool) -> Result<Transaction<'static, Postgres>, AppError> {
    pool.begin().await.map_err(map_db_error)
}

pub async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), AppError> {
    tx.commit().await.map_err(map_db_error)
}

pub async fn list_rows<'c, E>(
    executor: E,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    offset: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError>
where
    E: Executor<'c, Database = Postgres>,
{
    let mut query = select_query(table, filters, None, order_by, ascending)?;
    query
        .push(" LIMIT ")
        .push_bind(limit.clamp(1, 5000))
        .push(" OFFSET ")
        .push_bind(offset.max(0));

    let rows = query
        .build()
        .fetch_all(executor)
        .await
        .map_err(map_db_error)?;
    Ok(read_rows(rows))
}

/// One page of rows plus the total number of matching rows.
#[allow(clippy::too_many_arguments)]
pub async fn list_page(
    pool: &PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    search: Option<TextSearch<'_>>,
    page: i64,
    per_page: i64,
    order_by: &str,
    ascending: bool,
) -> Result<(Vec<Value>, i64), AppError> {
    let mut count = count_query(table, filters, search)?;
    let total = count
        .build()
        .fetch_one(pool)
        .await
        .map_err(map_db_error)?
        .try_get::<i64, _>("total")
        .unwrap_or(0);

    let per_page = per_page.max(1);
    let mut query = select_query(table, filters, search, order_by, ascending)?;
    query
        .push(" LIMIT ")
        .push_bind(per_page)
        .push(" OFFSET ")
        .push_bind((page.max(1) - 1) * per_page);

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok((read_rows(rows), total))
}

pub async fn find_row<'c, E>(
    executor: E,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Option<Value>, AppError>
where
    E: Executor<'c, Database = Postgres>,
{
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE ");
    push_scalar_filter(
        &mut query,
        id_name,
        FilterOperator::Eq,
        &infer_scalar_filter(id_name, &Value::String(row_id.to_string())),
    );
    query.push(" LIMIT 1");

    let row = query
        .build()
        .fetch_optional(executor)
        .await
        .map_err(map_db_error)?;
    Ok(row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten()))
}

pub async fn create_row<'c, E>(
    executor: E,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError>
where
    E: Executor<'c, Database = Postgres>,
{
    let mut query = insert_query(table, payload)?;
    let table_name = validate_table(table)?;

    let row = query
        .build()
        .fetch_optional(executor)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
}

pub async fn update_row<'c, E>(
    executor: E,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
    id_field: &str,
) -> Result<Value, AppError>
where
    E: Executor<'c, Database = Postgres>,
{
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = update_query(table_name, payload)?;
    query.push(" WHERE ");
    push_scalar_filter(
        &mut query,
        id_name,
        FilterOperator::Eq,
        &infer_scalar_filter(id_name, &Value::String(row_id.to_string())),
    );
    query.push(" RETURNING row_to_json(t) AS row");

    let row = query
        .build()
        .fetch_optional(executor)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

/// Applies the same patch to every row matching `filters`.
pub async fn update_rows<'c, E>(
    executor: E,
    table: &str,
    filters: &Map<String, Value>,
    payload: &Map<String, Value>,
) -> Result<Vec<Value>, AppError>
where
    E: Executor<'c, Database = Postgres>,
{
    let table_name = validate_table(table)?;
    if filters.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Refusing to update every {table_name} record."
        )));
    }

    let mut query = update_query(table_name, payload)?;
    query.push(" WHERE 1=1");
    for (key, value) in filters {
        push_filter_clause(&mut query, key, value)?;
    }
    query.push(" RETURNING row_to_json(t) AS row");

    let rows = query
        .build()
        .fetch_all(executor)
        .await
        .map_err(map_db_error)?;
    Ok(read_rows(rows))
}

pub async fn delete_row<'c, E>(
    executor: E,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError>
where
    E: Executor<'c, Database = Postgres>,
{
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" t WHERE ");
    push_scalar_filter(
        &mut query,
        id_name,
        FilterOperator::Eq,
        &infer_scalar_filter(id_name, &Value::String(row_id.to_string())),
    );
    query.push(" RETURNING row_to_json(t) AS row");

    let row = query
        .build()
        .fetch_optional(executor)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

/// Deletes every row matching `filters` and returns the number removed.
pub async fn delete_rows<'c, E>(
    executor: E,
    table: &str,
    filters: &Map<String, Value>,
) -> Result<u64, AppError>
where
    E: Executor<'c, Database = Postgres>,
{
    let table_name = validate_table(table)?;
    if filters.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Refusing to delete every {table_name} record."
        )));
    }

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    for (key, value) in filters {
        push_filter_clause(&mut query, key, value)?;
    }

    let result = query
        .build()
        .execute(executor)
        .await
        .map_err(map_db_error)?;
    Ok(result.rows_affected())
}

pub async fn count_rows<'c, E>(
    executor: E,
    table: &str,
    filters: Option<&Map<String, Value>>,
) -> Result<i64, AppError>
where
    E: Executor<'c, Database = Postgres>,
{
    let mut query = count_query(table, filters, None)?;
    let row = query
        .build()
        .fetch_one(executor)
        .await
        .map_err(map_db_error)?;

    Ok(row.try_get::<i64, _>("total").unwrap_or(0))
}

fn select_query(
    table: &str,
    filters: Option<&Map<String, Value>>,
    search: Option<TextSearch<'_>>,
    order_by: &str,
    ascending: bool,
) -> Result<QueryBuilder<'static, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = if order_by.trim().is_empty() {
        "created_at"
    } else {
        validate_identifier(order_by)?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    push_where_clauses(&mut query, filters, search)?;

    query.push(" ORDER BY t.").push(order_name);
    query.push(if ascending { " ASC" } else { " DESC" });
    Ok(query)
}

fn count_query(
    table: &str,
    filters: Option<&Map<String, Value>>,
    search: Option<TextSearch<'_>>,
) -> Result<QueryBuilder<'static, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*)::bigint AS total FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    push_where_clauses(&mut query, filters, search)?;
    Ok(query)
}

// jsonb_populate_record lets PostgreSQL resolve column types (uuid, date,
// numeric, boolean) from the table definition.
fn insert_query(
    table: &str,
    payload: &Map<String, Value>,
) -> Result<QueryBuilder<'static, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }

    let keys = sorted_keys(payload)?;
    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name).push(" (");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(*key);
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push("r.");
            separated.push_unseparated(*key);
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query
        .push(") r RETURNING row_to_json(")
        .push(table_name)
        .push(".*) AS row");
    Ok(query)
}

fn update_query(
    table_name: &str,
    payload: &Map<String, Value>,
) -> Result<QueryBuilder<'static, Postgres>, AppError> {
    if payload.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let keys = sorted_keys(payload)?;
    let touch = TIMESTAMPED_TABLES.contains(&table_name) && !payload.contains_key("updated_at");

    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(*key);
            separated.push_unseparated(" = r.");
            separated.push_unseparated(*key);
        }
        if touch {
            separated.push("updated_at = now()");
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query.push(") r");
    Ok(query)
}

fn sorted_keys(payload: &Map<String, Value>) -> Result<Vec<&str>, AppError> {
    let mut keys = payload
        .keys()
        .map(|key| validate_identifier(key))
        .collect::<Result<Vec<_>, _>>()?;
    keys.sort_unstable();
    Ok(keys)
}

fn push_where_clauses(
    query: &mut QueryBuilder<'_, Postgres>,
    filters: Option<&Map<String, Value>>,
    search: Option<TextSearch<'_>>,
) -> Result<(), AppError> {
    if let Some(filter_map) = filters {
        for (key, value) in filter_map {
            push_filter_clause(query, key, value)?;
        }
    }

    let Some(search) = search else {
        return Ok(());
    };
    let term = search.term.trim();
    if term.is_empty() || search.columns.is_empty() {
        return Ok(());
    }

    let pattern = format!("%{}%", escape_like(term));
    query.push(" AND (");
    for (index, column) in search.columns.iter().enumerate() {
        let column = validate_identifier(column)?;
        if index > 0 {
            query.push(" OR ");
        }
        query
            .push("t.")
            .push(column)
            .push("::text ILIKE ")
            .push_bind(pattern.clone());
    }
    query.push(")");
    Ok(())
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for character in term.chars() {
        if matches!(character, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(character);
    }
    escaped
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
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
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(
            "Identifier cannot be empty.".to_string(),
        ));
    }
    if !trimmed.chars().all(|character| {
        character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
    }) || trimmed
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_digit())
    {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    Ok(trimmed)
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[derive(Debug, Clone)]
enum ScalarFilter {
    Text(String),
    Uuid(uuid::Uuid),
    Bool(bool),
    I64(i64),
    F64(f64),
    Date(NaiveDate),
    Timestamp(DateTime<FixedOffset>),
}

#[derive(Debug, Clone)]
enum ArrayFilter {
    Text(Vec<String>),
    Uuid(Vec<uuid::Uuid>),
    I64(Vec<i64>),
}

impl ArrayFilter {
    fn is_empty(&self) -> bool {
        match self {
            Self::Text(values) => values.is_empty(),
            Self::Uuid(values) => values.is_empty(),
            Self::I64(values) => values.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    ILike,
    IsNull,
}

impl FilterOperator {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => " = ",
            Self::Ne => " <> ",
            Self::Gt => " > ",
            Self::Gte => " >= ",
            Self::Lt => " < ",
            Self::Lte => " <= ",
            Self::ILike => " ILIKE ",
            Self::IsNull => " IS NULL",
        }
    }
}

/// Splits `column__op` filter keys. Unknown suffixes stay part of the
/// column name so they fail identifier validation loudly.
fn parse_filter_key(filter_key: &str) -> Result<(&str, FilterOperator), AppError> {
    let Some((column, suffix)) = filter_key.rsplit_once("__") else {
        return Ok((validate_identifier(filter_key)?, FilterOperator::Eq));
    };
    let operator = match suffix {
        "ne" => FilterOperator::Ne,
        "gt" => FilterOperator::Gt,
        "gte" => FilterOperator::Gte,
        "lt" => FilterOperator::Lt,
        "lte" => FilterOperator::Lte,
        "ilike" => FilterOperator::ILike,
        "is_null" => FilterOperator::IsNull,
        "in" => FilterOperator::Eq,
        _ => return Ok((validate_identifier(filter_key)?, FilterOperator::Eq)),
    };
    Ok((validate_identifier(column)?, operator))
}

fn parse_bool_filter_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_i64().is_some_and(|parsed| parsed != 0),
        Value::String(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "t" | "1" | "yes" | "y"
        ),
        _ => false,
    }
}

fn push_filter_clause(
    query: &mut QueryBuilder<'_, Postgres>,
    filter_key: &str,
    value: &Value,
) -> Result<(), AppError> {
    let (column, operator) = parse_filter_key(filter_key)?;

    if operator == FilterOperator::IsNull {
        query.push(" AND t.").push(column);
        if parse_bool_filter_value(value) {
            query.push(" IS NULL");
        } else {
            query.push(" IS NOT NULL");
        }
        return Ok(());
    }

    match value {
        Value::Null => Ok(()),
        Value::Array(items) => {
            if !matches!(operator, FilterOperator::Eq | FilterOperator::Ne) {
                return Err(AppError::BadRequest(format!(
                    "Filter '{filter_key}' does not support array values."
                )));
            }
            let filter = infer_array_filter(column, items);
            if filter.is_empty() {
                // An empty IN-list matches nothing; an empty NOT IN-list matches everything.
                if operator == FilterOperator::Eq {
                    query.push(" AND FALSE");
                }
                return Ok(());
            }
            query.push(" AND ");
            push_array_filter(query, column, operator, &filter);
            Ok(())
        }
        _ => {
            query.push(" AND ");
            let filter = infer_scalar_filter(column, value);
            push_scalar_filter(query, column, operator, &filter);
            Ok(())
        }
    }
}

fn push_scalar_filter(
    query: &mut QueryBuilder<'_, Postgres>,
    column: &str,
    operator: FilterOperator,
    value: &ScalarFilter,
) {
    query.push("t.").push(column);
    if operator == FilterOperator::ILike {
        query.push("::text ILIKE ").push_bind(render_filter(value));
        return;
    }

    let sql_operator = operator.sql();
    match value {
        ScalarFilter::Text(text) => {
            query
                .push("::text")
                .push(sql_operator)
                .push_bind(text.clone());
        }
        ScalarFilter::Uuid(id) => {
            query.push(sql_operator).push_bind(*id);
        }
        ScalarFilter::Bool(flag) => {
            query.push(sql_operator).push_bind(*flag);
        }
        ScalarFilter::I64(number) => {
            query.push(sql_operator).push_bind(*number);
        }
        ScalarFilter::F64(number) => {
            query.push(sql_operator).push_bind(*number);
        }
        ScalarFilter::Date(value) => {
            query.push(sql_operator).push_bind(*value);
        }
        ScalarFilter::Timestamp(value) => {
            query.push(sql_operator).push_bind(value.to_owned());
        }
    }
}

fn push_array_filter(
    query: &mut QueryBuilder<'_, Postgres>,
    column: &str,
    operator: FilterOperator,
    value: &ArrayFilter,
) {
    query.push(if operator == FilterOperator::Ne {
        "NOT (t."
    } else {
        "(t."
    });
    query.push(column);
    match value {
        ArrayFilter::Text(values) => {
            query
                .push("::text = ANY(")
                .push_bind(values.clone())
                .push("))");
        }
        ArrayFilter::Uuid(values) => {
            query.push(" = ANY(").push_bind(values.clone()).push("))");
        }
        ArrayFilter::I64(values) => {
            query.push(" = ANY(").push_bind(values.clone()).push("))");
        }
    }
}

fn render_filter(value: &ScalarFilter) -> String {
    match value {
        ScalarFilter::Text(text) => text.clone(),
        ScalarFilter::Uuid(id) => id.to_string(),
        ScalarFilter::Bool(flag) => flag.to_string(),
        ScalarFilter::I64(number) => number.to_string(),
        ScalarFilter::F64(number) => number.to_string(),
        ScalarFilter::Date(value) => value.to_string(),
        ScalarFilter::Timestamp(value) => value.to_rfc3339(),
    }
}

fn infer_scalar_filter(filter_key: &str, value: &Value) -> ScalarFilter {
    match value {
        Value::Bool(flag) => ScalarFilter::Bool(*flag),
        Value::Number(number) => {
            if let Some(as_i64) = number.as_i64() {
                return ScalarFilter::I64(as_i64);
            }
            if let Some(as_f64) = number.as_f64() {
                return ScalarFilter::F64(as_f64);
            }
            ScalarFilter::Text(number.to_string())
        }
        Value::String(text) => {
            let trimmed = text.trim();
            if is_uuid_identifier(filter_key) {
                if let Ok(parsed) = uuid::Uuid::parse_str(trimmed) {
                    return ScalarFilter::Uuid(parsed);
                }
            }
            if is_timestamp_identifier(filter_key) {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
                    return ScalarFilter::Timestamp(parsed);
                }
            }
            if is_date_identifier(filter_key) {
                if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                    return ScalarFilter::Date(parsed);
                }
            }
            ScalarFilter::Text(text.clone())
        }
        _ => ScalarFilter::Text(render_scalar(value)),
    }
}

fn infer_array_filter(filter_key: &str, values: &[Value]) -> ArrayFilter {
    if values.is_empty() {
        return ArrayFilter::Text(Vec::new());
    }

    if is_uuid_identifier(filter_key) {
        let parsed = values
            .iter()
            .map(|value| {
                value
                    .as_str()
                    .and_then(|text| uuid::Uuid::parse_str(text.trim()).ok())
            })
            .collect::<Option<Vec<_>>>();
        if let Some(ids) = parsed {
            return ArrayFilter::Uuid(ids);
        }
    }

    if values
        .iter()
        .all(|value| matches!(value, Value::Number(number) if number.as_i64().is_some()))
    {
        return ArrayFilter::I64(values.iter().filter_map(Value::as_i64).collect());
    }

    ArrayFilter::Text(values.iter().map(render_scalar).collect())
}

fn is_uuid_identifier(identifier: &str) -> bool {
    let normalized = identifier.trim();
    normalized == "id" || normalized.ends_with("_id")
}

fn is_date_identifier(identifier: &str) -> bool {
    let normalized = identifier.trim();
    normalized.ends_with("_date") || normalized == "date_of_birth"
}

fn is_timestamp_identifier(identifier: &str) -> bool {
    identifier.trim().ends_with("_at")
}

pub(crate) fn map_db_error(error: sqlx::Error) -> AppError {
    let code = error
        .as_database_error()
        .and_then(|db_error| db_error.code())
        .map(|code| code.into_owned());
    tracing::error!(db_error = %error, code = ?code, "Database query failed");

    match code.as_deref() {
        Some("23505") => {
            AppError::Conflict("Duplicate value violates a unique constraint.".to_string())
        }
        Some("23503") => AppError::Conflict(
            "Record is still referenced by other records.".to_string(),
        ),
        Some("23514") => AppError::BadRequest("Value violates a check constraint.".to_string()),
        _ => AppError::Dependency("Database operation failed.".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{
        escape_like, insert_query, parse_filter_key, select_query, update_query,
        FilterOperator, TextSearch,
    };
    use crate::error::AppError;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn parses_filter_suffixes() {
        assert_eq!(
            parse_filter_key("due_date__lt").unwrap(),
            ("due_date", FilterOperator::Lt)
        );
        assert_eq!(
            parse_filter_key("id__ne").unwrap(),
            ("id", FilterOperator::Ne)
        );
        assert_eq!(
            parse_filter_key("status__in").unwrap(),
            ("status", FilterOperator::Eq)
        );
        assert_eq!(
            parse_filter_key("room_id").unwrap(),
            ("room_id", FilterOperator::Eq)
        );
        assert!(parse_filter_key("room id").is_err());
    }

    #[test]
    fn select_sql_includes_filters_search_and_order() {
        let filters = map(json!({
            "status": ["ACTIVE", "EXPIRED"],
            "room_id": "550e8400-e29b-41d4-a716-446655440000",
        }));
        let query = select_query(
            "contracts",
            Some(&filters),
            Some(TextSearch {
                columns: &["contract_number"],
                term: "HD-01",
            }),
            "start_date",
            true,
        )
        .unwrap();

        let sql = query.sql();
        assert!(sql.starts_with("SELECT row_to_json(t) AS row FROM contracts t WHERE 1=1"));
        assert!(sql.contains("t.room_id = $"), "got: {sql}");
        assert!(sql.contains("(t.status::text = ANY("), "got: {sql}");
        assert!(sql.contains("t.contract_number::text ILIKE $"), "got: {sql}");
        assert!(sql.ends_with(" ORDER BY t.start_date ASC"), "got: {sql}");
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let filters = map(json!({ "id": [] }));
        let query = select_query("rooms", Some(&filters), None, "", false).unwrap();
        assert!(query.sql().contains(" AND FALSE"));
    }

    #[test]
    fn rejects_unknown_tables() {
        let result = select_query("pg_shadow", None, None, "", false);
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn insert_sql_uses_jsonb_populate_record() {
        let payload = map(json!({
            "number": "101",
            "floor": 1,
            "base_price": 2500000.0,
        }));
        let query = insert_query("rooms", &payload).unwrap();
        let sql = query.sql();
        assert!(
            sql.starts_with("INSERT INTO rooms (base_price, floor, number) SELECT r.base_price, r.floor, r.number"),
            "got: {sql}"
        );
        assert!(sql.contains("jsonb_populate_record(NULL::rooms"), "got: {sql}");
        assert!(sql.ends_with("RETURNING row_to_json(rooms.*) AS row"), "got: {sql}");
    }

    #[test]
    fn update_sql_touches_updated_at_for_timestamped_tables() {
        let payload = map(json!({ "status": "PAID" }));
        let query = update_query("bills", &payload).unwrap();
        assert!(query
            .sql()
            .starts_with("UPDATE bills t SET status = r.status, updated_at = now()"));

        let payload = map(json!({ "is_primary": true }));
        let query = update_query("contract_tenants", &payload).unwrap();
        assert!(!query.sql().contains("updated_at"));
    }

    #[test]
    fn update_requires_fields() {
        assert!(matches!(
            update_query("rooms", &Map::new()),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn escapes_like_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
