use axum::{routing::get, Router};
use serde_json::{Map, Value};
use sqlx::{Executor, Postgres};

use crate::{
    error::{AppError, AppResult},
    repository::table_service::find_row,
    state::AppState,
};

pub mod auth;
pub mod bills;
pub mod contracts;
pub mod dashboard;
pub mod health;
pub mod meter_readings;
pub mod reports;
pub mod residency;
pub mod rooms;
pub mod settings;
pub mod tenants;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(auth::router())
        .merge(rooms::router())
        .merge(tenants::router())
        .merge(contracts::router())
        .merge(bills::router())
        .merge(meter_readings::router())
        .merge(residency::router())
        .merge(dashboard::router())
        .merge(reports::router())
        .merge(settings::router())
}

/// Loads a row by id, mapping absence to a resource-specific 404.
pub(crate) async fn fetch_or_404<'c, E>(
    executor: E,
    table: &str,
    row_id: &str,
    not_found: &str,
) -> AppResult<Value>
where
    E: Executor<'c, Database = Postgres>,
{
    find_row(executor, table, row_id.trim(), "id")
        .await?
        .ok_or_else(|| AppError::NotFound(not_found.to_string()))
}

pub(crate) fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

pub(crate) fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

pub(crate) fn filter_map(entries: &[(&str, Option<Value>)]) -> Map<String, Value> {
    entries
        .iter()
        .filter_map(|(key, value)| value.clone().map(|value| ((*key).to_string(), value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{filter_map, non_empty_opt, value_str};

    #[test]
    fn reads_trimmed_strings() {
        let row = json!({ "number": " 101 ", "floor": 1 });
        assert_eq!(value_str(&row, "number"), "101");
        assert_eq!(value_str(&row, "floor"), "");
        assert_eq!(value_str(&row, "missing"), "");
    }

    #[test]
    fn builds_filters_from_present_values() {
        let filters = filter_map(&[
            ("status", Some(json!("ACTIVE"))),
            ("room_id", None),
            ("month", Some(json!(3))),
        ]);
        assert_eq!(filters.len(), 2);
        assert_eq!(filters.get("month"), Some(&json!(3)));
        assert_eq!(non_empty_opt(Some("  ")), None);
    }
}
