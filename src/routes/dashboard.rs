use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{Datelike, Duration, Utc};
use serde_json::{json, Value};
use sqlx::Row;

use crate::{
    accounts::db_pool,
    auth::require_user,
    error::AppResult,
    repository::table_service::{count_rows, map_db_error},
    routes::filter_map,
    schemas::{ExpiringContractsQuery, RevenueQuery},
    services::{
        billing::BillingPeriod,
        dashboard::{monthly_series, RoomCounts},
        occupancy::ContractStatus,
    },
    state::AppState,
};

const EXPIRING_SOON_DAYS: i64 = 30;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/dashboard/stats", axum::routing::get(dashboard_stats))
        .route("/dashboard/revenue", axum::routing::get(revenue_series))
        .route(
            "/dashboard/expiring-contracts",
            axum::routing::get(expiring_contracts),
        )
}

async fn dashboard_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let today = Utc::now().date_naive();
    let period = BillingPeriod::of(today);

    let status_counts = sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*)::bigint FROM rooms GROUP BY status",
    )
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;
    let rooms = RoomCounts::from_status_counts(&status_counts);

    let tenants = count_rows(pool, "tenants", None).await?;
    let active = filter_map(&[("status", Some(json!(ContractStatus::Active.as_str())))]);
    let active_contracts = count_rows(pool, "contracts", Some(&active)).await?;
    let expiring = filter_map(&[
        ("status", Some(json!(ContractStatus::Active.as_str()))),
        ("end_date__gte", Some(json!(today.to_string()))),
        (
            "end_date__lte",
            Some(json!((today + Duration::days(EXPIRING_SOON_DAYS)).to_string())),
        ),
    ]);
    let expiring_soon = count_rows(pool, "contracts", Some(&expiring)).await?;

    let (monthly_revenue, outstanding, overdue_count) = sqlx::query_as::<_, (f64, f64, i64)>(
        "SELECT
           COALESCE(SUM(total_amount) FILTER (
             WHERE status = 'PAID' AND month = $1 AND year = $2), 0)::float8,
           COALESCE(SUM(total_amount) FILTER (WHERE status IN ('UNPAID', 'OVERDUE')), 0)::float8,
           COUNT(*) FILTER (WHERE status = 'OVERDUE')::bigint
         FROM bills",
    )
    .bind(period.month as i32)
    .bind(period.year)
    .fetch_one(pool)
    .await
    .map_err(map_db_error)?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "rooms": rooms,
            "occupancy_rate": rooms.occupancy_rate(),
            "total_tenants": tenants,
            "active_contracts": active_contracts,
            "expiring_soon": expiring_soon,
            "monthly_revenue": monthly_revenue,
            "outstanding_amount": outstanding,
            "overdue_bills": overdue_count,
            "month": period.month,
            "year": period.year,
        }
    })))
}

async fn revenue_series(
    State(state): State<AppState>,
    Query(query): Query<RevenueQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let year = query.year.unwrap_or_else(|| Utc::now().year());

    let rows = sqlx::query_as::<_, (i32, f64, f64)>(
        "SELECT month,
                COALESCE(SUM(total_amount), 0)::float8,
                COALESCE(SUM(total_amount) FILTER (WHERE status = 'PAID'), 0)::float8
         FROM bills
         WHERE year = $1
         GROUP BY month
         ORDER BY month",
    )
    .bind(year)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "year": year,
            "months": monthly_series(&rows),
        }
    })))
}

async fn expiring_contracts(
    State(state): State<AppState>,
    Query(query): Query<ExpiringContractsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let days = query.days.clamp(1, 365);
    let today = Utc::now().date_naive();

    let rows = sqlx::query(
        "SELECT row_to_json(c)::jsonb || jsonb_build_object(
                  'room_number', r.number,
                  'primary_tenant', t.full_name,
                  'primary_tenant_phone', t.phone,
                  'days_remaining', c.end_date - $1::date
                ) AS row
         FROM contracts c
         JOIN rooms r ON r.id = c.room_id
         LEFT JOIN contract_tenants ct ON ct.contract_id = c.id AND ct.is_primary
         LEFT JOIN tenants t ON t.id = ct.tenant_id
         WHERE c.status = 'ACTIVE' AND c.end_date BETWEEN $1 AND $2
         ORDER BY c.end_date ASC",
    )
    .bind(today)
    .bind(today + Duration::days(days))
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    let contracts = rows
        .into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect::<Vec<_>>();

    Ok(Json(json!({
        "success": true,
        "data": {
            "days": days,
            "contracts": contracts,
        }
    })))
}
