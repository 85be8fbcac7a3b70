use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::{
    accounts::db_pool,
    auth::require_user,
    error::AppResult,
    repository::table_service::map_db_error,
    schemas::MonthlyReportQuery,
    services::{
        billing::{round_money, BillingPeriod},
        dashboard::{group_debts, summarize_bills},
    },
    state::AppState,
};

const BILL_REPORT_SELECT: &str = "SELECT row_to_json(b)::jsonb || jsonb_build_object(
           'room_number', r.number,
           'contract_number', c.contract_number,
           'primary_tenant', t.full_name,
           'primary_tenant_phone', t.phone
         ) AS row
         FROM bills b
         JOIN contracts c ON c.id = b.contract_id
         JOIN rooms r ON r.id = b.room_id
         LEFT JOIN contract_tenants ct ON ct.contract_id = c.id AND ct.is_primary
         LEFT JOIN tenants t ON t.id = ct.tenant_id
         WHERE 1=1";

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/reports/monthly", axum::routing::get(monthly_report))
        .route("/reports/debts", axum::routing::get(debt_report))
}

async fn monthly_report(
    State(state): State<AppState>,
    Query(query): Query<MonthlyReportQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let current = BillingPeriod::of(Utc::now().date_naive());
    let period = BillingPeriod::new(
        query.month.unwrap_or(i64::from(current.month)),
        query.year.unwrap_or(i64::from(current.year)),
    )?;

    let mut builder = QueryBuilder::<Postgres>::new(BILL_REPORT_SELECT);
    builder
        .push(" AND b.month = ")
        .push_bind(period.month as i32)
        .push(" AND b.year = ")
        .push_bind(period.year)
        .push(" ORDER BY r.number ASC");
    let bills = fetch_report_rows(pool, builder).await?;
    let summary = summarize_bills(&bills);

    Ok(Json(json!({
        "success": true,
        "data": {
            "month": period.month,
            "year": period.year,
            "summary": summary,
            "bills": bills,
        }
    })))
}

async fn debt_report(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut builder = QueryBuilder::<Postgres>::new(BILL_REPORT_SELECT);
    builder.push(" AND b.status IN ('UNPAID', 'OVERDUE') ORDER BY b.due_date ASC");
    let bills = fetch_report_rows(pool, builder).await?;
    let summary = summarize_bills(&bills);
    let contracts = group_debts(bills);

    Ok(Json(json!({
        "success": true,
        "data": {
            "contract_count": contracts.len(),
            "bill_count": summary.bill_count,
            "overdue_count": summary.overdue_count,
            "total_owed": round_money(summary.total_outstanding),
            "contracts": contracts,
        }
    })))
}

async fn fetch_report_rows(
    pool: &PgPool,
    mut builder: QueryBuilder<'_, Postgres>,
) -> AppResult<Vec<Value>> {
    let rows = builder
        .build()
        .fetch_all(pool)
        .await
        .map_err(map_db_error)?;
    Ok(rows
        .into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect())
}
