use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use sqlx::{PgPool, Row};

use crate::{
    accounts::db_pool,
    auth::require_user,
    error::{AppError, AppResult},
    repository::table_service::{
        count_rows, create_row, delete_row, list_page, list_rows, map_db_error, update_row,
        update_rows,
    },
    routes::{fetch_or_404, filter_map, non_empty_opt, value_str},
    schemas::{
        clamp_page, paginated, validate_input, BillPath, BillsQuery, CreateBillInput,
        GenerateBillsInput, PayBillInput, UpdateBillInput,
    },
    services::{
        billing::{
            ensure_generation_candidates, number, usage_between, BillAmounts, BillStatus,
            BillingPeriod, ManualAmounts, MeterSnapshot,
        },
        occupancy::parse_date,
        settings::load_tariff,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/bills", axum::routing::get(list_bills).post(create_bill))
        .route("/bills/generate", axum::routing::post(generate_bills))
        .route("/bills/mark-overdue", axum::routing::post(mark_overdue_bills))
        .route(
            "/bills/{bill_id}",
            axum::routing::get(get_bill)
                .put(update_bill)
                .delete(delete_bill),
        )
        .route("/bills/{bill_id}/pay", axum::routing::post(pay_bill))
}

async fn list_bills(
    State(state): State<AppState>,
    Query(query): Query<BillsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let (page, limit) = clamp_page(query.page, query.limit);

    let filters = filter_map(&[
        (
            "status",
            non_empty_opt(query.status.as_deref()).map(|value| json!(value.to_uppercase())),
        ),
        ("month", query.month.map(|month| json!(month))),
        ("year", query.year.map(|year| json!(year))),
        (
            "room_id",
            non_empty_opt(query.room_id.as_deref()).map(Value::String),
        ),
        (
            "contract_id",
            non_empty_opt(query.contract_id.as_deref()).map(Value::String),
        ),
    ]);
    let (rows, total) = list_page(
        pool,
        "bills",
        Some(&filters),
        None,
        page,
        limit,
        "due_date",
        false,
    )
    .await?;

    let enriched = enrich_bills(pool, rows).await?;
    Ok(Json(paginated(enriched, page, limit, total)))
}

async fn get_bill(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let bill = fetch_or_404(pool, "bills", &path.bill_id, "Bill not found").await?;
    let mut enriched = enrich_bills(pool, vec![bill]).await?;
    Ok(Json(enriched.pop().unwrap_or(Value::Null)))
}

async fn generate_bills(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GenerateBillsInput>,
) -> AppResult<impl IntoResponse> {
    let user = require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let period = BillingPeriod::new(payload.month, payload.year)?;

    let candidates = unbilled_contracts(pool, period).await?;
    ensure_generation_candidates(candidates.len())?;

    let tariff = load_tariff(pool, &state.config).await?;
    let due_date = period.due_date(state.config.bill_due_day)?;
    let current_readings = readings_for(pool, period).await?;
    let previous_readings = readings_for(pool, period.previous()).await?;

    let mut bills = Vec::new();
    let mut errors = Vec::new();
    for contract in &candidates {
        let contract_id = value_str(contract, "id");
        let room_id = value_str(contract, "room_id");
        let usage = usage_between(
            previous_readings.get(&room_id).copied(),
            current_readings.get(&room_id).copied(),
        );
        let rent = number(contract, "base_price").unwrap_or(0.0);
        let amounts = BillAmounts::compute(rent, usage, &tariff);

        let mut record = amounts.to_record();
        record.insert("contract_id".to_string(), json!(contract_id));
        record.insert("room_id".to_string(), json!(room_id));
        record.insert("month".to_string(), json!(period.month));
        record.insert("year".to_string(), json!(period.year));
        record.insert("status".to_string(), json!(BillStatus::Unpaid.as_str()));
        record.insert("due_date".to_string(), json!(due_date.to_string()));

        match create_row(pool, "bills", &record).await {
            Ok(bill) => bills.push(bill),
            Err(error) => {
                tracing::warn!(
                    contract_id = %contract_id,
                    error = %error,
                    "Bill generation failed for contract"
                );
                errors.push(json!({
                    "contract_id": contract_id,
                    "contract_number": value_str(contract, "contract_number"),
                    "error": error.to_string(),
                }));
            }
        }
    }

    tracing::info!(
        month = period.month,
        year = period.year,
        created = bills.len(),
        failed = errors.len(),
        generated_by = %user.username,
        "Bills generated"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": {
                "created": bills.len(),
                "bills": bills,
                "errors": errors,
            }
        })),
    ))
}

async fn create_bill(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateBillInput>,
) -> AppResult<impl IntoResponse> {
    require_user(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;
    let period = BillingPeriod::new(payload.month, payload.year)?;

    let contract =
        fetch_or_404(pool, "contracts", &payload.contract_id, "Contract not found").await?;
    let contract_id = value_str(&contract, "id");

    let existing = filter_map(&[
        ("contract_id", Some(json!(contract_id))),
        ("month", Some(json!(period.month))),
        ("year", Some(json!(period.year))),
    ]);
    if count_rows(pool, "bills", Some(&existing)).await? > 0 {
        return Err(AppError::Conflict(
            "Bill already exists for this period".to_string(),
        ));
    }

    let amounts = ManualAmounts {
        rent: payload.rent_amount,
        electric: payload.electric_amount,
        water: payload.water_amount,
        service: payload.service_amount,
    };
    let total = amounts.resolve_total(payload.total_amount)?;
    let due_date = match non_empty_opt(payload.due_date.as_deref()) {
        Some(raw) => parse_date(&raw, "due_date")?,
        None => period.due_date(state.config.bill_due_day)?,
    };

    let mut record = Map::new();
    record.insert("contract_id".to_string(), json!(contract_id));
    record.insert(
        "room_id".to_string(),
        json!(value_str(&contract, "room_id")),
    );
    record.insert("month".to_string(), json!(period.month));
    record.insert("year".to_string(), json!(period.year));
    record.insert("rent_amount".to_string(), json!(amounts.rent));
    record.insert("electric_amount".to_string(), json!(amounts.electric));
    record.insert("water_amount".to_string(), json!(amounts.water));
    record.insert("service_amount".to_string(), json!(amounts.service));
    record.insert("total_amount".to_string(), json!(total));
    record.insert(
        "electric_usage".to_string(),
        json!(payload.electric_usage.unwrap_or(0.0)),
    );
    record.insert(
        "water_usage".to_string(),
        json!(payload.water_usage.unwrap_or(0.0)),
    );
    record.insert("status".to_string(), json!(BillStatus::Unpaid.as_str()));
    record.insert("due_date".to_string(), json!(due_date.to_string()));
    if let Some(notes) = non_empty_opt(payload.notes.as_deref()) {
        record.insert("notes".to_string(), json!(notes));
    }

    let created = create_row(pool, "bills", &record).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_bill(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateBillInput>,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let existing = fetch_or_404(pool, "bills", &path.bill_id, "Bill not found").await?;
    let bill_id = value_str(&existing, "id");
    if bill_status(&existing)? == BillStatus::Paid {
        return Err(AppError::Conflict(
            "Paid bills cannot be modified".to_string(),
        ));
    }

    let mut patch = Map::new();
    let amounts_changed = payload.rent_amount.is_some()
        || payload.electric_amount.is_some()
        || payload.water_amount.is_some()
        || payload.service_amount.is_some()
        || payload.total_amount.is_some();
    if amounts_changed {
        let current = |key: &str| number(&existing, key).unwrap_or(0.0);
        let amounts = ManualAmounts {
            rent: payload.rent_amount.unwrap_or_else(|| current("rent_amount")),
            electric: payload
                .electric_amount
                .unwrap_or_else(|| current("electric_amount")),
            water: payload.water_amount.unwrap_or_else(|| current("water_amount")),
            service: payload
                .service_amount
                .unwrap_or_else(|| current("service_amount")),
        };
        let total = amounts.resolve_total(payload.total_amount)?;
        patch.insert("rent_amount".to_string(), json!(amounts.rent));
        patch.insert("electric_amount".to_string(), json!(amounts.electric));
        patch.insert("water_amount".to_string(), json!(amounts.water));
        patch.insert("service_amount".to_string(), json!(amounts.service));
        patch.insert("total_amount".to_string(), json!(total));
    }
    if let Some(usage) = payload.electric_usage {
        patch.insert("electric_usage".to_string(), json!(usage));
    }
    if let Some(usage) = payload.water_usage {
        patch.insert("water_usage".to_string(), json!(usage));
    }
    if let Some(raw) = non_empty_opt(payload.status.as_deref()) {
        let status = BillStatus::parse(&raw)
            .ok_or_else(|| AppError::BadRequest(format!("Invalid bill status '{raw}'")))?;
        patch.insert("status".to_string(), json!(status.as_str()));
        if status == BillStatus::Paid {
            patch.insert(
                "paid_date".to_string(),
                json!(Utc::now().date_naive().to_string()),
            );
        }
    }
    if let Some(raw) = non_empty_opt(payload.due_date.as_deref()) {
        let due_date = parse_date(&raw, "due_date")?;
        patch.insert("due_date".to_string(), json!(due_date.to_string()));
    }
    if let Some(notes) = payload.notes.as_ref() {
        patch.insert("notes".to_string(), json!(notes.trim()));
    }
    if patch.is_empty() {
        return Ok(Json(existing));
    }

    let updated = update_row(pool, "bills", &bill_id, &patch, "id").await?;
    Ok(Json(updated))
}

async fn pay_bill(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    headers: HeaderMap,
    payload: Option<Json<PayBillInput>>,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let payload = payload.map(|Json(input)| input).unwrap_or_default();

    let existing = fetch_or_404(pool, "bills", &path.bill_id, "Bill not found").await?;
    let bill_id = value_str(&existing, "id");
    if bill_status(&existing)? == BillStatus::Paid {
        return Err(AppError::Conflict("Bill is already paid".to_string()));
    }

    let paid_date = match non_empty_opt(payload.paid_date.as_deref()) {
        Some(raw) => parse_date(&raw, "paid_date")?,
        None => Utc::now().date_naive(),
    };
    let mut patch = Map::new();
    patch.insert("status".to_string(), json!(BillStatus::Paid.as_str()));
    patch.insert("paid_date".to_string(), json!(paid_date.to_string()));

    let updated = update_row(pool, "bills", &bill_id, &patch, "id").await?;
    tracing::info!(
        bill_id = %bill_id,
        paid_date = %paid_date,
        recorded_by = %user.username,
        "Bill paid"
    );
    Ok(Json(updated))
}

async fn mark_overdue_bills(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let today = Utc::now().date_naive();

    let filters = filter_map(&[
        ("status", Some(json!(BillStatus::Unpaid.as_str()))),
        ("due_date__lt", Some(json!(today.to_string()))),
    ]);
    let mut patch = Map::new();
    patch.insert("status".to_string(), json!(BillStatus::Overdue.as_str()));
    let updated = update_rows(pool, "bills", &filters, &patch).await?;

    tracing::info!(updated = updated.len(), "Marked overdue bills");
    Ok(Json(json!({
        "success": true,
        "data": {
            "updated": updated.len(),
            "bills": updated,
        }
    })))
}

async fn delete_bill(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let existing = fetch_or_404(pool, "bills", &path.bill_id, "Bill not found").await?;
    if bill_status(&existing)? == BillStatus::Paid {
        return Err(AppError::Conflict("Cannot delete a paid bill".to_string()));
    }
    let deleted = delete_row(pool, "bills", &value_str(&existing, "id"), "id").await?;
    Ok(Json(deleted))
}

/// ACTIVE contracts with no bill for `period`, carrying the room base price.
async fn unbilled_contracts(pool: &PgPool, period: BillingPeriod) -> AppResult<Vec<Value>> {
    let rows = sqlx::query(
        "SELECT row_to_json(c)::jsonb || jsonb_build_object('base_price', r.base_price) AS row
         FROM contracts c
         JOIN rooms r ON r.id = c.room_id
         WHERE c.status = 'ACTIVE'
           AND NOT EXISTS (
             SELECT 1 FROM bills b
             WHERE b.contract_id = c.id AND b.month = $1 AND b.year = $2
           )
         ORDER BY c.contract_number ASC",
    )
    .bind(period.month as i32)
    .bind(period.year)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    Ok(rows
        .into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect())
}

async fn readings_for(
    pool: &PgPool,
    period: BillingPeriod,
) -> AppResult<HashMap<String, MeterSnapshot>> {
    let filters = filter_map(&[
        ("month", Some(json!(period.month))),
        ("year", Some(json!(period.year))),
    ]);
    let rows = list_rows(pool, "meter_readings", Some(&filters), 5000, 0, "created_at", true).await?;
    Ok(rows
        .iter()
        .filter_map(|row| Some((value_str(row, "room_id"), MeterSnapshot::from_row(row)?)))
        .collect())
}

/// Adds room number, contract number and primary tenant to bill rows.
async fn enrich_bills(pool: &PgPool, mut rows: Vec<Value>) -> AppResult<Vec<Value>> {
    if rows.is_empty() {
        return Ok(rows);
    }
    let bill_ids = rows
        .iter()
        .filter_map(|row| uuid::Uuid::parse_str(&value_str(row, "id")).ok())
        .collect::<Vec<_>>();

    let context = sqlx::query_as::<_, (String, String, String, Option<String>)>(
        "SELECT b.id::text, r.number, c.contract_number, t.full_name
         FROM bills b
         JOIN contracts c ON c.id = b.contract_id
         JOIN rooms r ON r.id = b.room_id
         LEFT JOIN contract_tenants ct ON ct.contract_id = c.id AND ct.is_primary
         LEFT JOIN tenants t ON t.id = ct.tenant_id
         WHERE b.id = ANY($1)",
    )
    .bind(bill_ids)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?
    .into_iter()
    .map(|(bill_id, room_number, contract_number, tenant)| {
        (bill_id, (room_number, contract_number, tenant))
    })
    .collect::<HashMap<_, _>>();

    for row in &mut rows {
        let Some((room_number, contract_number, tenant)) =
            context.get(&value_str(row, "id")).cloned()
        else {
            continue;
        };
        if let Some(obj) = row.as_object_mut() {
            obj.insert("room_number".to_string(), json!(room_number));
            obj.insert("contract_number".to_string(), json!(contract_number));
            obj.insert("primary_tenant".to_string(), json!(tenant));
        }
    }
    Ok(rows)
}

fn bill_status(row: &Value) -> AppResult<BillStatus> {
    BillStatus::parse(&value_str(row, "status"))
        .ok_or_else(|| AppError::Internal("Bill has an unknown status".to_string()))
}
