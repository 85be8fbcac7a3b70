use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::{
    accounts::db_pool,
    auth::require_user,
    error::{AppError, AppResult},
    repository::table_service::{
        count_rows, create_row, delete_row, list_page, list_rows, update_row,
    },
    routes::{fetch_or_404, filter_map, non_empty_opt, value_str},
    schemas::{
        clamp_page, paginated, remove_nulls, serialize_to_map, validate_input,
        CreateMeterReadingInput, MeterReadingPath, MeterReadingsQuery, UpdateMeterReadingInput,
    },
    services::billing::{ensure_readings_monotonic, number, BillingPeriod, MeterSnapshot},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/meter-readings",
            axum::routing::get(list_meter_readings).post(create_meter_reading),
        )
        .route(
            "/meter-readings/{reading_id}",
            axum::routing::get(get_meter_reading)
                .put(update_meter_reading)
                .delete(delete_meter_reading),
        )
}

async fn list_meter_readings(
    State(state): State<AppState>,
    Query(query): Query<MeterReadingsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let (page, limit) = clamp_page(query.page, query.limit);

    let filters = filter_map(&[
        (
            "room_id",
            non_empty_opt(query.room_id.as_deref()).map(Value::String),
        ),
        ("month", query.month.map(|month| json!(month))),
        ("year", query.year.map(|year| json!(year))),
    ]);
    let (rows, total) = list_page(
        pool,
        "meter_readings",
        Some(&filters),
        None,
        page,
        limit,
        "created_at",
        false,
    )
    .await?;

    Ok(Json(paginated(rows, page, limit, total)))
}

async fn get_meter_reading(
    State(state): State<AppState>,
    Path(path): Path<MeterReadingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let reading = fetch_or_404(
        pool,
        "meter_readings",
        &path.reading_id,
        "Meter reading not found",
    )
    .await?;
    Ok(Json(reading))
}

async fn create_meter_reading(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateMeterReadingInput>,
) -> AppResult<impl IntoResponse> {
    require_user(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let room = fetch_or_404(pool, "rooms", &payload.room_id, "Room not found").await?;
    let room_id = value_str(&room, "id");
    let period = BillingPeriod::new(payload.month.into(), payload.year.into())?;

    let same_period = period_filters(&room_id, period);
    if count_rows(pool, "meter_readings", Some(&same_period)).await? > 0 {
        return Err(AppError::Conflict(
            "Meter reading already exists for this period".to_string(),
        ));
    }

    let snapshot = MeterSnapshot {
        electric: payload.electric_reading,
        water: payload.water_reading,
    };
    ensure_neighbours_allow(pool, &room_id, period, snapshot).await?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("room_id".to_string(), json!(room_id));
    let created = create_row(pool, "meter_readings", &record).await?;

    tracing::info!(
        room_id = %room_id,
        month = period.month,
        year = period.year,
        "Meter reading recorded"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_meter_reading(
    State(state): State<AppState>,
    Path(path): Path<MeterReadingPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateMeterReadingInput>,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let existing = fetch_or_404(
        pool,
        "meter_readings",
        &path.reading_id,
        "Meter reading not found",
    )
    .await?;
    let reading_id = value_str(&existing, "id");

    let patch = remove_nulls(serialize_to_map(&payload));
    if patch.is_empty() {
        return Ok(Json(existing));
    }

    if payload.electric_reading.is_some() || payload.water_reading.is_some() {
        let period = BillingPeriod::new(
            number(&existing, "month").unwrap_or_default() as i64,
            number(&existing, "year").unwrap_or_default() as i64,
        )?;
        let snapshot = MeterSnapshot {
            electric: payload
                .electric_reading
                .or_else(|| number(&existing, "electric_reading"))
                .unwrap_or_default(),
            water: payload
                .water_reading
                .or_else(|| number(&existing, "water_reading"))
                .unwrap_or_default(),
        };
        ensure_neighbours_allow(pool, &value_str(&existing, "room_id"), period, snapshot).await?;
    }

    let updated = update_row(pool, "meter_readings", &reading_id, &patch, "id").await?;
    Ok(Json(updated))
}

async fn delete_meter_reading(
    State(state): State<AppState>,
    Path(path): Path<MeterReadingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let existing = fetch_or_404(
        pool,
        "meter_readings",
        &path.reading_id,
        "Meter reading not found",
    )
    .await?;
    let deleted = delete_row(pool, "meter_readings", &value_str(&existing, "id"), "id").await?;
    Ok(Json(deleted))
}

fn period_filters(room_id: &str, period: BillingPeriod) -> serde_json::Map<String, Value> {
    filter_map(&[
        ("room_id", Some(json!(room_id))),
        ("month", Some(json!(period.month))),
        ("year", Some(json!(period.year))),
    ])
}

async fn snapshot_for(
    pool: &PgPool,
    room_id: &str,
    period: BillingPeriod,
) -> AppResult<Option<MeterSnapshot>> {
    let rows = list_rows(
        pool,
        "meter_readings",
        Some(&period_filters(room_id, period)),
        1,
        0,
        "created_at",
        false,
    )
    .await?;
    Ok(rows.first().and_then(MeterSnapshot::from_row))
}

async fn ensure_neighbours_allow(
    pool: &PgPool,
    room_id: &str,
    period: BillingPeriod,
    snapshot: MeterSnapshot,
) -> AppResult<()> {
    let previous = snapshot_for(pool, room_id, period.previous()).await?;
    let next = snapshot_for(pool, room_id, period.next()).await?;
    ensure_readings_monotonic(previous, snapshot, next)
}
