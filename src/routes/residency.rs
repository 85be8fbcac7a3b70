use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};
use sqlx::PgPool;

use crate::{
    accounts::db_pool,
    auth::require_user,
    error::{AppError, AppResult},
    repository::table_service::{create_row, delete_row, list_page, list_rows, update_row},
    routes::{fetch_or_404, filter_map, non_empty_opt, value_str},
    schemas::{
        clamp_page, paginated, validate_input, CreateResidencyRecordInput, ResidencyRecordPath,
        ResidencyRecordsQuery, UpdateResidencyRecordInput,
    },
    services::{
        occupancy::parse_date,
        residency::{ensure_no_overlap, RecordType, ResidencyEntry, ResidencySpan},
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/residency-records",
            axum::routing::get(list_residency_records).post(create_residency_record),
        )
        .route(
            "/residency-records/{record_id}",
            axum::routing::get(get_residency_record)
                .put(update_residency_record)
                .delete(delete_residency_record),
        )
}

async fn list_residency_records(
    State(state): State<AppState>,
    Query(query): Query<ResidencyRecordsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let (page, limit) = clamp_page(query.page, query.limit);

    let filters = filter_map(&[
        (
            "tenant_id",
            non_empty_opt(query.tenant_id.as_deref()).map(Value::String),
        ),
        (
            "record_type",
            non_empty_opt(query.record_type.as_deref()).map(|value| json!(value.to_uppercase())),
        ),
    ]);
    let (rows, total) = list_page(
        pool,
        "residency_records",
        Some(&filters),
        None,
        page,
        limit,
        "start_date",
        false,
    )
    .await?;

    Ok(Json(paginated(rows, page, limit, total)))
}

async fn get_residency_record(
    State(state): State<AppState>,
    Path(path): Path<ResidencyRecordPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let record = fetch_or_404(
        pool,
        "residency_records",
        &path.record_id,
        "Residency record not found",
    )
    .await?;
    Ok(Json(record))
}

async fn create_residency_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateResidencyRecordInput>,
) -> AppResult<impl IntoResponse> {
    require_user(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let tenant = fetch_or_404(pool, "tenants", &payload.tenant_id, "Tenant not found").await?;
    let tenant_id = value_str(&tenant, "id");
    let record_type = parse_record_type(&payload.record_type)?;
    let end_date = non_empty_opt(payload.end_date.as_deref());
    let span = parse_span(&payload.start_date, end_date.as_deref())?;

    let existing = tenant_entries(pool, &tenant_id).await?;
    ensure_no_overlap(record_type, span, &existing, None)?;

    let mut record = Map::new();
    record.insert("tenant_id".to_string(), json!(tenant_id));
    record.insert("record_type".to_string(), json!(record_type.as_str()));
    write_span(&mut record, span);
    if let Some(address) = non_empty_opt(payload.address.as_deref()) {
        record.insert("address".to_string(), json!(address));
    }
    if let Some(notes) = non_empty_opt(payload.notes.as_deref()) {
        record.insert("notes".to_string(), json!(notes));
    }

    let created = create_row(pool, "residency_records", &record).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_residency_record(
    State(state): State<AppState>,
    Path(path): Path<ResidencyRecordPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateResidencyRecordInput>,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let existing = fetch_or_404(
        pool,
        "residency_records",
        &path.record_id,
        "Residency record not found",
    )
    .await?;
    let record_id = value_str(&existing, "id");
    let tenant_id = value_str(&existing, "tenant_id");

    let record_type = match non_empty_opt(payload.record_type.as_deref()) {
        Some(raw) => parse_record_type(&raw)?,
        None => parse_record_type(&value_str(&existing, "record_type"))?,
    };
    let start = payload
        .start_date
        .clone()
        .unwrap_or_else(|| value_str(&existing, "start_date"));
    let end = match payload.end_date.as_deref() {
        Some(raw) => non_empty_opt(Some(raw)),
        None => non_empty_opt(Some(value_str(&existing, "end_date").as_str())),
    };
    let span = parse_span(&start, end.as_deref())?;

    let others = tenant_entries(pool, &tenant_id).await?;
    ensure_no_overlap(record_type, span, &others, Some(&record_id))?;

    let mut patch = Map::new();
    patch.insert("record_type".to_string(), json!(record_type.as_str()));
    write_span(&mut patch, span);
    if let Some(address) = payload.address.as_ref() {
        patch.insert("address".to_string(), json!(address.trim()));
    }
    if let Some(notes) = payload.notes.as_ref() {
        patch.insert("notes".to_string(), json!(notes.trim()));
    }

    let updated = update_row(pool, "residency_records", &record_id, &patch, "id").await?;
    Ok(Json(updated))
}

async fn delete_residency_record(
    State(state): State<AppState>,
    Path(path): Path<ResidencyRecordPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let existing = fetch_or_404(
        pool,
        "residency_records",
        &path.record_id,
        "Residency record not found",
    )
    .await?;
    let deleted = delete_row(pool, "residency_records", &value_str(&existing, "id"), "id").await?;
    Ok(Json(deleted))
}

async fn tenant_entries(pool: &PgPool, tenant_id: &str) -> AppResult<Vec<ResidencyEntry>> {
    let filters = filter_map(&[("tenant_id", Some(json!(tenant_id)))]);
    let rows = list_rows(
        pool,
        "residency_records",
        Some(&filters),
        5000,
        0,
        "start_date",
        true,
    )
    .await?;
    Ok(rows.iter().filter_map(ResidencyEntry::from_row).collect())
}

fn parse_record_type(raw: &str) -> AppResult<RecordType> {
    RecordType::parse(raw)
        .ok_or_else(|| AppError::BadRequest(format!("Invalid residency record type '{raw}'")))
}

fn parse_span(start: &str, end: Option<&str>) -> AppResult<ResidencySpan> {
    let start = parse_date(start, "start_date")?;
    let end = end.map(|raw| parse_date(raw, "end_date")).transpose()?;
    ResidencySpan::new(start, end)
}

fn write_span(record: &mut Map<String, Value>, span: ResidencySpan) {
    record.insert("start_date".to_string(), json!(span.start.to_string()));
    record.insert(
        "end_date".to_string(),
        span.end.map_or(Value::Null, |end| json!(end.to_string())),
    );
}
