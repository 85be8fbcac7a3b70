use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde_json::{json, Map, Value};
use sqlx::{Executor, PgConnection, PgPool, Postgres, Row};

use crate::{
    accounts::db_pool,
    auth::require_user,
    error::{AppError, AppResult},
    repository::table_service::{
        begin, commit, count_rows, create_row, delete_row, delete_rows, find_row, list_page,
        list_rows, map_db_error, update_row, update_rows, TextSearch,
    },
    routes::{fetch_or_404, filter_map, non_empty_opt, value_str},
    schemas::{
        clamp_page, paginated, validate_input, ContractPath, ContractsQuery, CreateContractInput,
        UpdateContractInput,
    },
    services::{
        occupancy::{
            check_out_status, ensure_contract_deletable, ensure_room_available,
            ensure_status_transition, room_status_after_release, BookedStay, ContractStatus,
            RoomStatus, Stay, TenantSelection,
        },
        residency::{closing_date, ensure_no_overlap, RecordType, ResidencyEntry, ResidencySpan},
    },
    state::AppState,
};

/// Bill statuses that still carry a debt.
pub(crate) const OUTSTANDING_BILL_STATUSES: [&str; 2] = ["UNPAID", "OVERDUE"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/contracts",
            axum::routing::get(list_contracts).post(create_contract),
        )
        .route("/contracts/expire", axum::routing::post(expire_contracts))
        .route(
            "/contracts/{contract_id}",
            axum::routing::get(get_contract)
                .put(update_contract)
                .delete(delete_contract),
        )
        .route(
            "/contracts/{contract_id}/check-in",
            axum::routing::post(check_in_contract),
        )
        .route(
            "/contracts/{contract_id}/check-out",
            axum::routing::post(check_out_contract),
        )
}

async fn list_contracts(
    State(state): State<AppState>,
    Query(query): Query<ContractsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let (page, limit) = clamp_page(query.page, query.limit);

    let mut filters = filter_map(&[
        (
            "status",
            non_empty_opt(query.status.as_deref()).map(|value| json!(value.to_uppercase())),
        ),
        (
            "room_id",
            non_empty_opt(query.room_id.as_deref()).map(Value::String),
        ),
    ]);
    if let Some(tenant_id) = non_empty_opt(query.tenant_id.as_deref()) {
        let mut link_filters = Map::new();
        link_filters.insert("tenant_id".to_string(), Value::String(tenant_id));
        let links = list_rows(
            pool,
            "contract_tenants",
            Some(&link_filters),
            5000,
            0,
            "created_at",
            false,
        )
        .await?;
        let ids = links
            .iter()
            .map(|row| Value::String(value_str(row, "contract_id")))
            .collect::<Vec<_>>();
        filters.insert("id".to_string(), Value::Array(ids));
    }

    let search = non_empty_opt(query.search.as_deref());
    let (rows, total) = list_page(
        pool,
        "contracts",
        Some(&filters),
        search.as_deref().map(|term| TextSearch {
            columns: &["contract_number"],
            term,
        }),
        page,
        limit,
        "created_at",
        false,
    )
    .await?;

    let enriched = enrich_contracts(pool, rows).await?;
    Ok(Json(paginated(enriched, page, limit, total)))
}

async fn get_contract(
    State(state): State<AppState>,
    Path(path): Path<ContractPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let contract = fetch_or_404(pool, "contracts", &path.contract_id, "Contract not found").await?;
    Ok(Json(contract_detail(pool, contract).await?))
}

async fn create_contract(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateContractInput>,
) -> AppResult<impl IntoResponse> {
    let user = require_user(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let stay = Stay::parse(&payload.start_date, &payload.end_date)?;

    let contract_number = payload.contract_number.trim().to_string();
    ensure_contract_number_free(pool, &contract_number).await?;

    let room = fetch_or_404(pool, "rooms", &payload.room_id, "Room not found").await?;
    let room_id = value_str(&room, "id");
    if RoomStatus::parse(&value_str(&room, "status")) == Some(RoomStatus::Maintenance) {
        return Err(AppError::Conflict("Room is under maintenance".to_string()));
    }

    let booked = booked_stays(pool, &room_id).await?;
    ensure_room_available(stay, &booked, None)?;
    ensure_tenants_exist(pool, &distinct_ids(&payload.tenant_ids)).await?;
    let selection = TenantSelection::new(&payload.tenant_ids, &payload.primary_tenant_id)?;

    let mut record = Map::new();
    record.insert("contract_number".to_string(), json!(contract_number));
    record.insert("room_id".to_string(), json!(room_id));
    record.insert("start_date".to_string(), json!(stay.start.to_string()));
    record.insert("end_date".to_string(), json!(stay.end.to_string()));
    record.insert("deposit".to_string(), json!(payload.deposit));
    record.insert(
        "status".to_string(),
        json!(ContractStatus::Active.as_str()),
    );
    if let Some(notes) = non_empty_opt(payload.notes.as_deref()) {
        record.insert("notes".to_string(), json!(notes));
    }

    let mut tx = begin(pool).await?;
    let created = create_row(&mut *tx, "contracts", &record).await?;
    let contract_id = value_str(&created, "id");
    insert_contract_tenants(&mut tx, &contract_id, &selection).await?;
    set_room_status(&mut tx, &room_id, RoomStatus::Occupied).await?;
    commit(tx).await?;

    tracing::info!(
        contract_id = %contract_id,
        contract_number = %contract_number,
        room_id = %room_id,
        tenants = selection.tenant_ids.len(),
        created_by = %user.username,
        "Contract created"
    );

    Ok((StatusCode::CREATED, Json(contract_detail(pool, created).await?)))
}

async fn update_contract(
    State(state): State<AppState>,
    Path(path): Path<ContractPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateContractInput>,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let existing =
        fetch_or_404(pool, "contracts", &path.contract_id, "Contract not found").await?;
    let contract_id = value_str(&existing, "id");
    let room_id = value_str(&existing, "room_id");
    let current = contract_status(&existing)?;
    let target = match non_empty_opt(payload.status.as_deref()) {
        Some(raw) => ContractStatus::parse(&raw)
            .ok_or_else(|| AppError::BadRequest("Invalid contract status".to_string()))?,
        None => current,
    };
    ensure_status_transition(current, target)?;

    let mut patch = Map::new();

    let dates_changed = payload.start_date.is_some() || payload.end_date.is_some();
    if dates_changed {
        let start = payload
            .start_date
            .clone()
            .unwrap_or_else(|| value_str(&existing, "start_date"));
        let end = payload
            .end_date
            .clone()
            .unwrap_or_else(|| value_str(&existing, "end_date"));
        let stay = Stay::parse(&start, &end)?;
        if target == ContractStatus::Active {
            let booked = booked_stays(pool, &room_id).await?;
            ensure_room_available(stay, &booked, Some(&contract_id))?;
        }
        patch.insert("start_date".to_string(), json!(stay.start.to_string()));
        patch.insert("end_date".to_string(), json!(stay.end.to_string()));
    }
    if let Some(deposit) = payload.deposit {
        patch.insert("deposit".to_string(), json!(deposit));
    }
    if let Some(notes) = payload.notes.as_ref() {
        patch.insert("notes".to_string(), json!(notes.trim()));
    }
    if target != current {
        patch.insert("status".to_string(), json!(target.as_str()));
    }

    let selection = if payload.tenant_ids.is_some() || payload.primary_tenant_id.is_some() {
        let current_tenants = load_contract_tenants(pool, &contract_id).await?;
        let tenant_ids = payload.tenant_ids.clone().unwrap_or_else(|| {
            current_tenants
                .iter()
                .map(|row| value_str(row, "id"))
                .collect()
        });
        let primary = payload.primary_tenant_id.clone().unwrap_or_else(|| {
            current_tenants
                .iter()
                .find(|row| row.get("is_primary").and_then(Value::as_bool) == Some(true))
                .map(|row| value_str(row, "id"))
                .unwrap_or_default()
        });
        ensure_tenants_exist(pool, &distinct_ids(&tenant_ids)).await?;
        Some(TenantSelection::new(&tenant_ids, &primary)?)
    } else {
        None
    };

    let mut tx = begin(pool).await?;
    let updated = if patch.is_empty() {
        existing
    } else {
        update_row(&mut *tx, "contracts", &contract_id, &patch, "id").await?
    };
    if let Some(selection) = selection.as_ref() {
        delete_rows(&mut *tx, "contract_tenants", &by_contract(&contract_id)).await?;
        insert_contract_tenants(&mut tx, &contract_id, selection).await?;
    }
    if current == ContractStatus::Active && target != ContractStatus::Active {
        release_room_if_vacant(&mut tx, &room_id).await?;
    }
    commit(tx).await?;

    if target != current {
        tracing::info!(
            contract_id = %contract_id,
            from = current.as_str(),
            to = target.as_str(),
            "Contract status changed"
        );
    }

    Ok(Json(contract_detail(pool, updated).await?))
}

async fn delete_contract(
    State(state): State<AppState>,
    Path(path): Path<ContractPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let existing =
        fetch_or_404(pool, "contracts", &path.contract_id, "Contract not found").await?;
    let contract_id = value_str(&existing, "id");
    let mut unpaid = by_contract(&contract_id);
    unpaid.insert("status".to_string(), json!(OUTSTANDING_BILL_STATUSES));
    let unpaid_bills = count_rows(pool, "bills", Some(&unpaid)).await?;
    ensure_contract_deletable(contract_status(&existing)?, unpaid_bills)?;

    let mut tx = begin(pool).await?;
    delete_rows(&mut *tx, "bills", &by_contract(&contract_id)).await?;
    delete_rows(&mut *tx, "contract_tenants", &by_contract(&contract_id)).await?;
    let deleted = delete_row(&mut *tx, "contracts", &contract_id, "id").await?;
    commit(tx).await?;

    tracing::info!(contract_id = %contract_id, "Contract deleted");
    Ok(Json(deleted))
}

async fn check_in_contract(
    State(state): State<AppState>,
    Path(path): Path<ContractPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let existing =
        fetch_or_404(pool, "contracts", &path.contract_id, "Contract not found").await?;
    let contract_id = value_str(&existing, "id");
    if contract_status(&existing)? != ContractStatus::Active {
        return Err(AppError::Conflict(
            "Only active contracts can be checked in".to_string(),
        ));
    }
    if existing
        .get("checked_in_at")
        .is_some_and(|value| !value.is_null())
    {
        return Err(AppError::Conflict(
            "Contract already checked in".to_string(),
        ));
    }

    let stay = Stay::parse(
        &value_str(&existing, "start_date"),
        &value_str(&existing, "end_date"),
    )?;
    let span = ResidencySpan::new(stay.start, Some(stay.end))?;
    let room = find_row(pool, "rooms", &value_str(&existing, "room_id"), "id").await?;
    let address = room
        .as_ref()
        .map(|row| format!("Room {}", value_str(row, "number")));
    let tenants = load_contract_tenants(pool, &contract_id).await?;

    let mut tx = begin(pool).await?;
    let mut stamp = Map::new();
    stamp.insert("checked_in_at".to_string(), json!(Utc::now().to_rfc3339()));
    let updated = update_row(&mut *tx, "contracts", &contract_id, &stamp, "id").await?;

    let mut opened = Vec::new();
    for tenant in &tenants {
        let tenant_id = value_str(tenant, "id");
        let existing_records = residency_entries(&mut tx, &tenant_id).await?;
        if ensure_no_overlap(RecordType::TemporaryResidence, span, &existing_records, None).is_err()
        {
            continue;
        }

        let mut record = Map::new();
        record.insert("tenant_id".to_string(), json!(tenant_id));
        record.insert(
            "record_type".to_string(),
            json!(RecordType::TemporaryResidence.as_str()),
        );
        record.insert("start_date".to_string(), json!(stay.start.to_string()));
        record.insert("end_date".to_string(), json!(stay.end.to_string()));
        if let Some(address) = address.as_ref() {
            record.insert("address".to_string(), json!(address));
        }
        record.insert(
            "notes".to_string(),
            json!(format!(
                "Check-in for contract {}",
                value_str(&existing, "contract_number")
            )),
        );
        opened.push(create_row(&mut *tx, "residency_records", &record).await?);
    }
    commit(tx).await?;

    tracing::info!(
        contract_id = %contract_id,
        residency_records = opened.len(),
        "Contract checked in"
    );

    Ok(Json(json!({
        "success": true,
        "data": {
            "contract": updated,
            "residency_records": opened,
        }
    })))
}

async fn check_out_contract(
    State(state): State<AppState>,
    Path(path): Path<ContractPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let existing =
        fetch_or_404(pool, "contracts", &path.contract_id, "Contract not found").await?;
    let contract_id = value_str(&existing, "id");
    let room_id = value_str(&existing, "room_id");
    if contract_status(&existing)? != ContractStatus::Active {
        return Err(AppError::Conflict(
            "Only active contracts can be checked out".to_string(),
        ));
    }

    let stay = Stay::parse(
        &value_str(&existing, "start_date"),
        &value_str(&existing, "end_date"),
    )?;
    let today = Utc::now().date_naive();
    let closing_status = check_out_status(stay, today);
    let tenants = load_contract_tenants(pool, &contract_id).await?;

    let mut tx = begin(pool).await?;
    let mut patch = Map::new();
    patch.insert("status".to_string(), json!(closing_status.as_str()));
    patch.insert("checked_out_at".to_string(), json!(Utc::now().to_rfc3339()));
    let updated = update_row(&mut *tx, "contracts", &contract_id, &patch, "id").await?;

    let mut closed = 0_usize;
    for tenant in &tenants {
        let tenant_id = value_str(tenant, "id");
        closed += close_residence(&mut tx, &tenant_id, today).await?;
    }
    let room_status = release_room_if_vacant(&mut tx, &room_id).await?;
    commit(tx).await?;

    tracing::info!(
        contract_id = %contract_id,
        status = closing_status.as_str(),
        residency_records_closed = closed,
        room_status = room_status.map(RoomStatus::as_str),
        "Contract checked out"
    );

    Ok(Json(json!({
        "success": true,
        "data": {
            "contract": updated,
            "residency_records_closed": closed,
        }
    })))
}

async fn expire_contracts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let today = Utc::now().date_naive();

    let mut filters = Map::new();
    filters.insert("status".to_string(), json!(ContractStatus::Active.as_str()));
    filters.insert("end_date__lt".to_string(), json!(today.to_string()));
    let mut patch = Map::new();
    patch.insert(
        "status".to_string(),
        json!(ContractStatus::Expired.as_str()),
    );

    let mut tx = begin(pool).await?;
    let expired = update_rows(&mut *tx, "contracts", &filters, &patch).await?;
    let room_ids = expired
        .iter()
        .map(|row| value_str(row, "room_id"))
        .filter(|id| !id.is_empty())
        .collect::<HashSet<_>>();
    for room_id in &room_ids {
        release_room_if_vacant(&mut tx, room_id).await?;
    }
    commit(tx).await?;

    tracing::info!(
        expired = expired.len(),
        rooms_released = room_ids.len(),
        "Expired contracts past end date"
    );

    Ok(Json(json!({
        "success": true,
        "data": {
            "expired": expired.len(),
            "contracts": expired,
        }
    })))
}

/// Tenants of a contract, each carrying the link's `is_primary` flag.
pub(crate) async fn load_contract_tenants<'c, E>(
    executor: E,
    contract_id: &str,
) -> AppResult<Vec<Value>>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows = sqlx::query(
        "SELECT row_to_json(t)::jsonb || jsonb_build_object('is_primary', ct.is_primary) AS row
         FROM contract_tenants ct
         JOIN tenants t ON t.id = ct.tenant_id
         WHERE ct.contract_id::text = $1
         ORDER BY ct.is_primary DESC, t.full_name ASC",
    )
    .bind(contract_id.trim())
    .fetch_all(executor)
    .await
    .map_err(map_db_error)?;

    Ok(rows
        .into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect())
}

/// ACTIVE contracts currently booked on a room.
pub(crate) async fn booked_stays<'c, E>(executor: E, room_id: &str) -> AppResult<Vec<BookedStay>>
where
    E: Executor<'c, Database = Postgres>,
{
    let mut filters = Map::new();
    filters.insert("room_id".to_string(), json!(room_id));
    filters.insert("status".to_string(), json!(ContractStatus::Active.as_str()));
    let rows = list_rows(executor, "contracts", Some(&filters), 5000, 0, "start_date", true).await?;
    Ok(rows.iter().filter_map(BookedStay::from_row).collect())
}

pub(crate) async fn count_active_contracts<'c, E>(executor: E, room_id: &str) -> AppResult<i64>
where
    E: Executor<'c, Database = Postgres>,
{
    let mut filters = Map::new();
    filters.insert("room_id".to_string(), json!(room_id));
    filters.insert("status".to_string(), json!(ContractStatus::Active.as_str()));
    count_rows(executor, "contracts", Some(&filters)).await
}

/// Puts the room back to AVAILABLE once no ACTIVE contract references it.
/// Returns the status written, if any.
pub(crate) async fn release_room_if_vacant(
    conn: &mut PgConnection,
    room_id: &str,
) -> AppResult<Option<RoomStatus>> {
    let Some(room) = find_row(&mut *conn, "rooms", room_id, "id").await? else {
        return Ok(None);
    };
    let remaining = count_active_contracts(&mut *conn, room_id).await?;
    let current = RoomStatus::parse(&value_str(&room, "status")).unwrap_or(RoomStatus::Available);
    let next = room_status_after_release(current, remaining);
    if next == current {
        return Ok(None);
    }
    set_room_status(conn, room_id, next).await?;
    Ok(Some(next))
}

async fn set_room_status(
    conn: &mut PgConnection,
    room_id: &str,
    status: RoomStatus,
) -> AppResult<Value> {
    let mut patch = Map::new();
    patch.insert("status".to_string(), json!(status.as_str()));
    update_row(&mut *conn, "rooms", room_id, &patch, "id").await
}

async fn insert_contract_tenants(
    conn: &mut PgConnection,
    contract_id: &str,
    selection: &TenantSelection,
) -> AppResult<()> {
    for tenant_id in &selection.tenant_ids {
        let mut link = Map::new();
        link.insert("contract_id".to_string(), json!(contract_id));
        link.insert("tenant_id".to_string(), json!(tenant_id));
        link.insert(
            "is_primary".to_string(),
            json!(selection.is_primary(tenant_id)),
        );
        create_row(&mut *conn, "contract_tenants", &link).await?;
    }
    Ok(())
}

async fn residency_entries(
    conn: &mut PgConnection,
    tenant_id: &str,
) -> AppResult<Vec<ResidencyEntry>> {
    let mut filters = Map::new();
    filters.insert("tenant_id".to_string(), json!(tenant_id));
    let rows = list_rows(
        &mut *conn,
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

/// Ends the tenant's temporary-residence records still running on `today`.
async fn close_residence(
    conn: &mut PgConnection,
    tenant_id: &str,
    today: NaiveDate,
) -> AppResult<usize> {
    let entries = residency_entries(conn, tenant_id).await?;
    let mut closed = 0;
    for entry in entries {
        if entry.record_type != RecordType::TemporaryResidence {
            continue;
        }
        if entry.span.end.is_some_and(|end| end <= today) {
            continue;
        }
        let end = closing_date(entry.span, today);
        let mut patch = Map::new();
        patch.insert("end_date".to_string(), json!(end.to_string()));
        update_row(&mut *conn, "residency_records", &entry.id, &patch, "id").await?;
        closed += 1;
    }
    Ok(closed)
}

async fn ensure_contract_number_free(pool: &PgPool, contract_number: &str) -> AppResult<()> {
    let mut filters = Map::new();
    filters.insert("contract_number".to_string(), json!(contract_number));
    if count_rows(pool, "contracts", Some(&filters)).await? > 0 {
        return Err(AppError::Conflict(
            "Contract number already exists".to_string(),
        ));
    }
    Ok(())
}

async fn ensure_tenants_exist(pool: &PgPool, tenant_ids: &[String]) -> AppResult<()> {
    let mut filters = Map::new();
    filters.insert(
        "id".to_string(),
        Value::Array(tenant_ids.iter().cloned().map(Value::String).collect()),
    );
    let found = count_rows(pool, "tenants", Some(&filters)).await?;
    if found != tenant_ids.len() as i64 {
        return Err(AppError::NotFound(
            "One or more tenants not found".to_string(),
        ));
    }
    Ok(())
}

fn distinct_ids(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

fn contract_status(row: &Value) -> AppResult<ContractStatus> {
    ContractStatus::parse(&value_str(row, "status"))
        .ok_or_else(|| AppError::Internal("Contract has an unknown status".to_string()))
}

fn by_contract(contract_id: &str) -> Map<String, Value> {
    let mut filters = Map::new();
    filters.insert("contract_id".to_string(), json!(contract_id));
    filters
}

async fn contract_detail(pool: &PgPool, mut contract: Value) -> AppResult<Value> {
    let contract_id = value_str(&contract, "id");
    let room = find_row(pool, "rooms", &value_str(&contract, "room_id"), "id").await?;
    let tenants = load_contract_tenants(pool, &contract_id).await?;
    let bills = list_rows(
        pool,
        "bills",
        Some(&by_contract(&contract_id)),
        500,
        0,
        "due_date",
        false,
    )
    .await?;

    if let Some(obj) = contract.as_object_mut() {
        obj.insert("room".to_string(), room.unwrap_or(Value::Null));
        obj.insert("tenants".to_string(), Value::Array(tenants));
        obj.insert("bills".to_string(), Value::Array(bills));
    }
    Ok(contract)
}

/// Adds room number and primary tenant name to list rows.
async fn enrich_contracts(pool: &PgPool, mut rows: Vec<Value>) -> AppResult<Vec<Value>> {
    if rows.is_empty() {
        return Ok(rows);
    }
    let contract_ids = rows
        .iter()
        .filter_map(|row| uuid::Uuid::parse_str(&value_str(row, "id")).ok())
        .collect::<Vec<_>>();
    let room_ids = rows
        .iter()
        .filter_map(|row| uuid::Uuid::parse_str(&value_str(row, "room_id")).ok())
        .collect::<Vec<_>>();

    let room_numbers = sqlx::query_as::<_, (String, String)>(
        "SELECT id::text, number FROM rooms WHERE id = ANY($1)",
    )
    .bind(room_ids)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?
    .into_iter()
    .collect::<HashMap<_, _>>();

    let primaries = sqlx::query_as::<_, (String, String, String)>(
        "SELECT ct.contract_id::text, t.id::text, t.full_name
         FROM contract_tenants ct
         JOIN tenants t ON t.id = ct.tenant_id
         WHERE ct.is_primary AND ct.contract_id = ANY($1)",
    )
    .bind(contract_ids)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?
    .into_iter()
    .map(|(contract_id, tenant_id, full_name)| {
        (
            contract_id,
            json!({ "id": tenant_id, "full_name": full_name }),
        )
    })
    .collect::<HashMap<_, _>>();

    for row in &mut rows {
        let room_number = room_numbers.get(&value_str(row, "room_id")).cloned();
        let primary = primaries.get(&value_str(row, "id")).cloned();
        if let Some(obj) = row.as_object_mut() {
            obj.insert("room_number".to_string(), json!(room_number));
            obj.insert(
                "primary_tenant".to_string(),
                primary.unwrap_or(Value::Null),
            );
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::distinct_ids;

    #[test]
    fn tenant_lookup_ids_are_trimmed_and_deduplicated() {
        let ids = vec![
            " t1 ".to_string(),
            "t2".to_string(),
            "t1".to_string(),
            "  ".to_string(),
        ];
        assert_eq!(distinct_ids(&ids), vec!["t1".to_string(), "t2".to_string()]);
        assert!(distinct_ids(&[]).is_empty());
    }
}
