use std::collections::HashMap;

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
    repository::table_service::{
        begin, commit, count_rows, create_row, delete_row, delete_rows, list_page, list_rows,
        update_row, TextSearch,
    },
    routes::{
        contracts::{count_active_contracts, load_contract_tenants, OUTSTANDING_BILL_STATUSES},
        fetch_or_404, filter_map, non_empty_opt, value_str,
    },
    schemas::{
        clamp_page, paginated, remove_nulls, serialize_to_map, validate_input,
        AvailableRoomsQuery, CreateRoomInput, RoomPath, RoomsQuery, UpdateRoomInput,
    },
    services::occupancy::{
        ensure_manual_room_status, ensure_room_deletable, find_conflict, BookedStay,
        ContractStatus, RoomStatus, Stay,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/rooms", axum::routing::get(list_rooms).post(create_room))
        .route("/rooms/available", axum::routing::get(available_rooms))
        .route(
            "/rooms/{room_id}",
            axum::routing::get(get_room)
                .put(update_room)
                .delete(delete_room),
        )
}

async fn list_rooms(
    State(state): State<AppState>,
    Query(query): Query<RoomsQuery>,
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
        ("floor", query.floor.map(|floor| json!(floor))),
        (
            "room_type",
            non_empty_opt(query.room_type.as_deref()).map(Value::String),
        ),
    ]);
    let search = non_empty_opt(query.search.as_deref());
    let (rows, total) = list_page(
        pool,
        "rooms",
        Some(&filters),
        search.as_deref().map(|term| TextSearch {
            columns: &["number"],
            term,
        }),
        page,
        limit,
        "number",
        true,
    )
    .await?;

    Ok(Json(paginated(rows, page, limit, total)))
}

async fn get_room(
    State(state): State<AppState>,
    Path(path): Path<RoomPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut room = fetch_or_404(pool, "rooms", &path.room_id, "Room not found").await?;
    let active_contract = active_contract_for(pool, &value_str(&room, "id")).await?;
    if let Some(obj) = room.as_object_mut() {
        obj.insert(
            "active_contract".to_string(),
            active_contract.unwrap_or(Value::Null),
        );
    }
    Ok(Json(room))
}

async fn create_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateRoomInput>,
) -> AppResult<impl IntoResponse> {
    require_user(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let number = payload.number.trim().to_string();
    ensure_number_free(pool, &number, None).await?;

    let status = match non_empty_opt(payload.status.as_deref()) {
        Some(raw) => parse_room_status(&raw)?,
        None => RoomStatus::Available,
    };
    ensure_manual_room_status(status, 0)?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("number".to_string(), json!(number));
    record.insert("status".to_string(), json!(status.as_str()));

    let created = create_row(pool, "rooms", &record).await?;
    tracing::info!(room_id = %value_str(&created, "id"), number = %number, "Room created");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_room(
    State(state): State<AppState>,
    Path(path): Path<RoomPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateRoomInput>,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let existing = fetch_or_404(pool, "rooms", &path.room_id, "Room not found").await?;
    let room_id = value_str(&existing, "id");

    let mut patch = remove_nulls(serialize_to_map(&payload));
    if let Some(number) = non_empty_opt(payload.number.as_deref()) {
        ensure_number_free(pool, &number, Some(&room_id)).await?;
        patch.insert("number".to_string(), json!(number));
    }
    if let Some(raw) = non_empty_opt(payload.status.as_deref()) {
        let status = parse_room_status(&raw)?;
        let active = count_active_contracts(pool, &room_id).await?;
        ensure_manual_room_status(status, active)?;
        patch.insert("status".to_string(), json!(status.as_str()));
    }
    if patch.is_empty() {
        return Ok(Json(existing));
    }

    let updated = update_row(pool, "rooms", &room_id, &patch, "id").await?;
    Ok(Json(updated))
}

async fn delete_room(
    State(state): State<AppState>,
    Path(path): Path<RoomPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let existing = fetch_or_404(pool, "rooms", &path.room_id, "Room not found").await?;
    let room_id = value_str(&existing, "id");
    let active_contracts = count_active_contracts(pool, &room_id).await?;
    let unpaid = filter_map(&[
        ("room_id", Some(json!(room_id))),
        ("status", Some(json!(OUTSTANDING_BILL_STATUSES))),
    ]);
    let unpaid_bills = count_rows(pool, "bills", Some(&unpaid)).await?;
    ensure_room_deletable(active_contracts, unpaid_bills)?;

    let by_room = filter_map(&[("room_id", Some(json!(room_id)))]);
    let mut tx = begin(pool).await?;
    let contracts = list_rows(&mut *tx, "contracts", Some(&by_room), 5000, 0, "created_at", true)
        .await?;
    let contract_ids = contracts
        .iter()
        .map(|row| json!(value_str(row, "id")))
        .collect::<Vec<_>>();
    let by_contracts = filter_map(&[("contract_id", Some(Value::Array(contract_ids)))]);

    let bills = delete_rows(&mut *tx, "bills", &by_room).await?
        + delete_rows(&mut *tx, "bills", &by_contracts).await?;
    delete_rows(&mut *tx, "contract_tenants", &by_contracts).await?;
    delete_rows(&mut *tx, "contracts", &by_room).await?;
    delete_rows(&mut *tx, "meter_readings", &by_room).await?;
    let deleted = delete_row(&mut *tx, "rooms", &room_id, "id").await?;
    commit(tx).await?;

    tracing::info!(
        room_id = %room_id,
        contracts = contracts.len(),
        bills,
        "Room deleted"
    );
    Ok(Json(deleted))
}

async fn available_rooms(
    State(state): State<AppState>,
    Query(query): Query<AvailableRoomsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let stay = Stay::parse(&query.start_date, &query.end_date)?;

    let not_maintenance = filter_map(&[(
        "status__ne",
        Some(json!(RoomStatus::Maintenance.as_str())),
    )]);
    let rooms = list_rows(pool, "rooms", Some(&not_maintenance), 5000, 0, "number", true).await?;

    let active = filter_map(&[("status", Some(json!(ContractStatus::Active.as_str())))]);
    let contracts = list_rows(pool, "contracts", Some(&active), 5000, 0, "start_date", true).await?;
    let mut booked_by_room = HashMap::<String, Vec<BookedStay>>::new();
    for row in &contracts {
        if let Some(stay) = BookedStay::from_row(row) {
            booked_by_room
                .entry(value_str(row, "room_id"))
                .or_default()
                .push(stay);
        }
    }

    let available = rooms
        .into_iter()
        .filter(|room| {
            booked_by_room
                .get(&value_str(room, "id"))
                .is_none_or(|booked| find_conflict(stay, booked, None).is_none())
        })
        .collect::<Vec<_>>();

    Ok(Json(json!({ "data": available })))
}

/// The room's ACTIVE contract with its tenants, if any.
async fn active_contract_for(pool: &PgPool, room_id: &str) -> AppResult<Option<Value>> {
    let filters = filter_map(&[
        ("room_id", Some(json!(room_id))),
        ("status", Some(json!(ContractStatus::Active.as_str()))),
    ]);
    let mut rows = list_rows(pool, "contracts", Some(&filters), 1, 0, "start_date", false).await?;
    let Some(mut contract) = rows.pop() else {
        return Ok(None);
    };

    let tenants = load_contract_tenants(pool, &value_str(&contract, "id")).await?;
    if let Some(obj) = contract.as_object_mut() {
        obj.insert("tenants".to_string(), Value::Array(tenants));
    }
    Ok(Some(contract))
}

async fn ensure_number_free(pool: &PgPool, number: &str, exclude_id: Option<&str>) -> AppResult<()> {
    let mut filters = Map::new();
    filters.insert("number".to_string(), json!(number));
    if let Some(room_id) = exclude_id {
        filters.insert("id__ne".to_string(), json!(room_id));
    }
    if count_rows(pool, "rooms", Some(&filters)).await? > 0 {
        return Err(AppError::Conflict("Room number already exists".to_string()));
    }
    Ok(())
}

fn parse_room_status(raw: &str) -> AppResult<RoomStatus> {
    RoomStatus::parse(raw).ok_or_else(|| AppError::BadRequest(format!("Invalid room status '{raw}'")))
}
