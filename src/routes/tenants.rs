use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};
use sqlx::{PgPool, Row};

use crate::{
    accounts::db_pool,
    auth::require_user,
    error::{AppError, AppResult},
    repository::table_service::{
        begin, commit, count_rows, create_row, delete_row, delete_rows, list_page, list_rows,
        map_db_error, update_row, TextSearch,
    },
    routes::{
        contracts::OUTSTANDING_BILL_STATUSES, fetch_or_404, filter_map, non_empty_opt, value_str,
    },
    schemas::{
        clamp_page, paginated, remove_nulls, serialize_to_map, validate_input, CreateTenantInput,
        TenantPath, TenantsQuery, UpdateTenantInput,
    },
    services::occupancy::{ensure_tenant_deletable, parse_date},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/tenants",
            axum::routing::get(list_tenants).post(create_tenant),
        )
        .route(
            "/tenants/{tenant_id}",
            axum::routing::get(get_tenant)
                .put(update_tenant)
                .delete(delete_tenant),
        )
}

async fn list_tenants(
    State(state): State<AppState>,
    Query(query): Query<TenantsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let (page, limit) = clamp_page(query.page, query.limit);

    let search = non_empty_opt(query.search.as_deref());
    let (rows, total) = list_page(
        pool,
        "tenants",
        None,
        search.as_deref().map(|term| TextSearch {
            columns: &["full_name", "id_card", "phone"],
            term,
        }),
        page,
        limit,
        "full_name",
        true,
    )
    .await?;

    Ok(Json(paginated(rows, page, limit, total)))
}

async fn get_tenant(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut tenant = fetch_or_404(pool, "tenants", &path.tenant_id, "Tenant not found").await?;
    let tenant_id = value_str(&tenant, "id");
    let contracts = tenant_contracts(pool, &tenant_id).await?;
    let residency = list_rows(
        pool,
        "residency_records",
        Some(&filter_map(&[("tenant_id", Some(json!(tenant_id)))])),
        500,
        0,
        "start_date",
        false,
    )
    .await?;

    if let Some(obj) = tenant.as_object_mut() {
        obj.insert("contracts".to_string(), Value::Array(contracts));
        obj.insert("residency_records".to_string(), Value::Array(residency));
    }
    Ok(Json(tenant))
}

async fn create_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateTenantInput>,
) -> AppResult<impl IntoResponse> {
    require_user(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let id_card = payload.id_card.trim().to_string();
    ensure_id_card_free(pool, &id_card, None).await?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("id_card".to_string(), json!(id_card));
    record.insert("full_name".to_string(), json!(payload.full_name.trim()));
    normalize_birth_date(&mut record)?;

    let created = create_row(pool, "tenants", &record).await?;
    tracing::info!(tenant_id = %value_str(&created, "id"), "Tenant created");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_tenant(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateTenantInput>,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let existing = fetch_or_404(pool, "tenants", &path.tenant_id, "Tenant not found").await?;
    let tenant_id = value_str(&existing, "id");

    let mut patch = remove_nulls(serialize_to_map(&payload));
    if let Some(id_card) = non_empty_opt(payload.id_card.as_deref()) {
        ensure_id_card_free(pool, &id_card, Some(&tenant_id)).await?;
        patch.insert("id_card".to_string(), json!(id_card));
    }
    normalize_birth_date(&mut patch)?;
    if patch.is_empty() {
        return Ok(Json(existing));
    }

    let updated = update_row(pool, "tenants", &tenant_id, &patch, "id").await?;
    Ok(Json(updated))
}

async fn delete_tenant(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let existing = fetch_or_404(pool, "tenants", &path.tenant_id, "Tenant not found").await?;
    let tenant_id = value_str(&existing, "id");

    let (active_contracts, unpaid_bills) = sqlx::query_as::<_, (i64, i64)>(
        "SELECT
           (SELECT COUNT(*)
              FROM contract_tenants ct
              JOIN contracts c ON c.id = ct.contract_id
             WHERE ct.tenant_id::text = $1 AND c.status = 'ACTIVE')::bigint,
           (SELECT COUNT(*)
              FROM contract_tenants ct
              JOIN bills b ON b.contract_id = ct.contract_id
             WHERE ct.tenant_id::text = $1 AND b.status = ANY($2))::bigint",
    )
    .bind(&tenant_id)
    .bind(&OUTSTANDING_BILL_STATUSES[..])
    .fetch_one(pool)
    .await
    .map_err(map_db_error)?;
    ensure_tenant_deletable(active_contracts, unpaid_bills)?;

    let by_tenant = filter_map(&[("tenant_id", Some(json!(tenant_id)))]);
    let mut tx = begin(pool).await?;
    delete_rows(&mut *tx, "residency_records", &by_tenant).await?;
    delete_rows(&mut *tx, "contract_tenants", &by_tenant).await?;
    let deleted = delete_row(&mut *tx, "tenants", &tenant_id, "id").await?;
    commit(tx).await?;

    tracing::info!(tenant_id = %tenant_id, "Tenant deleted");
    Ok(Json(deleted))
}

/// Every contract the tenant belongs to, newest first, with room number and
/// the tenant's primary flag.
async fn tenant_contracts(pool: &PgPool, tenant_id: &str) -> AppResult<Vec<Value>> {
    let rows = sqlx::query(
        "SELECT row_to_json(c)::jsonb
                || jsonb_build_object('room_number', r.number, 'is_primary', ct.is_primary) AS row
         FROM contract_tenants ct
         JOIN contracts c ON c.id = ct.contract_id
         JOIN rooms r ON r.id = c.room_id
         WHERE ct.tenant_id::text = $1
         ORDER BY c.start_date DESC",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    Ok(rows
        .into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect())
}

async fn ensure_id_card_free(
    pool: &PgPool,
    id_card: &str,
    exclude_id: Option<&str>,
) -> AppResult<()> {
    let mut filters = Map::new();
    filters.insert("id_card".to_string(), json!(id_card));
    if let Some(tenant_id) = exclude_id {
        filters.insert("id__ne".to_string(), json!(tenant_id));
    }
    if count_rows(pool, "tenants", Some(&filters)).await? > 0 {
        return Err(AppError::Conflict("ID card already exists".to_string()));
    }
    Ok(())
}

fn normalize_birth_date(record: &mut Map<String, Value>) -> AppResult<()> {
    let Some(raw) = record.get("date_of_birth").and_then(Value::as_str) else {
        return Ok(());
    };
    if raw.trim().is_empty() {
        record.remove("date_of_birth");
        return Ok(());
    }
    let parsed = parse_date(raw, "date_of_birth")?;
    record.insert("date_of_birth".to_string(), json!(parsed.to_string()));
    Ok(())
}
