use axum::{extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};

use crate::{
    accounts::db_pool,
    auth::{require_admin, require_user},
    error::AppResult,
    repository::table_service::{begin, commit},
    schemas::{validate_input, UpdateSettingsInput},
    services::settings::{
        load_tariff, store_setting, tariff_json, ELECTRIC_UNIT_PRICE, SERVICE_FEE,
        WATER_UNIT_PRICE,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/settings",
        axum::routing::get(get_settings).put(update_settings),
    )
}

async fn get_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let tariff = load_tariff(pool, &state.config).await?;
    Ok(Json(json!({ "success": true, "data": tariff_json(&tariff) })))
}

async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpdateSettingsInput>,
) -> AppResult<Json<Value>> {
    let admin = require_admin(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let changes = [
        (ELECTRIC_UNIT_PRICE, payload.electric_unit_price),
        (WATER_UNIT_PRICE, payload.water_unit_price),
        (SERVICE_FEE, payload.service_fee),
    ];
    let mut tx = begin(pool).await?;
    for (key, value) in changes {
        if let Some(value) = value {
            store_setting(&mut *tx, key, value).await?;
        }
    }
    commit(tx).await?;

    let tariff = load_tariff(pool, &state.config).await?;
    tracing::info!(updated_by = %admin.username, "Billing settings updated");
    Ok(Json(json!({ "success": true, "data": tariff_json(&tariff) })))
}
