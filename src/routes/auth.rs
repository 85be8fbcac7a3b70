use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::{
    accounts::{db_pool, find_user_by_username, insert_user, list_users, public_user, Role},
    auth::{issue_token, require_admin, require_user, verify_password, AuthUser},
    error::{AppError, AppResult},
    repository::table_service::delete_row,
    routes::fetch_or_404,
    schemas::{validate_input, CreateUserInput, LoginInput, UserPath},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/auth/login", axum::routing::post(login))
        .route("/auth/me", axum::routing::get(me))
        .route("/users", axum::routing::get(get_users).post(create_user))
        .route("/users/{user_id}", axum::routing::delete(delete_user))
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let invalid = || AppError::Unauthorized("Invalid username or password".to_string());

    let row = find_user_by_username(&state, &payload.username)
        .await?
        .ok_or_else(invalid)?;
    let hash = row
        .get("password_hash")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !verify_password(&payload.password, hash)? {
        tracing::warn!(username = %payload.username.trim(), "Rejected login attempt");
        return Err(invalid());
    }

    let user = AuthUser::from_row(&row)?;
    let (token, expires_at) = issue_token(&state.config, &user)?;
    tracing::info!(user_id = %user.id, username = %user.username, "User logged in");

    Ok(Json(json!({
        "token": token,
        "expires_at": expires_at,
        "user": public_user(row),
    })))
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers).await?;
    Ok(Json(json!(user)))
}

async fn get_users(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let users = list_users(&state).await?;
    Ok(Json(json!({ "data": users })))
}

async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateUserInput>,
) -> AppResult<impl IntoResponse> {
    let admin = require_admin(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let role = Role::parse(&payload.role)
        .ok_or_else(|| AppError::BadRequest(format!("Invalid role '{}'", payload.role)))?;
    if find_user_by_username(&state, &payload.username)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict("Username already exists".to_string()));
    }

    let created = insert_user(
        pool,
        &payload.username,
        &payload.password,
        &payload.full_name,
        role,
    )
    .await?;
    tracing::info!(
        username = %payload.username.trim(),
        role = role.as_str(),
        created_by = %admin.username,
        "User created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

async fn delete_user(
    State(state): State<AppState>,
    Path(path): Path<UserPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let admin = require_admin(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let existing = fetch_or_404(pool, "users", &path.user_id, "User not found").await?;
    let user_id = existing
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if user_id == admin.id {
        return Err(AppError::BadRequest(
            "You cannot delete your own account".to_string(),
        ));
    }

    let deleted = delete_row(pool, "users", &user_id, "id").await?;
    tracing::info!(user_id = %user_id, deleted_by = %admin.username, "User deleted");
    Ok(Json(public_user(deleted)))
}
