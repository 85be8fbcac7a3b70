use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Row};

use crate::{
    auth::hash_password,
    config::AppConfig,
    error::AppError,
    repository::table_service::map_db_error,
    state::AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Staff,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Staff => "STAFF",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Some(Self::Admin),
            "STAFF" => Some(Self::Staff),
            _ => None,
        }
    }
}

pub(crate) fn db_pool(state: &AppState) -> Result<&PgPool, AppError> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

/// Strips secrets before a user row leaves the service.
pub fn public_user(mut row: Value) -> Value {
    if let Some(obj) = row.as_object_mut() {
        obj.remove("password_hash");
    }
    row
}

pub async fn find_user_by_id(state: &AppState, user_id: &str) -> Result<Option<Value>, AppError> {
    if uuid::Uuid::parse_str(user_id.trim()).is_err() {
        return Ok(None);
    }
    let pool = db_pool(state)?;
    let row = sqlx::query(
        "SELECT row_to_json(t) AS row
         FROM users t
         WHERE id = $1::uuid
         LIMIT 1",
    )
    .bind(user_id.trim())
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?;

    Ok(row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten()))
}

pub async fn find_user_by_username(
    state: &AppState,
    username: &str,
) -> Result<Option<Value>, AppError> {
    let pool = db_pool(state)?;
    let row = sqlx::query(
        "SELECT row_to_json(t) AS row
         FROM users t
         WHERE lower(username) = lower($1)
         LIMIT 1",
    )
    .bind(username.trim())
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?;

    Ok(row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten()))
}

pub async fn list_users(state: &AppState) -> Result<Vec<Value>, AppError> {
    let pool = db_pool(state)?;
    let rows = sqlx::query(
        "SELECT row_to_json(t) AS row
         FROM users t
         ORDER BY created_at ASC
         LIMIT 500",
    )
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    Ok(rows
        .into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .map(public_user)
        .collect())
}

pub async fn insert_user(
    pool: &PgPool,
    username: &str,
    password: &str,
    full_name: &str,
    role: Role,
) -> Result<Value, AppError> {
    let password_hash = hash_password(password)?;
    let row = sqlx::query(
        "INSERT INTO users (username, password_hash, full_name, role)
         VALUES ($1, $2, $3, $4)
         RETURNING row_to_json(users.*) AS row",
    )
    .bind(username.trim())
    .bind(&password_hash)
    .bind(full_name.trim())
    .bind(role.as_str())
    .fetch_one(pool)
    .await
    .map_err(|error| match map_db_error(error) {
        AppError::Conflict(_) => AppError::Conflict("Username already exists".to_string()),
        other => other,
    })?;

    row.try_get::<Option<Value>, _>("row")
        .ok()
        .flatten()
        .map(public_user)
        .ok_or_else(|| AppError::Internal("Could not create user.".to_string()))
}

/// Creates the bootstrap administrator when the users table is empty and
/// ADMIN_USERNAME / ADMIN_PASSWORD are configured.
pub async fn ensure_admin_user(pool: &PgPool, config: &AppConfig) -> Result<(), AppError> {
    let (Some(username), Some(password)) = (
        config.admin_username.as_deref(),
        config.admin_password.as_deref(),
    ) else {
        return Ok(());
    };

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*)::bigint FROM users")
        .fetch_one(pool)
        .await
        .map_err(map_db_error)?;
    if existing > 0 {
        return Ok(());
    }

    insert_user(pool, username, password, "Administrator", Role::Admin).await?;
    tracing::info!(username, "Seeded administrator account");
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{public_user, Role};

    #[test]
    fn parses_roles_case_insensitively() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse(" STAFF "), Some(Role::Staff));
        assert_eq!(Role::parse("owner"), None);
        assert_eq!(Role::Admin.as_str(), "ADMIN");
    }

    #[test]
    fn public_user_drops_password_hash() {
        let row = public_user(json!({
            "id": "1",
            "username": "admin",
            "password_hash": "$argon2id$v=19$..."
        }));
        assert!(row.get("password_hash").is_none());
        assert_eq!(row.get("username").and_then(|v| v.as_str()), Some("admin"));
    }
}
