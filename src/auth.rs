use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    accounts::{find_user_by_id, Role},
    config::AppConfig,
    error::{AppError, AppResult},
    state::AppState,
};

/// JWT claims carried in every bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    pub full_name: String,
    pub role: Role,
}

impl AuthUser {
    pub fn from_row(row: &Value) -> AppResult<Self> {
        let field = |key: &str| {
            row.get(key)
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
                .unwrap_or_default()
        };
        let id = field("id");
        if id.is_empty() {
            return Err(AppError::Unauthorized(
                "Unauthorized: missing user.".to_string(),
            ));
        }
        Ok(Self {
            id,
            username: field("username"),
            full_name: field("full_name"),
            role: Role::parse(&field("role")).unwrap_or(Role::Staff),
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

pub fn issue_token(config: &AppConfig, user: &AuthUser) -> AppResult<(String, i64)> {
    let secret = jwt_secret(config)?;
    let now = Utc::now().timestamp();
    let expires_at = now + config.jwt_expires_in_hours.max(1) * 3600;
    let claims = Claims {
        sub: user.id.clone(),
        username: user.username.clone(),
        role: user.role,
        iat: now,
        exp: expires_at,
    };

    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|error| AppError::Internal(format!("Could not sign token: {error}")))?;
    Ok((token, expires_at))
}

pub fn decode_token(config: &AppConfig, token: &str) -> AppResult<Claims> {
    let secret = jwt_secret(config)?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["sub", "exp"]);

    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|error| match error.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AppError::Unauthorized("Unauthorized: token has expired.".to_string())
        }
        _ => AppError::Unauthorized("Unauthorized: invalid token.".to_string()),
    })
}

fn jwt_secret(config: &AppConfig) -> AppResult<&str> {
    config.jwt_secret.as_deref().ok_or_else(|| {
        AppError::ServiceUnavailable("Authentication is not configured. Set JWT_SECRET.".to_string())
    })
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|value| !value.is_empty())
}

/// Resolves the calling user from the bearer token (or the dev override
/// header) and confirms the account still exists.
pub async fn require_user(state: &AppState, headers: &HeaderMap) -> AppResult<AuthUser> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(user_id) = headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            return load_user(state, user_id).await;
        }
    }

    let token = bearer_token(headers).ok_or_else(|| {
        AppError::Unauthorized("Unauthorized: missing bearer token.".to_string())
    })?;
    let claims = decode_token(&state.config, token)?;
    load_user(state, &claims.sub).await
}

pub async fn require_admin(state: &AppState, headers: &HeaderMap) -> AppResult<AuthUser> {
    let user = require_user(state, headers).await?;
    if !user.is_admin() {
        return Err(AppError::Forbidden(
            "Forbidden: administrator role required.".to_string(),
        ));
    }
    Ok(user)
}

async fn load_user(state: &AppState, user_id: &str) -> AppResult<AuthUser> {
    let row = find_user_by_id(state, user_id).await?.ok_or_else(|| {
        AppError::Unauthorized("Unauthorized: user no longer exists.".to_string())
    })?;
    AuthUser::from_row(&row)
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|error| AppError::Internal(format!("Could not hash password: {error}")))
}

/// `Ok(false)` on mismatch; `Err` only when the stored hash is malformed.
pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|error| AppError::Internal(format!("Stored password hash is invalid: {error}")))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(error) => Err(AppError::Internal(format!(
            "Could not verify password: {error}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{header::AUTHORIZATION, HeaderMap, HeaderValue};
    use chrono::Utc;
    use jsonwebtoken::{EncodingKey, Header};

    use super::{
        bearer_token, decode_token, hash_password, issue_token, verify_password, AuthUser, Claims,
    };
    use crate::{accounts::Role, config::test_config, error::AppError};

    fn admin() -> AuthUser {
        AuthUser {
            id: "550e8400-e29b-41d4-a716-446655440000".to_string(),
            username: "admin".to_string(),
            full_name: "Admin".to_string(),
            role: Role::Admin,
        }
    }

    #[test]
    fn token_round_trip_keeps_identity() {
        let config = test_config();
        let (token, expires_at) = issue_token(&config, &admin()).unwrap();
        let claims = decode_token(&config, &token).unwrap();
        assert_eq!(claims.sub, admin().id);
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.exp, expires_at);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let config = test_config();
        let (token, _) = issue_token(&config, &admin()).unwrap();

        let mut other = test_config();
        other.jwt_secret = Some("another-secret".to_string());
        assert!(matches!(
            decode_token(&other, &token),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = test_config();
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: admin().id,
            username: "admin".to_string(),
            role: Role::Admin,
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        let error = decode_token(&config, &token).unwrap_err();
        assert_eq!(error.to_string(), "Unauthorized: token has expired.");
    }

    #[test]
    fn missing_secret_is_a_configuration_error() {
        let mut config = test_config();
        config.jwt_secret = None;
        assert!(matches!(
            issue_token(&config, &admin()),
            Err(AppError::ServiceUnavailable(_))
        ));
    }

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer   "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("s3cret-pass").unwrap();
        assert!(verify_password("s3cret-pass", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
        assert!(verify_password("s3cret-pass", "not-a-hash").is_err());
    }

    #[test]
    fn builds_user_from_row() {
        let row = serde_json::json!({
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "username": "staff",
            "full_name": "Front Desk",
            "role": "STAFF"
        });
        let user = AuthUser::from_row(&row).unwrap();
        assert_eq!(user.role, Role::Staff);
        assert!(!user.is_admin());
        assert!(AuthUser::from_row(&serde_json::json!({})).is_err());
    }
}
