use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub dev_auth_overrides_enabled: bool,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub run_migrations: bool,
    pub jwt_secret: Option<String>,
    pub jwt_expires_in_hours: i64,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub default_electric_unit_price: f64,
    pub default_water_unit_price: f64,
    pub default_service_fee: f64,
    pub bill_due_day: u32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Room Rental API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/api")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:3000")),
            dev_auth_overrides_enabled: env_parse_bool_or("DEV_AUTH_OVERRIDES_ENABLED", false),
            rate_limit_enabled: env_parse_bool_or("RATE_LIMIT_ENABLED", true),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            database_url: env_opt("DATABASE_URL"),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 10),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: env_parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            run_migrations: env_parse_bool_or("RUN_MIGRATIONS", true),
            jwt_secret: env_opt("JWT_SECRET"),
            jwt_expires_in_hours: env_parse_or("JWT_EXPIRES_IN_HOURS", 24),
            admin_username: env_opt("ADMIN_USERNAME"),
            admin_password: env_opt("ADMIN_PASSWORD"),
            default_electric_unit_price: env_parse_or("DEFAULT_ELECTRIC_UNIT_PRICE", 3500.0),
            default_water_unit_price: env_parse_or("DEFAULT_WATER_UNIT_PRICE", 15000.0),
            default_service_fee: env_parse_or("DEFAULT_SERVICE_FEE", 0.0),
            bill_due_day: env_parse_or::<u32>("BILL_DUE_DAY", 5).clamp(1, 28),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    pub fn auth_dev_overrides_enabled(&self) -> bool {
        if self.is_production() {
            return false;
        }
        self.dev_auth_overrides_enabled
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    parse_bool(env_opt(key).as_deref()).unwrap_or(default)
}

fn parse_bool(raw: Option<&str>) -> Option<bool> {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("1" | "true" | "yes" | "on") => Some(true),
        Some("0" | "false" | "no" | "off") => Some(false),
        _ => None,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/api".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        app_name: "Room Rental API".to_string(),
        environment: "test".to_string(),
        api_prefix: "/api".to_string(),
        host: "127.0.0.1".to_string(),
        port: 8000,
        cors_origins: vec!["http://localhost:3000".to_string()],
        dev_auth_overrides_enabled: false,
        rate_limit_enabled: false,
        rate_limit_per_second: 10,
        rate_limit_burst_size: 100,
        database_url: None,
        db_pool_max_connections: 1,
        db_pool_min_connections: 0,
        db_pool_acquire_timeout_seconds: 1,
        db_pool_idle_timeout_seconds: 60,
        run_migrations: false,
        jwt_secret: Some("test-secret".to_string()),
        jwt_expires_in_hours: 1,
        admin_username: None,
        admin_password: None,
        default_electric_unit_price: 3500.0,
        default_water_unit_price: 15000.0,
        default_service_fee: 100000.0,
        bill_due_day: 5,
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_prefix, parse_bool, parse_csv, test_config};

    #[test]
    fn normalizes_prefix() {
        assert_eq!(normalize_prefix("api"), "/api");
        assert_eq!(normalize_prefix("/api/"), "/api");
        assert_eq!(normalize_prefix(""), "/api");
        assert_eq!(normalize_prefix("/v1//"), "/v1");
    }

    #[test]
    fn parses_bool_flags() {
        assert_eq!(parse_bool(Some("YES")), Some(true));
        assert_eq!(parse_bool(Some("off")), Some(false));
        assert_eq!(parse_bool(Some("maybe")), None);
        assert_eq!(parse_bool(None), None);
    }

    #[test]
    fn splits_csv_origins() {
        assert_eq!(
            parse_csv(" http://a.test , ,http://b.test"),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }

    #[test]
    fn dev_overrides_are_disabled_in_production() {
        let mut config = test_config();
        config.dev_auth_overrides_enabled = true;
        assert!(config.auth_dev_overrides_enabled());
        config.environment = "Production".to_string();
        assert!(!config.auth_dev_overrides_enabled());
    }
}
