use serde_json::{json, Value};
use sqlx::{Executor, Postgres};

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    repository::table_service::map_db_error,
    services::billing::Tariff,
};

pub const ELECTRIC_UNIT_PRICE: &str = "electric_unit_price";
pub const WATER_UNIT_PRICE: &str = "water_unit_price";
pub const SERVICE_FEE: &str = "service_fee";

pub const KNOWN_KEYS: &[&str] = &[ELECTRIC_UNIT_PRICE, WATER_UNIT_PRICE, SERVICE_FEE];

pub fn default_tariff(config: &AppConfig) -> Tariff {
    Tariff {
        electric_unit_price: config.default_electric_unit_price,
        water_unit_price: config.default_water_unit_price,
        service_fee: config.default_service_fee,
    }
}

/// Stored values override defaults; unparseable or negative stored values
/// are ignored.
pub fn tariff_from_pairs(pairs: &[(String, String)], defaults: Tariff) -> Tariff {
    let mut tariff = defaults;
    for (key, raw) in pairs {
        let Some(value) = raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite() && *value >= 0.0)
        else {
            tracing::warn!(key = %key, value = %raw, "Ignoring invalid billing setting");
            continue;
        };
        match key.as_str() {
            ELECTRIC_UNIT_PRICE => tariff.electric_unit_price = value,
            WATER_UNIT_PRICE => tariff.water_unit_price = value,
            SERVICE_FEE => tariff.service_fee = value,
            _ => {}
        }
    }
    tariff
}

pub fn tariff_json(tariff: &Tariff) -> Value {
    json!({
        ELECTRIC_UNIT_PRICE: tariff.electric_unit_price,
        WATER_UNIT_PRICE: tariff.water_unit_price,
        SERVICE_FEE: tariff.service_fee,
    })
}

pub async fn load_tariff<'c, E>(executor: E, config: &AppConfig) -> AppResult<Tariff>
where
    E: Executor<'c, Database = Postgres>,
{
    let pairs = sqlx::query_as::<_, (String, String)>(
        "SELECT key, value FROM settings WHERE key = ANY($1)",
    )
    .bind(KNOWN_KEYS.iter().map(|key| key.to_string()).collect::<Vec<_>>())
    .fetch_all(executor)
    .await
    .map_err(map_db_error)?;

    Ok(tariff_from_pairs(&pairs, default_tariff(config)))
}

pub async fn store_setting<'c, E>(executor: E, key: &str, value: f64) -> AppResult<()>
where
    E: Executor<'c, Database = Postgres>,
{
    if !KNOWN_KEYS.contains(&key) {
        return Err(AppError::BadRequest(format!("Unknown setting '{key}'")));
    }
    if !value.is_finite() || value < 0.0 {
        return Err(AppError::BadRequest(format!(
            "{key} must be a non-negative number"
        )));
    }

    sqlx::query(
        "INSERT INTO settings (key, value, updated_at)
         VALUES ($1, $2, now())
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(executor)
    .await
    .map_err(map_db_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{default_tariff, tariff_from_pairs, tariff_json, SERVICE_FEE, WATER_UNIT_PRICE};
    use crate::config::test_config;

    #[test]
    fn stored_values_override_defaults() {
        let defaults = default_tariff(&test_config());
        let tariff = tariff_from_pairs(
            &[
                (WATER_UNIT_PRICE.to_string(), "20000".to_string()),
                (SERVICE_FEE.to_string(), "not-a-number".to_string()),
                ("unrelated".to_string(), "1".to_string()),
            ],
            defaults,
        );
        assert_eq!(tariff.water_unit_price, 20000.0);
        assert_eq!(tariff.service_fee, defaults.service_fee);
        assert_eq!(tariff.electric_unit_price, defaults.electric_unit_price);
    }

    #[test]
    fn negative_stored_values_are_ignored() {
        let defaults = default_tariff(&test_config());
        let tariff = tariff_from_pairs(&[(SERVICE_FEE.to_string(), "-5".to_string())], defaults);
        assert_eq!(tariff.service_fee, defaults.service_fee);
    }

    #[test]
    fn renders_settings_object() {
        let rendered = tariff_json(&default_tariff(&test_config()));
        assert_eq!(rendered["electric_unit_price"], json!(3500.0));
        assert_eq!(rendered["service_fee"], json!(100000.0));
    }
}
