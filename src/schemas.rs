use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::BadRequest(format!("Validation failed: {errors}")))
}

fn default_floor() -> i32 {
    1
}
fn default_room_type() -> String {
    "SINGLE".to_string()
}
fn default_staff_role() -> String {
    "STAFF".to_string()
}
fn default_page() -> i64 {
    1
}
fn default_limit_20() -> i64 {
    20
}
fn default_expiring_days() -> i64 {
    30
}

/// Page number and page size after clamping.
pub fn clamp_page(page: i64, limit: i64) -> (i64, i64) {
    (page.max(1), limit.clamp(1, 100))
}

pub fn paginated(data: Vec<Value>, page: i64, limit: i64, total: i64) -> Value {
    let total_pages = if total <= 0 { 0 } else { (total + limit - 1) / limit };
    json!({
        "data": data,
        "pagination": {
            "page": page,
            "limit": limit,
            "total": total,
            "total_pages": total_pages,
        }
    })
}

pub fn serialize_to_map<T>(value: &T) -> serde_json::Map<String, serde_json::Value>
where
    T: serde::Serialize,
{
    let json = serde_json::to_value(value)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}

// Rooms

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateRoomInput {
    #[validate(length(min = 1, max = 20))]
    pub number: String,
    #[serde(default = "default_floor")]
    pub floor: i32,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub area: f64,
    #[serde(default = "default_room_type")]
    #[validate(length(min = 1, max = 50))]
    pub room_type: String,
    #[validate(range(min = 0.0))]
    pub base_price: f64,
    pub status: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateRoomInput {
    #[validate(length(min = 1, max = 20))]
    pub number: Option<String>,
    pub floor: Option<i32>,
    #[validate(range(min = 0.0))]
    pub area: Option<f64>,
    #[validate(length(min = 1, max = 50))]
    pub room_type: Option<String>,
    #[validate(range(min = 0.0))]
    pub base_price: Option<f64>,
    pub status: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomsQuery {
    pub status: Option<String>,
    pub floor: Option<i32>,
    pub room_type: Option<String>,
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit_20")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailableRoomsQuery {
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomPath {
    pub room_id: String,
}

// Tenants

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateTenantInput {
    #[validate(length(min = 1, max = 100))]
    pub full_name: String,
    pub date_of_birth: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub id_card: String,
    pub hometown: Option<String>,
    #[validate(length(max = 20))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateTenantInput {
    #[validate(length(min = 1, max = 100))]
    pub full_name: Option<String>,
    pub date_of_birth: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub id_card: Option<String>,
    pub hometown: Option<String>,
    #[validate(length(max = 20))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenantsQuery {
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit_20")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenantPath {
    pub tenant_id: String,
}

// Contracts

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateContractInput {
    #[validate(length(min = 1, max = 50))]
    pub contract_number: String,
    #[validate(length(min = 1))]
    pub room_id: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub deposit: f64,
    #[validate(length(min = 1))]
    pub tenant_ids: Vec<String>,
    #[validate(length(min = 1))]
    pub primary_tenant_id: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateContractInput {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[validate(range(min = 0.0))]
    pub deposit: Option<f64>,
    pub status: Option<String>,
    pub notes: Option<String>,
    pub tenant_ids: Option<Vec<String>>,
    pub primary_tenant_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractsQuery {
    pub status: Option<String>,
    pub room_id: Option<String>,
    pub tenant_id: Option<String>,
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit_20")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractPath {
    pub contract_id: String,
}

// Bills

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct GenerateBillsInput {
    pub month: i64,
    pub year: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateBillInput {
    #[validate(length(min = 1))]
    pub contract_id: String,
    pub month: i64,
    pub year: i64,
    #[serde(default)]
    pub rent_amount: f64,
    #[serde(default)]
    pub electric_amount: f64,
    #[serde(default)]
    pub water_amount: f64,
    #[serde(default)]
    pub service_amount: f64,
    pub total_amount: Option<f64>,
    #[validate(range(min = 0.0))]
    pub electric_usage: Option<f64>,
    #[validate(range(min = 0.0))]
    pub water_usage: Option<f64>,
    pub due_date: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateBillInput {
    pub rent_amount: Option<f64>,
    pub electric_amount: Option<f64>,
    pub water_amount: Option<f64>,
    pub service_amount: Option<f64>,
    pub total_amount: Option<f64>,
    #[validate(range(min = 0.0))]
    pub electric_usage: Option<f64>,
    #[validate(range(min = 0.0))]
    pub water_usage: Option<f64>,
    pub status: Option<String>,
    pub due_date: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayBillInput {
    pub paid_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillsQuery {
    pub status: Option<String>,
    pub month: Option<i32>,
    pub year: Option<i32>,
    pub room_id: Option<String>,
    pub contract_id: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit_20")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillPath {
    pub bill_id: String,
}

// Meter readings

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateMeterReadingInput {
    #[validate(length(min = 1))]
    pub room_id: String,
    #[validate(range(min = 1, max = 12))]
    pub month: i32,
    #[validate(range(min = 2000, max = 2100))]
    pub year: i32,
    #[validate(range(min = 0.0))]
    pub electric_reading: f64,
    #[validate(range(min = 0.0))]
    pub water_reading: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub ai_confidence: Option<f64>,
    pub image_url: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateMeterReadingInput {
    #[validate(range(min = 0.0))]
    pub electric_reading: Option<f64>,
    #[validate(range(min = 0.0))]
    pub water_reading: Option<f64>,
    #[validate(range(min = 0.0, max = 1.0))]
    pub ai_confidence: Option<f64>,
    pub image_url: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeterReadingsQuery {
    pub room_id: Option<String>,
    pub month: Option<i32>,
    pub year: Option<i32>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit_20")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeterReadingPath {
    pub reading_id: String,
}

// Residency records

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateResidencyRecordInput {
    #[validate(length(min = 1))]
    pub tenant_id: String,
    pub record_type: String,
    pub start_date: String,
    pub end_date: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateResidencyRecordInput {
    pub record_type: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResidencyRecordsQuery {
    pub tenant_id: Option<String>,
    pub record_type: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit_20")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResidencyRecordPath {
    pub record_id: String,
}

// Auth and users

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginInput {
    #[validate(length(min = 1))]
    pub username: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUserInput {
    #[validate(length(min = 3, max = 50))]
    pub username: String,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
    #[validate(length(min = 1, max = 100))]
    pub full_name: String,
    #[serde(default = "default_staff_role")]
    pub role: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserPath {
    pub user_id: String,
}

// Settings

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateSettingsInput {
    #[validate(range(min = 0.0))]
    pub electric_unit_price: Option<f64>,
    #[validate(range(min = 0.0))]
    pub water_unit_price: Option<f64>,
    #[validate(range(min = 0.0))]
    pub service_fee: Option<f64>,
}

// Dashboard and reports

#[derive(Debug, Clone, Deserialize)]
pub struct RevenueQuery {
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpiringContractsQuery {
    #[serde(default = "default_expiring_days")]
    pub days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonthlyReportQuery {
    pub month: Option<i64>,
    pub year: Option<i64>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        clamp_page, paginated, remove_nulls, serialize_to_map, validate_input,
        CreateContractInput, CreateTenantInput, UpdateSettingsInput,
    };
    use crate::error::AppError;

    #[test]
    fn clamps_page_and_limit() {
        assert_eq!(clamp_page(0, 0), (1, 1));
        assert_eq!(clamp_page(3, 500), (3, 100));
        assert_eq!(clamp_page(2, 20), (2, 20));
    }

    #[test]
    fn pagination_counts_pages() {
        let body = paginated(vec![json!({ "id": 1 })], 1, 20, 41);
        assert_eq!(body["pagination"]["total_pages"], json!(3));
        assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

        let empty = paginated(Vec::new(), 1, 20, 0);
        assert_eq!(empty["pagination"]["total_pages"], json!(0));
    }

    #[test]
    fn validation_failures_are_bad_requests() {
        let input: CreateTenantInput = serde_json::from_value(json!({
            "full_name": "",
            "id_card": "079123456789",
            "email": "not-an-email"
        }))
        .unwrap();
        assert!(matches!(
            validate_input(&input),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn contract_requires_tenants() {
        let input: CreateContractInput = serde_json::from_value(json!({
            "contract_number": "HD-001",
            "room_id": "r1",
            "start_date": "2026-01-01",
            "end_date": "2026-12-31",
            "tenant_ids": [],
            "primary_tenant_id": "t1"
        }))
        .unwrap();
        assert!(validate_input(&input).is_err());
        assert_eq!(input.deposit, 0.0);
    }

    #[test]
    fn settings_cannot_be_negative() {
        let input = UpdateSettingsInput {
            electric_unit_price: Some(-1.0),
            water_unit_price: None,
            service_fee: None,
        };
        assert!(validate_input(&input).is_err());
    }

    #[test]
    fn patch_maps_drop_missing_fields() {
        let input = UpdateSettingsInput {
            electric_unit_price: Some(4000.0),
            water_unit_price: None,
            service_fee: None,
        };
        let patch = remove_nulls(serialize_to_map(&input));
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.get("electric_unit_price"), Some(&json!(4000.0)));
    }
}
