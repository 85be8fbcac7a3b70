use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{AppError, AppResult};

/// Allowed drift between a bill total and the sum of its components.
pub const TOTAL_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillStatus {
    Unpaid,
    Paid,
    Overdue,
}

impl BillStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unpaid => "UNPAID",
            Self::Paid => "PAID",
            Self::Overdue => "OVERDUE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "UNPAID" => Some(Self::Unpaid),
            "PAID" => Some(Self::Paid),
            "OVERDUE" => Some(Self::Overdue),
            _ => None,
        }
    }
}

/// Unit prices and the flat monthly fee applied when billing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tariff {
    pub electric_unit_price: f64,
    pub water_unit_price: f64,
    pub service_fee: f64,
}

/// Cumulative meter counters for one room and month.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterSnapshot {
    pub electric: f64,
    pub water: f64,
}

impl MeterSnapshot {
    pub fn from_row(row: &Value) -> Option<Self> {
        Some(Self {
            electric: number(row, "electric_reading")?,
            water: number(row, "water_reading")?,
        })
    }
}

/// Cumulative counters may not run backwards relative to the neighbouring
/// months already on record.
pub fn ensure_readings_monotonic(
    previous: Option<MeterSnapshot>,
    reading: MeterSnapshot,
    next: Option<MeterSnapshot>,
) -> AppResult<()> {
    if previous.is_some_and(|previous| {
        reading.electric < previous.electric || reading.water < previous.water
    }) {
        return Err(AppError::BadRequest(
            "Meter readings cannot be lower than the previous month".to_string(),
        ));
    }
    if next.is_some_and(|next| reading.electric > next.electric || reading.water > next.water) {
        return Err(AppError::BadRequest(
            "Meter readings cannot be higher than the following month".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Usage {
    pub electric: f64,
    pub water: f64,
}

/// Consumption between two readings. A missing reading on either side means
/// nothing can be billed; a counter that went backwards bills zero.
pub fn usage_between(previous: Option<MeterSnapshot>, current: Option<MeterSnapshot>) -> Usage {
    match (previous, current) {
        (Some(previous), Some(current)) => Usage {
            electric: (current.electric - previous.electric).max(0.0),
            water: (current.water - previous.water).max(0.0),
        },
        _ => Usage::default(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BillAmounts {
    pub rent: f64,
    pub electric: f64,
    pub water: f64,
    pub service: f64,
    pub total: f64,
    pub usage: Usage,
}

impl BillAmounts {
    pub fn compute(rent: f64, usage: Usage, tariff: &Tariff) -> Self {
        let electric = round_money(usage.electric * tariff.electric_unit_price);
        let water = round_money(usage.water * tariff.water_unit_price);
        let service = round_money(tariff.service_fee);
        let rent = round_money(rent);
        Self {
            rent,
            electric,
            water,
            service,
            total: round_money(rent + electric + water + service),
            usage,
        }
    }

    /// Column values for a `bills` insert.
    pub fn to_record(&self) -> Map<String, Value> {
        let mut record = Map::new();
        record.insert("rent_amount".to_string(), json!(self.rent));
        record.insert("electric_amount".to_string(), json!(self.electric));
        record.insert("water_amount".to_string(), json!(self.water));
        record.insert("service_amount".to_string(), json!(self.service));
        record.insert("total_amount".to_string(), json!(self.total));
        record.insert("electric_usage".to_string(), json!(self.usage.electric));
        record.insert("water_usage".to_string(), json!(self.usage.water));
        record
    }
}

/// Component amounts supplied by hand on a manual bill.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ManualAmounts {
    pub rent: f64,
    pub electric: f64,
    pub water: f64,
    pub service: f64,
}

impl ManualAmounts {
    pub fn sum(&self) -> f64 {
        round_money(self.rent + self.electric + self.water + self.service)
    }

    /// Returns the total to store: the computed sum when none was given,
    /// otherwise the given total once it is confirmed to match.
    pub fn resolve_total(&self, declared: Option<f64>) -> AppResult<f64> {
        for (field, value) in [
            ("rent_amount", self.rent),
            ("electric_amount", self.electric),
            ("water_amount", self.water),
            ("service_amount", self.service),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::BadRequest(format!(
                    "{field} must be a non-negative number"
                )));
            }
        }

        let sum = self.sum();
        match declared {
            None => Ok(sum),
            Some(total) if totals_match(total, sum) => Ok(round_money(total)),
            Some(_) => Err(AppError::BadRequest(
                "Total amount must equal the sum of rent, electric, water and service amounts"
                    .to_string(),
            )),
        }
    }
}

pub fn totals_match(total: f64, sum: f64) -> bool {
    (total - sum).abs() <= TOTAL_EPSILON + f64::EPSILON * sum.abs().max(1.0)
}

/// A calendar month a bill covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    pub month: u32,
    pub year: i32,
}

impl BillingPeriod {
    pub fn new(month: i64, year: i64) -> AppResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(AppError::BadRequest(
                "month must be between 1 and 12".to_string(),
            ));
        }
        if !(2000..=2100).contains(&year) {
            return Err(AppError::BadRequest(
                "year must be between 2000 and 2100".to_string(),
            ));
        }
        Ok(Self {
            month: month as u32,
            year: year as i32,
        })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            month: date.month(),
            year: date.year(),
        }
    }

    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self {
                month: 12,
                year: self.year - 1,
            }
        } else {
            Self {
                month: self.month - 1,
                year: self.year,
            }
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                month: 1,
                year: self.year + 1,
            }
        } else {
            Self {
                month: self.month + 1,
                year: self.year,
            }
        }
    }

    /// Bills fall due on a fixed day of the following month.
    pub fn due_date(self, due_day: u32) -> AppResult<NaiveDate> {
        let next = self.next();
        NaiveDate::from_ymd_opt(next.year, next.month, due_day.clamp(1, 28)).ok_or_else(|| {
            AppError::Internal(format!(
                "Could not compute due date for {}/{}",
                self.month, self.year
            ))
        })
    }
}

/// A generation run needs at least one ACTIVE contract still lacking a bill.
pub fn ensure_generation_candidates(unbilled_contracts: usize) -> AppResult<()> {
    if unbilled_contracts == 0 {
        return Err(AppError::Conflict(
            "Bills have already been generated for this period".to_string(),
        ));
    }
    Ok(())
}

pub fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn number(row: &Value, key: &str) -> Option<f64> {
    match row.get(key)? {
        Value::Number(value) => value.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::{
        ensure_generation_candidates, ensure_readings_monotonic, totals_match, usage_between,
        BillAmounts, BillStatus, BillingPeriod, ManualAmounts, MeterSnapshot, Tariff, Usage,
    };
    use crate::error::AppError;

    fn tariff() -> Tariff {
        Tariff {
            electric_unit_price: 3500.0,
            water_unit_price: 15000.0,
            service_fee: 100000.0,
        }
    }

    #[test]
    fn usage_is_difference_of_cumulative_readings() {
        let usage = usage_between(
            Some(MeterSnapshot {
                electric: 1200.0,
                water: 50.0,
            }),
            Some(MeterSnapshot {
                electric: 1350.0,
                water: 56.0,
            }),
        );
        assert_eq!(
            usage,
            Usage {
                electric: 150.0,
                water: 6.0
            }
        );
    }

    #[test]
    fn missing_or_decreasing_readings_bill_nothing() {
        let reading = MeterSnapshot {
            electric: 100.0,
            water: 10.0,
        };
        assert_eq!(usage_between(None, Some(reading)), Usage::default());
        assert_eq!(usage_between(Some(reading), None), Usage::default());

        let reset = MeterSnapshot {
            electric: 20.0,
            water: 12.0,
        };
        let usage = usage_between(Some(reading), Some(reset));
        assert_eq!(usage.electric, 0.0);
        assert_eq!(usage.water, 2.0);
    }

    #[test]
    fn readings_must_not_run_backwards() {
        let at = |electric: f64, water: f64| MeterSnapshot { electric, water };
        assert!(ensure_readings_monotonic(None, at(10.0, 1.0), None).is_ok());
        assert!(ensure_readings_monotonic(Some(at(10.0, 1.0)), at(10.0, 1.0), None).is_ok());

        let error =
            ensure_readings_monotonic(Some(at(10.0, 1.0)), at(9.0, 2.0), None).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Meter readings cannot be lower than the previous month"
        );
        assert!(ensure_readings_monotonic(None, at(10.0, 5.0), Some(at(12.0, 4.0))).is_err());
    }

    #[test]
    fn computes_bill_amounts() {
        let amounts = BillAmounts::compute(
            2_500_000.0,
            Usage {
                electric: 150.0,
                water: 6.0,
            },
            &tariff(),
        );
        assert_eq!(amounts.electric, 525_000.0);
        assert_eq!(amounts.water, 90_000.0);
        assert_eq!(amounts.service, 100_000.0);
        assert_eq!(amounts.total, 3_215_000.0);

        let record = amounts.to_record();
        assert_eq!(record.get("total_amount"), Some(&json!(3_215_000.0)));
        assert_eq!(record.get("electric_usage"), Some(&json!(150.0)));
    }

    #[test]
    fn manual_total_must_match_components() {
        let amounts = ManualAmounts {
            rent: 100.0,
            electric: 20.5,
            water: 10.25,
            service: 5.0,
        };
        assert_eq!(amounts.resolve_total(None).unwrap(), 135.75);
        assert_eq!(amounts.resolve_total(Some(135.76)).unwrap(), 135.76);

        let error = amounts.resolve_total(Some(136.0)).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Total amount must equal the sum of rent, electric, water and service amounts"
        );
    }

    #[test]
    fn manual_amounts_cannot_be_negative() {
        let amounts = ManualAmounts {
            rent: -1.0,
            ..ManualAmounts::default()
        };
        assert!(amounts.resolve_total(None).is_err());
    }

    #[test]
    fn epsilon_comparison() {
        assert!(totals_match(100.0, 100.01));
        assert!(totals_match(100.0, 99.99));
        assert!(!totals_match(100.0, 100.02));
    }

    #[test]
    fn due_date_is_fifth_of_next_month() {
        let period = BillingPeriod::new(3, 2026).unwrap();
        assert_eq!(
            period.due_date(5).unwrap(),
            NaiveDate::from_ymd_opt(2026, 4, 5).unwrap()
        );

        let december = BillingPeriod::new(12, 2026).unwrap();
        assert_eq!(
            december.due_date(5).unwrap(),
            NaiveDate::from_ymd_opt(2027, 1, 5).unwrap()
        );
    }

    #[test]
    fn previous_period_wraps_year() {
        let january = BillingPeriod::new(1, 2026).unwrap();
        assert_eq!(
            january.previous(),
            BillingPeriod {
                month: 12,
                year: 2025
            }
        );
    }

    #[test]
    fn rejects_out_of_range_periods() {
        assert!(BillingPeriod::new(0, 2026).is_err());
        assert!(BillingPeriod::new(13, 2026).is_err());
        assert!(BillingPeriod::new(6, 1999).is_err());
        assert!(BillingPeriod::new(6, 2101).is_err());
    }

    #[test]
    fn reads_numeric_columns_from_rows() {
        let row = json!({ "electric_reading": 1200.5, "water_reading": "48" });
        let snapshot = MeterSnapshot::from_row(&row).unwrap();
        assert_eq!(snapshot.electric, 1200.5);
        assert_eq!(snapshot.water, 48.0);
        assert!(MeterSnapshot::from_row(&json!({})).is_none());
    }

    #[test]
    fn parses_bill_statuses() {
        assert_eq!(BillStatus::parse("paid"), Some(BillStatus::Paid));
        assert_eq!(BillStatus::parse(" overdue "), Some(BillStatus::Overdue));
        assert_eq!(BillStatus::parse("void"), None);
    }

    #[test]
    fn generation_without_unbilled_contracts_conflicts() {
        let error = ensure_generation_candidates(0).unwrap_err();
        assert!(matches!(
            error,
            AppError::Conflict(ref message)
                if message == "Bills have already been generated for this period"
        ));
        assert!(ensure_generation_candidates(3).is_ok());
    }
}
