//! Shaping helpers for the dashboard and report endpoints. Queries live in
//! the route modules; these functions only fold already-fetched rows.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{json, Value};

use crate::services::{
    billing::{number, round_money, BillStatus},
    occupancy::RoomStatus,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoomCounts {
    pub total: i64,
    pub available: i64,
    pub occupied: i64,
    pub reserved: i64,
    pub maintenance: i64,
}

impl RoomCounts {
    pub fn from_status_counts(rows: &[(String, i64)]) -> Self {
        let mut counts = Self::default();
        for (status, count) in rows {
            counts.total += count;
            match RoomStatus::parse(status) {
                Some(RoomStatus::Available) => counts.available += count,
                Some(RoomStatus::Occupied) => counts.occupied += count,
                Some(RoomStatus::Reserved) => counts.reserved += count,
                Some(RoomStatus::Maintenance) => counts.maintenance += count,
                None => {}
            }
        }
        counts
    }

    pub fn occupancy_rate(&self) -> f64 {
        occupancy_rate(self.occupied, self.total)
    }
}

/// Occupied share of all rooms as a percentage with two decimals.
pub fn occupancy_rate(occupied: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    round_money(occupied as f64 * 100.0 / total as f64)
}

/// Twelve month entries, zero-filled where the query returned nothing.
pub fn monthly_series(rows: &[(i32, f64, f64)]) -> Vec<Value> {
    let by_month = rows
        .iter()
        .map(|(month, billed, collected)| (*month, (*billed, *collected)))
        .collect::<HashMap<_, _>>();

    (1..=12)
        .map(|month| {
            let (billed, collected) = by_month.get(&month).copied().unwrap_or((0.0, 0.0));
            json!({
                "month": month,
                "billed": round_money(billed),
                "collected": round_money(collected),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BillTotals {
    pub bill_count: i64,
    pub paid_count: i64,
    pub unpaid_count: i64,
    pub overdue_count: i64,
    pub total_billed: f64,
    pub total_collected: f64,
    pub total_outstanding: f64,
}

pub fn summarize_bills(rows: &[Value]) -> BillTotals {
    let mut totals = BillTotals::default();
    for row in rows {
        let amount = number(row, "total_amount").unwrap_or(0.0);
        let status = row
            .get("status")
            .and_then(Value::as_str)
            .and_then(BillStatus::parse);

        totals.bill_count += 1;
        totals.total_billed += amount;
        match status {
            Some(BillStatus::Paid) => {
                totals.paid_count += 1;
                totals.total_collected += amount;
            }
            Some(BillStatus::Unpaid) => {
                totals.unpaid_count += 1;
                totals.total_outstanding += amount;
            }
            Some(BillStatus::Overdue) => {
                totals.overdue_count += 1;
                totals.total_outstanding += amount;
            }
            None => {}
        }
    }
    totals.total_billed = round_money(totals.total_billed);
    totals.total_collected = round_money(totals.total_collected);
    totals.total_outstanding = round_money(totals.total_outstanding);
    totals
}

/// Groups outstanding bill rows per contract, largest debt first.
pub fn group_debts(rows: Vec<Value>) -> Vec<Value> {
    let mut order = Vec::<String>::new();
    let mut groups = HashMap::<String, (Value, f64, Vec<Value>)>::new();

    for row in rows {
        let Some(contract_id) = row
            .get("contract_id")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
        else {
            continue;
        };
        let amount = number(&row, "total_amount").unwrap_or(0.0);
        let entry = groups.entry(contract_id.clone()).or_insert_with(|| {
            order.push(contract_id.clone());
            let head = json!({
                "contract_id": contract_id,
                "contract_number": row.get("contract_number").cloned().unwrap_or(Value::Null),
                "room_number": row.get("room_number").cloned().unwrap_or(Value::Null),
                "primary_tenant": row.get("primary_tenant").cloned().unwrap_or(Value::Null),
            });
            (head, 0.0, Vec::new())
        });
        entry.1 += amount;
        entry.2.push(row);
    }

    let mut grouped = order
        .into_iter()
        .filter_map(|contract_id| groups.remove(&contract_id))
        .map(|(mut head, owed, bills)| {
            if let Some(obj) = head.as_object_mut() {
                obj.insert("bill_count".to_string(), json!(bills.len()));
                obj.insert("total_owed".to_string(), json!(round_money(owed)));
                obj.insert("bills".to_string(), Value::Array(bills));
            }
            (owed, head)
        })
        .collect::<Vec<_>>();

    grouped.sort_by(|left, right| right.0.total_cmp(&left.0));
    grouped.into_iter().map(|(_, value)| value).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{group_debts, monthly_series, occupancy_rate, summarize_bills, RoomCounts};

    #[test]
    fn counts_rooms_by_status() {
        let counts = RoomCounts::from_status_counts(&[
            ("AVAILABLE".to_string(), 4),
            ("OCCUPIED".to_string(), 5),
            ("MAINTENANCE".to_string(), 1),
        ]);
        assert_eq!(counts.total, 10);
        assert_eq!(counts.occupied, 5);
        assert_eq!(counts.reserved, 0);
        assert_eq!(counts.occupancy_rate(), 50.0);
    }

    #[test]
    fn occupancy_rate_rounds_and_handles_empty() {
        assert_eq!(occupancy_rate(0, 0), 0.0);
        assert_eq!(occupancy_rate(1, 3), 33.33);
        assert_eq!(occupancy_rate(2, 3), 66.67);
    }

    #[test]
    fn fills_missing_months() {
        let series = monthly_series(&[(2, 1500.0, 1000.0), (12, 10.0, 10.0)]);
        assert_eq!(series.len(), 12);
        assert_eq!(series[0], json!({ "month": 1, "billed": 0.0, "collected": 0.0 }));
        assert_eq!(series[1]["billed"], json!(1500.0));
        assert_eq!(series[11]["collected"], json!(10.0));
    }

    #[test]
    fn summarizes_bill_statuses() {
        let totals = summarize_bills(&[
            json!({ "status": "PAID", "total_amount": 100.0 }),
            json!({ "status": "UNPAID", "total_amount": "50.5" }),
            json!({ "status": "OVERDUE", "total_amount": 25 }),
        ]);
        assert_eq!(totals.bill_count, 3);
        assert_eq!(totals.paid_count, 1);
        assert_eq!(totals.total_billed, 175.5);
        assert_eq!(totals.total_collected, 100.0);
        assert_eq!(totals.total_outstanding, 75.5);
    }

    #[test]
    fn groups_debts_largest_first() {
        let grouped = group_debts(vec![
            json!({ "contract_id": "a", "contract_number": "HD-1", "total_amount": 100.0 }),
            json!({ "contract_id": "b", "contract_number": "HD-2", "total_amount": 300.0 }),
            json!({ "contract_id": "a", "contract_number": "HD-1", "total_amount": 50.0 }),
            json!({ "total_amount": 999.0 }),
        ]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0]["contract_id"], json!("b"));
        assert_eq!(grouped[1]["total_owed"], json!(150.0));
        assert_eq!(grouped[1]["bill_count"], json!(2));
    }
}
