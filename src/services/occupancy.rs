//! Room availability and contract lifecycle rules.
//!
//! Everything here works on plain dates and status values so the rules can
//! be exercised without a database. Route handlers load rows, convert them
//! with [`BookedStay::from_row`] and feed them through these checks.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    Active,
    Expired,
    Terminated,
}

impl ContractStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Expired => "EXPIRED",
            Self::Terminated => "TERMINATED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(Self::Active),
            "EXPIRED" => Some(Self::Expired),
            "TERMINATED" => Some(Self::Terminated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    Available,
    Occupied,
    Reserved,
    Maintenance,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Occupied => "OCCUPIED",
            Self::Reserved => "RESERVED",
            Self::Maintenance => "MAINTENANCE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "AVAILABLE" => Some(Self::Available),
            "OCCUPIED" => Some(Self::Occupied),
            "RESERVED" => Some(Self::Reserved),
            "MAINTENANCE" => Some(Self::Maintenance),
            _ => None,
        }
    }
}

/// An inclusive `[start, end]` date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stay {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Stay {
    /// Contract periods must end strictly after they start.
    pub fn new(start: NaiveDate, end: NaiveDate) -> AppResult<Self> {
        if end <= start {
            return Err(AppError::BadRequest(
                "End date must be after start date".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> AppResult<Self> {
        Self::new(parse_date(start, "start_date")?, parse_date(end, "end_date")?)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// The candidate starts during, ends during, or fully contains the existing
/// stay. Bounds are inclusive, so a stay ending on the day another starts
/// still conflicts.
pub fn stays_overlap(candidate: Stay, existing: Stay) -> bool {
    let starts_during = existing.contains(candidate.start);
    let ends_during = existing.contains(candidate.end);
    let contains_existing = candidate.start <= existing.start && candidate.end >= existing.end;
    starts_during || ends_during || contains_existing
}

/// A contract already booked on a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookedStay {
    pub contract_id: String,
    pub contract_number: String,
    pub status: ContractStatus,
    pub stay: Stay,
}

impl BookedStay {
    /// Rows with unreadable dates or status are skipped by callers.
    pub fn from_row(row: &Value) -> Option<Self> {
        let text = |key: &str| row.get(key).and_then(Value::as_str).map(str::trim);
        let start = NaiveDate::parse_from_str(text("start_date")?, "%Y-%m-%d").ok()?;
        let end = NaiveDate::parse_from_str(text("end_date")?, "%Y-%m-%d").ok()?;
        Some(Self {
            contract_id: text("id")?.to_string(),
            contract_number: text("contract_number").unwrap_or_default().to_string(),
            status: ContractStatus::parse(text("status")?)?,
            stay: Stay { start, end },
        })
    }
}

/// First ACTIVE booking that collides with `candidate`, ignoring the
/// contract being edited.
pub fn find_conflict<'a>(
    candidate: Stay,
    booked: &'a [BookedStay],
    exclude_contract_id: Option<&str>,
) -> Option<&'a BookedStay> {
    booked.iter().find(|existing| {
        existing.status == ContractStatus::Active
            && exclude_contract_id != Some(existing.contract_id.as_str())
            && stays_overlap(candidate, existing.stay)
    })
}

pub fn ensure_room_available(
    candidate: Stay,
    booked: &[BookedStay],
    exclude_contract_id: Option<&str>,
) -> AppResult<()> {
    match find_conflict(candidate, booked, exclude_contract_id) {
        Some(_) => Err(AppError::Conflict(
            "Room is not available for the selected period".to_string(),
        )),
        None => Ok(()),
    }
}

/// Normalized tenant membership for a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantSelection {
    pub tenant_ids: Vec<String>,
    pub primary_tenant_id: String,
}

impl TenantSelection {
    /// Trims and de-duplicates ids (keeping first-seen order) and requires
    /// the primary tenant to be one of them.
    pub fn new(tenant_ids: &[String], primary_tenant_id: &str) -> AppResult<Self> {
        let mut seen = HashSet::new();
        let ids = tenant_ids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .filter(|id| seen.insert(id.clone()))
            .collect::<Vec<_>>();
        if ids.is_empty() {
            return Err(AppError::BadRequest(
                "At least one tenant is required".to_string(),
            ));
        }

        let primary = primary_tenant_id.trim();
        if !ids.iter().any(|id| id == primary) {
            return Err(AppError::BadRequest(
                "Primary tenant must be included in the tenant list".to_string(),
            ));
        }

        Ok(Self {
            tenant_ids: ids,
            primary_tenant_id: primary.to_string(),
        })
    }

    pub fn is_primary(&self, tenant_id: &str) -> bool {
        self.primary_tenant_id == tenant_id
    }
}

/// Contracts only ever leave ACTIVE; a closed contract stays closed.
pub fn ensure_status_transition(from: ContractStatus, to: ContractStatus) -> AppResult<()> {
    if from == to || from == ContractStatus::Active {
        return Ok(());
    }
    Err(AppError::BadRequest("Invalid status transition".to_string()))
}

/// Status a room should carry once a contract on it stops being ACTIVE.
/// Rooms under maintenance keep that status.
pub fn room_status_after_release(current: RoomStatus, remaining_active: i64) -> RoomStatus {
    if remaining_active > 0 {
        return RoomStatus::Occupied;
    }
    match current {
        RoomStatus::Maintenance => RoomStatus::Maintenance,
        _ => RoomStatus::Available,
    }
}

/// Manual room status edits cannot contradict contract occupancy.
pub fn ensure_manual_room_status(requested: RoomStatus, active_contracts: i64) -> AppResult<()> {
    match requested {
        RoomStatus::Occupied if active_contracts == 0 => Err(AppError::Conflict(
            "Room cannot be marked OCCUPIED without an active contract".to_string(),
        )),
        RoomStatus::Available | RoomStatus::Maintenance | RoomStatus::Reserved
            if active_contracts > 0 =>
        {
            Err(AppError::Conflict(
                "Room has an active contract and must stay OCCUPIED".to_string(),
            ))
        }
        _ => Ok(()),
    }
}

/// A contract can be deleted once it is closed and nothing on it is owed.
pub fn ensure_contract_deletable(status: ContractStatus, unpaid_bills: i64) -> AppResult<()> {
    if status == ContractStatus::Active {
        return Err(AppError::Conflict(
            "Cannot delete an active contract".to_string(),
        ));
    }
    if unpaid_bills > 0 {
        return Err(AppError::Conflict(
            "Cannot delete a contract with unpaid bills".to_string(),
        ));
    }
    Ok(())
}

pub fn ensure_room_deletable(active_contracts: i64, unpaid_bills: i64) -> AppResult<()> {
    if active_contracts > 0 {
        return Err(AppError::BadRequest(
            "Cannot delete room with active contracts".to_string(),
        ));
    }
    if unpaid_bills > 0 {
        return Err(AppError::BadRequest(
            "Cannot delete room with unpaid bills".to_string(),
        ));
    }
    Ok(())
}

/// `unpaid_bills` counts outstanding bills on any contract the tenant belongs to.
pub fn ensure_tenant_deletable(active_contracts: i64, unpaid_bills: i64) -> AppResult<()> {
    if active_contracts > 0 {
        return Err(AppError::BadRequest(
            "Cannot delete tenant with active contracts".to_string(),
        ));
    }
    if unpaid_bills > 0 {
        return Err(AppError::BadRequest(
            "Cannot delete tenant with unpaid bills".to_string(),
        ));
    }
    Ok(())
}

/// Status a contract closes with when the tenants move out on `today`.
pub fn check_out_status(stay: Stay, today: NaiveDate) -> ContractStatus {
    if today < stay.end {
        ContractStatus::Terminated
    } else {
        ContractStatus::Expired
    }
}

pub fn parse_date(value: &str, field: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("{field} must be a valid date (YYYY-MM-DD)")))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::{
        check_out_status, ensure_contract_deletable, ensure_manual_room_status,
        ensure_room_available, ensure_room_deletable, ensure_status_transition,
        ensure_tenant_deletable, find_conflict, room_status_after_release, stays_overlap,
        BookedStay, ContractStatus, RoomStatus, Stay, TenantSelection,
    };
    use crate::error::AppError;

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
    }

    fn stay(start: &str, end: &str) -> Stay {
        Stay::parse(start, end).expect("valid stay")
    }

    fn booked(id: &str, status: ContractStatus, start: &str, end: &str) -> BookedStay {
        BookedStay {
            contract_id: id.to_string(),
            contract_number: format!("HD-{id}"),
            status,
            stay: stay(start, end),
        }
    }

    #[test]
    fn rejects_inverted_or_empty_periods() {
        let error = Stay::parse("2026-03-01", "2026-03-01").unwrap_err();
        assert_eq!(error.to_string(), "End date must be after start date");
        assert!(Stay::parse("2026-03-02", "2026-03-01").is_err());
        assert!(matches!(
            Stay::parse("2026-13-01", "2026-12-01"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn detects_each_overlap_shape() {
        let existing = stay("2026-03-01", "2026-08-31");

        // starts during
        assert!(stays_overlap(stay("2026-05-01", "2026-12-31"), existing));
        // ends during
        assert!(stays_overlap(stay("2026-01-01", "2026-03-15"), existing));
        // contains existing
        assert!(stays_overlap(stay("2026-01-01", "2026-12-31"), existing));
        // inside existing
        assert!(stays_overlap(stay("2026-04-01", "2026-04-30"), existing));
        // touching boundary days count
        assert!(stays_overlap(stay("2026-08-31", "2026-12-31"), existing));
        assert!(stays_overlap(stay("2026-01-01", "2026-03-01"), existing));

        assert!(!stays_overlap(stay("2026-09-01", "2026-12-31"), existing));
        assert!(!stays_overlap(stay("2025-09-01", "2026-02-28"), existing));
    }

    #[test]
    fn only_active_contracts_block_a_room() {
        let closed = vec![
            booked("a", ContractStatus::Terminated, "2026-01-01", "2026-12-31"),
            booked("b", ContractStatus::Expired, "2026-01-01", "2026-12-31"),
        ];
        assert!(find_conflict(stay("2026-06-01", "2026-06-30"), &closed, None).is_none());

        let active = vec![booked("c", ContractStatus::Active, "2026-01-01", "2026-12-31")];
        let conflict = find_conflict(stay("2026-06-01", "2026-06-30"), &active, None);
        assert_eq!(conflict.map(|item| item.contract_id.as_str()), Some("c"));

        let error = ensure_room_available(stay("2026-06-01", "2026-06-30"), &active, None)
            .unwrap_err();
        assert!(matches!(error, AppError::Conflict(_)));
    }

    #[test]
    fn editing_contract_ignores_itself() {
        let active = vec![booked("c", ContractStatus::Active, "2026-01-01", "2026-12-31")];
        assert!(
            ensure_room_available(stay("2026-02-01", "2027-01-31"), &active, Some("c")).is_ok()
        );
    }

    #[test]
    fn reads_booked_stay_from_row() {
        let row = json!({
            "id": "c-1",
            "contract_number": "HD-001",
            "status": "ACTIVE",
            "start_date": "2026-01-01",
            "end_date": "2026-06-30"
        });
        let parsed = BookedStay::from_row(&row).expect("parsed");
        assert_eq!(parsed.status, ContractStatus::Active);
        assert_eq!(parsed.stay.end, date("2026-06-30"));

        assert!(BookedStay::from_row(&json!({ "id": "x", "status": "ACTIVE" })).is_none());
    }

    #[test]
    fn primary_tenant_must_be_listed() {
        let ids = vec!["t1".to_string(), "t2".to_string()];
        let error = TenantSelection::new(&ids, "t3").unwrap_err();
        assert!(matches!(error, AppError::BadRequest(_)));
        assert_eq!(
            error.to_string(),
            "Primary tenant must be included in the tenant list"
        );

        assert!(TenantSelection::new(&[], "t1").is_err());
    }

    #[test]
    fn tenant_selection_deduplicates_in_order() {
        let ids = vec![
            " t2 ".to_string(),
            "t1".to_string(),
            "t2".to_string(),
            String::new(),
        ];
        let selection = TenantSelection::new(&ids, "t1").unwrap();
        assert_eq!(selection.tenant_ids, vec!["t2".to_string(), "t1".to_string()]);
        assert!(selection.is_primary("t1"));
        assert!(!selection.is_primary("t2"));
    }

    #[test]
    fn closed_contracts_cannot_reopen() {
        use ContractStatus::*;
        assert!(ensure_status_transition(Active, Expired).is_ok());
        assert!(ensure_status_transition(Active, Terminated).is_ok());
        assert!(ensure_status_transition(Expired, Expired).is_ok());
        assert!(ensure_status_transition(Terminated, Active).is_err());
        assert!(ensure_status_transition(Expired, Terminated).is_err());
    }

    #[test]
    fn room_release_depends_on_remaining_contracts() {
        assert_eq!(
            room_status_after_release(RoomStatus::Occupied, 0),
            RoomStatus::Available
        );
        assert_eq!(
            room_status_after_release(RoomStatus::Occupied, 1),
            RoomStatus::Occupied
        );
        assert_eq!(
            room_status_after_release(RoomStatus::Maintenance, 0),
            RoomStatus::Maintenance
        );
    }

    #[test]
    fn manual_room_status_respects_occupancy() {
        assert!(ensure_manual_room_status(RoomStatus::Occupied, 0).is_err());
        assert!(ensure_manual_room_status(RoomStatus::Occupied, 1).is_ok());
        assert!(ensure_manual_room_status(RoomStatus::Maintenance, 1).is_err());
        assert!(ensure_manual_room_status(RoomStatus::Maintenance, 0).is_ok());
        assert!(ensure_manual_room_status(RoomStatus::Available, 0).is_ok());
    }

    #[test]
    fn check_out_before_end_terminates() {
        let period = stay("2026-01-01", "2026-06-30");
        assert_eq!(
            check_out_status(period, date("2026-03-10")),
            ContractStatus::Terminated
        );
        assert_eq!(
            check_out_status(period, date("2026-06-30")),
            ContractStatus::Expired
        );
    }

    #[test]
    fn parses_status_values() {
        assert_eq!(ContractStatus::parse("active"), Some(ContractStatus::Active));
        assert_eq!(ContractStatus::parse("pending"), None);
        assert_eq!(RoomStatus::parse("Maintenance"), Some(RoomStatus::Maintenance));
        assert_eq!(RoomStatus::Occupied.as_str(), "OCCUPIED");
    }

    #[test]
    fn contract_delete_requires_closed_and_settled() {
        let active = ensure_contract_deletable(ContractStatus::Active, 0).unwrap_err();
        assert!(matches!(
            active,
            AppError::Conflict(ref message) if message == "Cannot delete an active contract"
        ));

        let owing = ensure_contract_deletable(ContractStatus::Terminated, 2).unwrap_err();
        assert!(matches!(
            owing,
            AppError::Conflict(ref message) if message == "Cannot delete a contract with unpaid bills"
        ));

        assert!(ensure_contract_deletable(ContractStatus::Expired, 0).is_ok());
    }

    #[test]
    fn room_delete_blocked_by_active_contracts_and_unpaid_bills() {
        let active = ensure_room_deletable(1, 0).unwrap_err();
        assert!(matches!(
            active,
            AppError::BadRequest(ref message) if message == "Cannot delete room with active contracts"
        ));

        // A terminated contract can still leave bills behind on the room.
        let owing = ensure_room_deletable(0, 2).unwrap_err();
        assert!(matches!(
            owing,
            AppError::BadRequest(ref message) if message == "Cannot delete room with unpaid bills"
        ));

        assert!(ensure_room_deletable(0, 0).is_ok());
    }

    #[test]
    fn tenant_delete_blocked_by_active_contracts_and_unpaid_bills() {
        assert!(matches!(
            ensure_tenant_deletable(1, 1).unwrap_err(),
            AppError::BadRequest(ref message) if message == "Cannot delete tenant with active contracts"
        ));
        assert!(matches!(
            ensure_tenant_deletable(0, 1).unwrap_err(),
            AppError::BadRequest(ref message) if message == "Cannot delete tenant with unpaid bills"
        ));
        assert!(ensure_tenant_deletable(0, 0).is_ok());
    }
}
