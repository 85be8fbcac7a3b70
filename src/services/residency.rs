use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    TemporaryResidence,
    TemporaryAbsence,
}

impl RecordType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TemporaryResidence => "TEMPORARY_RESIDENCE",
            Self::TemporaryAbsence => "TEMPORARY_ABSENCE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TEMPORARY_RESIDENCE" => Some(Self::TemporaryResidence),
            "TEMPORARY_ABSENCE" => Some(Self::TemporaryAbsence),
            _ => None,
        }
    }
}

/// A residency period. `end == None` is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResidencySpan {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

impl ResidencySpan {
    pub fn new(start: NaiveDate, end: Option<NaiveDate>) -> AppResult<Self> {
        if end.is_some_and(|end| end < start) {
            return Err(AppError::BadRequest(
                "End date must not be before start date".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        let self_before_other = self.end.is_some_and(|end| end < other.start);
        let other_before_self = other.end.is_some_and(|end| end < self.start);
        !self_before_other && !other_before_self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidencyEntry {
    pub id: String,
    pub record_type: RecordType,
    pub span: ResidencySpan,
}

impl ResidencyEntry {
    pub fn from_row(row: &Value) -> Option<Self> {
        let text = |key: &str| {
            row.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };
        let start = NaiveDate::parse_from_str(text("start_date")?, "%Y-%m-%d").ok()?;
        let end = match text("end_date") {
            Some(raw) => Some(NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?),
            None => None,
        };
        Some(Self {
            id: text("id")?.to_string(),
            record_type: RecordType::parse(text("record_type")?)?,
            span: ResidencySpan { start, end },
        })
    }
}

/// Same-type records of one tenant may not overlap.
pub fn ensure_no_overlap(
    record_type: RecordType,
    span: ResidencySpan,
    existing: &[ResidencyEntry],
    exclude_id: Option<&str>,
) -> AppResult<()> {
    let clash = existing.iter().any(|entry| {
        entry.record_type == record_type
            && exclude_id != Some(entry.id.as_str())
            && entry.span.overlaps(&span)
    });
    if clash {
        return Err(AppError::Conflict(
            "Overlapping residency record exists".to_string(),
        ));
    }
    Ok(())
}

/// Closing date for an open record on check-out. Records that start after
/// `today` close on their own start date.
pub fn closing_date(span: ResidencySpan, today: NaiveDate) -> NaiveDate {
    today.max(span.start)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::{
        closing_date, ensure_no_overlap, RecordType, ResidencyEntry, ResidencySpan,
    };
    use crate::error::AppError;

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    fn span(start: &str, end: Option<&str>) -> ResidencySpan {
        ResidencySpan::new(date(start), end.map(date)).unwrap()
    }

    fn entry(id: &str, record_type: RecordType, start: &str, end: Option<&str>) -> ResidencyEntry {
        ResidencyEntry {
            id: id.to_string(),
            record_type,
            span: span(start, end),
        }
    }

    #[test]
    fn single_day_records_are_allowed() {
        assert!(ResidencySpan::new(date("2026-01-01"), Some(date("2026-01-01"))).is_ok());
        assert!(matches!(
            ResidencySpan::new(date("2026-01-02"), Some(date("2026-01-01"))),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn open_ended_records_overlap_everything_after_start() {
        let open = span("2026-01-01", None);
        assert!(open.overlaps(&span("2030-01-01", Some("2030-02-01"))));
        assert!(open.overlaps(&span("2025-01-01", Some("2026-01-01"))));
        assert!(!open.overlaps(&span("2025-01-01", Some("2025-12-31"))));
        assert!(open.overlaps(&span("2027-01-01", None)));
    }

    #[test]
    fn closed_records_overlap_inclusively() {
        let closed = span("2026-01-01", Some("2026-06-30"));
        assert!(closed.overlaps(&span("2026-06-30", Some("2026-12-31"))));
        assert!(!closed.overlaps(&span("2026-07-01", Some("2026-12-31"))));
    }

    #[test]
    fn overlap_only_counts_same_type() {
        let existing = vec![
            entry("a", RecordType::TemporaryAbsence, "2026-01-01", None),
            entry("b", RecordType::TemporaryResidence, "2025-01-01", Some("2025-12-31")),
        ];
        assert!(ensure_no_overlap(
            RecordType::TemporaryResidence,
            span("2026-02-01", Some("2026-03-01")),
            &existing,
            None
        )
        .is_ok());

        let error = ensure_no_overlap(
            RecordType::TemporaryResidence,
            span("2025-06-01", None),
            &existing,
            None,
        )
        .unwrap_err();
        assert_eq!(error.to_string(), "Overlapping residency record exists");

        assert!(ensure_no_overlap(
            RecordType::TemporaryResidence,
            span("2025-06-01", None),
            &existing,
            Some("b")
        )
        .is_ok());
    }

    #[test]
    fn parses_rows() {
        let row = json!({
            "id": "r1",
            "record_type": "TEMPORARY_RESIDENCE",
            "start_date": "2026-01-01",
            "end_date": null
        });
        let parsed = ResidencyEntry::from_row(&row).unwrap();
        assert!(parsed.span.end.is_none());
        assert_eq!(parsed.record_type, RecordType::TemporaryResidence);
        assert!(ResidencyEntry::from_row(&json!({ "id": "r2", "record_type": "OTHER" })).is_none());
    }

    #[test]
    fn closing_never_precedes_start() {
        let future = span("2026-05-01", None);
        assert_eq!(closing_date(future, date("2026-04-01")), date("2026-05-01"));
        assert_eq!(closing_date(future, date("2026-06-01")), date("2026-06-01"));
    }
}
