//! The canonical timetable data model (C9) and its validators.
//!
//! These types are assembled once per `(request, offset)` by the scrapers and the
//! orchestrator, validated as a whole, and never mutated afterward. Field names are
//! `snake_case` in Rust and rewritten to `camelCase` on the wire via `serde(rename_all)`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, AdapterResult};

pub const FORMAT_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    pub student_name: String,
    pub class: String,
}

/// Week metadata. Every field except `week_number` may be `null` on the wire when the
/// upstream HTML didn't carry enough to derive it (e.g. a degenerate, fully empty week
/// table) — see spec scenario 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WeekInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week_key: Option<String>,
}

impl WeekInfo {
    /// Builds a fully populated `WeekInfo`, computing `week_key` from `year`/`week_number`.
    pub fn new(week_number: u32, start_date: String, end_date: String, year: i32) -> Self {
        let week_key = format!("{year}-W{week_number:02}");
        Self {
            week_number: Some(week_number),
            start_date: Some(start_date),
            end_date: Some(end_date),
            year: Some(year),
            week_key: Some(week_key),
        }
    }

    /// Builds a `WeekInfo` with every field null — used when the upstream's week table is
    /// present but empty and carries no navigation/date-range markers at all.
    pub fn empty() -> Self {
        Self {
            week_number: None,
            start_date: None,
            end_date: None,
            year: None,
            week_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub title: String,
    pub level: String,
    pub year: String,
    pub date: String,
    pub day_of_week: String,
    pub teacher: String,
    pub teacher_short: String,
    pub location: String,
    pub time_slot: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub time_range: String,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lesson_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub has_homework_note: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimetableData {
    pub student_info: StudentInfo,
    pub week_info: WeekInfo,
    pub events: Vec<Lesson>,
    pub format_version: u32,
}

impl TimetableData {
    pub fn new(student_info: StudentInfo, week_info: WeekInfo, events: Vec<Lesson>) -> Self {
        Self {
            student_info,
            week_info,
            events,
            format_version: FORMAT_VERSION,
        }
    }
}

/// A non-fatal, per-offset problem surfaced on a batch response instead of failing the whole
/// request (spec §4.8 step 5 / §8 scenario 4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    pub offset: i32,
    pub reason: String,
}

/// Validates a date string is `YYYY-MM-DD`.
pub fn validate_iso_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Validates a time string is `HH:MM`.
pub fn validate_time(s: &str) -> bool {
    let Some((h, m)) = s.split_once(':') else {
        return false;
    };
    if h.len() != 2 || m.len() != 2 {
        return false;
    }
    matches!((h.parse::<u32>(), m.parse::<u32>()), (Ok(h), Ok(m)) if h < 24 && m < 60)
}

/// Validates a fully assembled `TimetableData` against the invariants of spec §4.9 /§3.
///
/// Unknown fields are never present on these strongly typed structs (they are simply not
/// deserialized), and optional fields already serialize as omitted via `skip_serializing_if`.
pub fn validate(data: &TimetableData) -> AdapterResult<()> {
    if let Some(week_number) = data.week_info.week_number {
        if !(1..=53).contains(&week_number) {
            return Err(AdapterError::ValidationError(format!(
                "week_number {week_number} out of range [1,53]"
            )));
        }
    }

    if let Some(start_date) = &data.week_info.start_date {
        if !validate_iso_date(start_date) {
            return Err(AdapterError::ValidationError(format!(
                "invalid start_date: {start_date}"
            )));
        }
    }
    if let Some(end_date) = &data.week_info.end_date {
        if !validate_iso_date(end_date) {
            return Err(AdapterError::ValidationError(format!(
                "invalid end_date: {end_date}"
            )));
        }
    }
    if let (Some(start_date), Some(end_date)) =
        (&data.week_info.start_date, &data.week_info.end_date)
    {
        if start_date > end_date {
            return Err(AdapterError::ValidationError(
                "start_date is after end_date".to_string(),
            ));
        }
    }

    if let (Some(year), Some(week_number)) = (data.week_info.year, data.week_info.week_number) {
        let expected_key = format!("{year}-W{week_number:02}");
        let key = data
            .week_info
            .week_key
            .clone()
            .unwrap_or_else(|| expected_key.clone());
        if key != expected_key {
            return Err(AdapterError::ValidationError(format!(
                "week_key {key} does not match computed {expected_key}"
            )));
        }
    }

    if data.format_version != FORMAT_VERSION {
        return Err(AdapterError::ValidationError(format!(
            "unsupported format_version {}",
            data.format_version
        )));
    }

    for event in &data.events {
        if !validate_iso_date(&event.date) {
            return Err(AdapterError::ValidationError(format!(
                "lesson has invalid date: {}",
                event.date
            )));
        }
        if let Some(t) = &event.start_time {
            if !validate_time(t) {
                return Err(AdapterError::ValidationError(format!(
                    "lesson has invalid start_time: {t}"
                )));
            }
        }
        if let Some(t) = &event.end_time {
            if !validate_time(t) {
                return Err(AdapterError::ValidationError(format!(
                    "lesson has invalid end_time: {t}"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TimetableData {
        TimetableData::new(
            StudentInfo {
                student_name: "Jane Doe".into(),
                class: "25A".into(),
            },
            WeekInfo::new(13, "2025-03-24".into(), "2025-03-30".into(), 2025),
            vec![],
        )
    }

    #[test]
    fn valid_payload_passes() {
        assert!(validate(&sample()).is_ok());
    }

    #[test]
    fn week_number_out_of_range_fails() {
        let mut data = sample();
        data.week_info.week_number = Some(54);
        assert!(validate(&data).is_err());
    }

    #[test]
    fn mismatched_week_key_fails() {
        let mut data = sample();
        data.week_info.week_key = Some("2025-W01".into());
        assert!(validate(&data).is_err());
    }

    #[test]
    fn start_after_end_fails() {
        let mut data = sample();
        data.week_info.start_date = Some("2025-04-01".into());
        assert!(validate(&data).is_err());
    }

    #[test]
    fn fully_empty_week_info_passes() {
        let data = TimetableData::new(
            StudentInfo {
                student_name: "".into(),
                class: "".into(),
            },
            WeekInfo::empty(),
            vec![],
        );
        assert!(validate(&data).is_ok());
    }

    #[test]
    fn time_validation() {
        assert!(validate_time("08:10"));
        assert!(validate_time("23:59"));
        assert!(!validate_time("24:00"));
        assert!(!validate_time("8:10"));
        assert!(!validate_time("08:60"));
    }
}
