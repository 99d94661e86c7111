use crate::domain::error::ValidationError;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WEEKS: u32 = 16;
pub const MAX_WEEKS: u32 = 104;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Class,
    Exam,
    Meeting,
    Task,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Exam => "exam",
            Self::Meeting => "meeting",
            Self::Task => "task",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "class" => Some(Self::Class),
            "exam" => Some(Self::Exam),
            "meeting" => Some(Self::Meeting),
            "task" => Some(Self::Task),
            _ => None,
        }
    }
}

/// Presentational palette. Unknown names fall back to blue instead of failing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventColor {
    #[default]
    Blue,
    Purple,
    Green,
    Orange,
}

impl EventColor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blue => "blue",
            Self::Purple => "purple",
            Self::Green => "green",
            Self::Orange => "orange",
        }
    }

    pub fn normalize(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "purple" => Self::Purple,
            "green" => Self::Green,
            "orange" => Self::Orange,
            _ => Self::Blue,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarEvent {
    pub title: String,
    pub location: Option<String>,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub event_type: EventType,
    pub color: EventColor,
}

impl CalendarEvent {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_non_empty(&self.title, "event.title")?;
        if self.end_time <= self.start_time {
            return Err(ValidationError::InvalidTimeRange);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredEvent {
    pub id: String,
    #[serde(flatten)]
    pub event: CalendarEvent,
}

/// A weekly class definition that has passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceSpec {
    pub title: String,
    pub location: Option<String>,
    pub color: EventColor,
    pub day_of_week: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub semester_start_date: NaiveDate,
    pub weeks: u32,
}

/// One raw row of a spreadsheet or document import, before validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BulkClassRow {
    pub course_name: String,
    pub day_of_week: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub color: String,
    pub semester_start_date: String,
    #[serde(default)]
    pub weeks: Option<i64>,
}

impl BulkClassRow {
    /// Reads a loosely typed spreadsheet record. Both the template's snake_case
    /// headers and the human-readable column titles are accepted.
    pub fn from_record(record: &serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            course_name: record_field(record, &["course_name", "Course Name"]),
            day_of_week: record_field(record, &["day_of_week", "Day of Week"]),
            start_time: record_field(record, &["start_time", "Start Time"]),
            end_time: record_field(record, &["end_time", "End Time"]),
            location: record_field(record, &["location", "Location"]),
            color: record_field(record, &["color", "Color"]).to_ascii_lowercase(),
            semester_start_date: record_field(
                record,
                &["semester_start_date", "Semester Start Date"],
            ),
            weeks: parse_weeks_value(&record_field(record, &["weeks", "Weeks"])),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusyEvent {
    pub title: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
}

impl From<&CalendarEvent> for BusyEvent {
    fn from(event: &CalendarEvent) -> Self {
        Self {
            title: event.title.clone(),
            start_time: event.start_time,
            end_time: event.end_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskSchedulingRequest {
    pub title: String,
    pub color: EventColor,
    pub duration_hours: f64,
    pub deadline: NaiveDateTime,
    pub now: NaiveDateTime,
    pub existing_events: Vec<BusyEvent>,
}

impl TaskSchedulingRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_non_empty(&self.title, "task.title")?;
        if self.duration()? > self.deadline.signed_duration_since(self.now) {
            return Err(ValidationError::DurationExceedsWindow);
        }
        Ok(())
    }

    /// Requested length rounded to whole minutes.
    pub fn duration(&self) -> Result<Duration, ValidationError> {
        let minutes = (self.duration_hours * 60.0).round();
        if !minutes.is_finite() || minutes < 1.0 || minutes > i64::MAX as f64 {
            return Err(ValidationError::InvalidDuration);
        }
        Duration::try_minutes(minutes as i64).ok_or(ValidationError::InvalidDuration)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledInterval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ScheduledInterval {
    pub fn length(&self) -> Duration {
        self.end - self.start
    }

    /// Half-open overlap: touching intervals do not overlap.
    pub fn overlaps(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        self.start < end && start < self.end
    }
}

/// Daily window inside which tasks may be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyBand {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for DailyBand {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(8, 0, 0).expect("valid fixed time"),
            end: NaiveTime::from_hms_opt(22, 0, 0).expect("valid fixed time"),
        }
    }
}

impl DailyBand {
    pub fn contains(&self, interval: &ScheduledInterval) -> bool {
        if interval.start.date() != interval.end.date() {
            return false;
        }
        interval.start.time() >= self.start && interval.end.time() <= self.end
    }
}

pub fn validate_non_empty(value: &str, field_name: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(field_name));
    }
    Ok(())
}

/// Strict two-digit 24-hour `HH:mm`.
pub fn parse_hhmm(value: &str, field_name: &'static str) -> Result<NaiveTime, ValidationError> {
    let value = value.trim();
    let invalid = || ValidationError::InvalidTimeFormat {
        field: field_name,
        value: value.to_string(),
    };
    let bytes = value.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return Err(invalid());
    }
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|_| invalid())
}

/// Strict `YYYY-MM-DD`.
pub fn parse_date(value: &str, field_name: &'static str) -> Result<NaiveDate, ValidationError> {
    let value = value.trim();
    let invalid = || ValidationError::InvalidDateFormat {
        field: field_name,
        value: value.to_string(),
    };
    if value.len() != 10 || !value.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| invalid())
}

fn record_field(record: &serde_json::Map<String, serde_json::Value>, keys: &[&str]) -> String {
    for key in keys {
        let value = match record.get(*key) {
            Some(serde_json::Value::String(value)) => value.trim().to_string(),
            Some(serde_json::Value::Number(value)) => value.to_string(),
            _ => continue,
        };
        if !value.is_empty() {
            return value;
        }
    }
    String::new()
}

fn parse_weeks_value(raw: &str) -> Option<i64> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(value) = raw.parse::<i64>() {
        return Some(value);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && value.fract() == 0.0)
        .map(|value| value as i64)
}
