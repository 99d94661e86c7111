//! Weekly class expansion.
//!
//! A class meets on one weekday; its instances are the first matching date on or
//! after the semester start plus whole weeks. All timestamps are wall-clock
//! values built from the date and the `HH:mm` fields, never converted between
//! zones.

use crate::domain::error::ValidationError;
use crate::domain::models::{
    BulkClassRow, CalendarEvent, EventColor, EventType, MAX_WEEKS, RecurrenceSpec, parse_date,
    parse_hhmm,
};
use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, Weekday};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowRejection {
    pub row_index: usize,
    pub title: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkExpansion {
    pub events: Vec<CalendarEvent>,
    pub rejected: Vec<RowRejection>,
    pub accepted_rows: usize,
}

pub fn parse_weekday(value: &str) -> Result<Weekday, ValidationError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "sunday" => Ok(Weekday::Sun),
        "monday" => Ok(Weekday::Mon),
        "tuesday" => Ok(Weekday::Tue),
        "wednesday" => Ok(Weekday::Wed),
        "thursday" => Ok(Weekday::Thu),
        "friday" => Ok(Weekday::Fri),
        "saturday" => Ok(Weekday::Sat),
        _ => Err(ValidationError::InvalidDayOfWeek(value.trim().to_string())),
    }
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Sunday = 0 ... Saturday = 6.
pub fn day_index(weekday: Weekday) -> u32 {
    weekday.num_days_from_sunday()
}

pub fn first_occurrence(semester_start_date: NaiveDate, weekday: Weekday) -> NaiveDate {
    let offset = (day_index(weekday) + 7 - day_index(semester_start_date.weekday())) % 7;
    semester_start_date + Days::new(u64::from(offset))
}

/// Non-positive or missing counts become `default_weeks`.
pub fn normalize_weeks(raw: Option<i64>, default_weeks: u32) -> u32 {
    raw.filter(|weeks| *weeks > 0)
        .and_then(|weeks| u32::try_from(weeks).ok())
        .unwrap_or(default_weeks)
}

pub fn expand_recurrence(spec: &RecurrenceSpec) -> Vec<CalendarEvent> {
    let first = first_occurrence(spec.semester_start_date, spec.day_of_week);
    (0..spec.weeks)
        .filter_map(|week| first.checked_add_days(Days::new(7 * u64::from(week))))
        .map(|date| CalendarEvent {
            title: spec.title.clone(),
            location: spec.location.clone(),
            start_time: NaiveDateTime::new(date, spec.start_time),
            end_time: NaiveDateTime::new(date, spec.end_time),
            event_type: EventType::Class,
            color: spec.color,
        })
        .collect()
}

impl RecurrenceSpec {
    /// Validates a raw row, collecting every problem instead of stopping at the
    /// first one.
    pub fn from_row(row: &BulkClassRow, default_weeks: u32) -> Result<Self, Vec<ValidationError>> {
        let mut errors = Vec::new();

        let title = row.course_name.trim().to_string();
        if title.is_empty() {
            errors.push(ValidationError::EmptyField("course_name"));
        }
        let day_of_week = parse_weekday(&row.day_of_week).map_err(|error| errors.push(error));
        let start_time = parse_hhmm(&row.start_time, "start_time").map_err(|error| errors.push(error));
        let end_time = parse_hhmm(&row.end_time, "end_time").map_err(|error| errors.push(error));
        let semester_start_date = parse_date(&row.semester_start_date, "semester_start_date")
            .map_err(|error| errors.push(error));
        if let Some(weeks) = row.weeks.filter(|weeks| *weeks > i64::from(MAX_WEEKS)) {
            errors.push(ValidationError::TooManyWeeks {
                weeks,
                max: MAX_WEEKS,
            });
        }

        let (Ok(day_of_week), Ok(start_time), Ok(end_time), Ok(semester_start_date)) =
            (day_of_week, start_time, end_time, semester_start_date)
        else {
            return Err(errors);
        };
        if end_time <= start_time {
            errors.push(ValidationError::InvalidTimeRange);
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let location = row.location.trim();
        Ok(Self {
            title,
            location: (!location.is_empty()).then(|| location.to_string()),
            color: EventColor::normalize(&row.color),
            day_of_week,
            start_time,
            end_time,
            semester_start_date,
            weeks: normalize_weeks(row.weeks, default_weeks),
        })
    }
}

pub fn expand_bulk(rows: &[BulkClassRow], default_weeks: u32) -> BulkExpansion {
    let mut expansion = BulkExpansion::default();
    for (row_index, row) in rows.iter().enumerate() {
        match RecurrenceSpec::from_row(row, default_weeks) {
            Ok(spec) => {
                expansion.events.extend(expand_recurrence(&spec));
                expansion.accepted_rows += 1;
            }
            Err(errors) => expansion.rejected.push(RowRejection {
                row_index,
                title: row.course_name.trim().to_string(),
                reason: errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            }),
        }
    }
    expansion
}
