use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("day \"{0}\" is not a recognized weekday")]
    InvalidDayOfWeek(String),
    #[error("{field} must be HH:mm (got \"{value}\")")]
    InvalidTimeFormat { field: &'static str, value: String },
    #[error("{field} must be YYYY-MM-DD (got \"{value}\")")]
    InvalidDateFormat { field: &'static str, value: String },
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("end_time must be after start_time")]
    InvalidTimeRange,
    #[error("duration_hours must be a positive number")]
    InvalidDuration,
    #[error("duration_hours does not fit before the deadline")]
    DurationExceedsWindow,
    #[error("weeks must be at most {max} (got {weeks})")]
    TooManyWeeks { weeks: i64, max: u32 },
}

/// The oracle's reply could not be turned into an interval.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct OracleFormatError(pub String);

impl OracleFormatError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
