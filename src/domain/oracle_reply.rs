//! Prompt construction and reply handling for oracle-chosen task slots.
//!
//! The oracle is asked for `{"start_time": ..., "end_time": ...}` but may wrap
//! the object in prose or code fences, append zone suffixes, or ignore the
//! constraints entirely. Nothing here trusts the raw text.

use crate::domain::error::OracleFormatError;
use crate::domain::models::{DailyBand, ScheduledInterval, TaskSchedulingRequest};
use chrono::{Duration, NaiveDateTime, Timelike};

pub const FREE_SCHEDULE_MARKER: &str = "No existing events. The schedule is completely free.";

const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M";

pub fn format_existing_events(request: &TaskSchedulingRequest) -> String {
    if request.existing_events.is_empty() {
        return FREE_SCHEDULE_MARKER.to_string();
    }
    let mut events = request.existing_events.iter().collect::<Vec<_>>();
    events.sort_by_key(|event| event.start_time);
    events
        .into_iter()
        .map(|event| {
            format!(
                "- {}: {} to {}",
                event.title,
                event.start_time.format(DISPLAY_FORMAT),
                event.end_time.format(DISPLAY_FORMAT)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_scheduling_prompt(request: &TaskSchedulingRequest, band: &DailyBand) -> String {
    let band_start = band.start.format("%H:%M");
    let band_end = band.end.format("%H:%M");
    let hours = request.duration_hours;
    format!(
        "You are a scheduling assistant for a university student.\n\
         Task to place: \"{title}\"\n\
         Estimated duration: {hours} hours\n\
         Deadline: {deadline}\n\
         Current time: {now}\n\
         \n\
         Fixed schedule between now and the deadline:\n\
         {schedule}\n\
         \n\
         Rules:\n\
         1. Choose one continuous block of {hours} hours for the task.\n\
         2. The block must not overlap any event listed above.\n\
         3. The block must start and end on the same day between {band_start} and {band_end} local time.\n\
         4. The block must start after the current time and end before the deadline; prefer the earliest valid block.\n\
         5. Reply with a single JSON object and nothing else:\n\
         {{ \"start_time\": \"YYYY-MM-DDTHH:mm:00\", \"end_time\": \"YYYY-MM-DDTHH:mm:00\" }}\n\
         Use plain local date-times with no timezone suffix: \"2026-02-28T14:00:00\", never \"2026-02-28T14:00:00Z\" or \"2026-02-28T14:00:00+07:00\".",
        title = request.title.trim(),
        deadline = request.deadline.format(DISPLAY_FORMAT),
        now = request.now.format(DISPLAY_FORMAT),
        schedule = format_existing_events(request),
    )
}

/// Returns the first balanced `open ... close` span that parses as JSON, or
/// the first balanced span at all so the caller can report the parse error.
fn extract_balanced(text: &str, open: u8, close: u8) -> Option<&str> {
    let mut fallback = None;
    let mut search = 0;
    while let Some(offset) = text.as_bytes()[search..].iter().position(|byte| *byte == open) {
        let start = search + offset;
        if let Some(span) = balanced_span(text, start, open, close) {
            if serde_json::from_str::<serde_json::Value>(span).is_ok() {
                return Some(span);
            }
            fallback.get_or_insert(span);
        }
        search = start + 1;
    }
    fallback
}

/// Balanced span starting at `start`, skipping delimiters inside JSON strings.
fn balanced_span(text: &str, start: usize, open: u8, close: u8) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in bytes[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match *byte {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn extract_json_object(text: &str) -> Option<&str> {
    extract_balanced(text, b'{', b'}')
}

pub fn extract_json_array(text: &str) -> Option<&str> {
    extract_balanced(text, b'[', b']')
}

/// Drops a trailing `Z` or `±HH:MM`; the remainder is read as wall-clock time.
pub fn strip_zone_suffix(value: &str) -> &str {
    let value = value.trim();
    if let Some(stripped) = value.strip_suffix(['Z', 'z']) {
        return stripped;
    }
    let bytes = value.as_bytes();
    if bytes.len() > 6 {
        let suffix = &bytes[bytes.len() - 6..];
        let is_offset = matches!(suffix[0], b'+' | b'-')
            && suffix[1].is_ascii_digit()
            && suffix[2].is_ascii_digit()
            && suffix[3] == b':'
            && suffix[4].is_ascii_digit()
            && suffix[5].is_ascii_digit();
        if is_offset {
            return &value[..value.len() - 6];
        }
    }
    value
}

/// Accepts `YYYY-MM-DDTHH:mm`, optionally with seconds and a fraction.
pub fn parse_local_timestamp(value: &str) -> Result<NaiveDateTime, OracleFormatError> {
    let normalized = strip_zone_suffix(value);
    if !has_timestamp_shape(normalized) {
        return Err(OracleFormatError::new(format!(
            "invalid timestamp format from oracle: {value}"
        )));
    }
    NaiveDateTime::parse_from_str(normalized, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(normalized, "%Y-%m-%dT%H:%M"))
        .map_err(|_| OracleFormatError::new(format!("invalid timestamp format from oracle: {value}")))
}

/// `DDDD-DD-DDTDD:DD`, then nothing or `:DD` with an optional `.D+` fraction.
fn has_timestamp_shape(value: &str) -> bool {
    const PATTERN: &[u8] = b"dddd-dd-ddTdd:dd";
    let bytes = value.as_bytes();
    if bytes.len() < PATTERN.len() {
        return false;
    }
    let (head, rest) = bytes.split_at(PATTERN.len());
    let head_ok = head.iter().zip(PATTERN).all(|(byte, expected)| match *expected {
        b'd' => byte.is_ascii_digit(),
        _ => byte == expected,
    });
    if !head_ok {
        return false;
    }
    match rest {
        [] => true,
        [b':', s1, s2, fraction @ ..] if s1.is_ascii_digit() && s2.is_ascii_digit() => {
            match fraction {
                [] => true,
                [b'.', digits @ ..] => !digits.is_empty() && digits.iter().all(u8::is_ascii_digit),
                _ => false,
            }
        }
        _ => false,
    }
}

pub fn parse_interval_reply(raw: &str) -> Result<ScheduledInterval, OracleFormatError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| OracleFormatError::new("oracle reply did not contain a JSON object"))?;
    let parsed: serde_json::Value = serde_json::from_str(json)
        .map_err(|error| OracleFormatError::new(format!("oracle reply is not valid JSON: {error}")))?;

    let start = string_field(&parsed, &["start_time", "startTime"])?;
    let end = string_field(&parsed, &["end_time", "endTime"])?;

    Ok(ScheduledInterval {
        start: parse_local_timestamp(start)?,
        end: parse_local_timestamp(end)?,
    })
}

fn string_field<'a>(
    value: &'a serde_json::Value,
    keys: &[&'static str],
) -> Result<&'a str, OracleFormatError> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(serde_json::Value::as_str))
        .ok_or_else(|| {
            OracleFormatError::new(format!("oracle reply is missing string field {}", keys[0]))
        })
}

/// Independent check of the oracle's choice against the request.
pub fn verify_interval(
    interval: &ScheduledInterval,
    request: &TaskSchedulingRequest,
    band: &DailyBand,
) -> Result<(), String> {
    if interval.end <= interval.start {
        return Err("end_time is not after start_time".to_string());
    }
    let requested = request.duration().map_err(|error| error.to_string())?;
    if interval.length() < requested {
        return Err(format!(
            "slot lasts {} minutes but {} were requested",
            interval.length().num_minutes(),
            requested.num_minutes()
        ));
    }
    if interval.start < truncate_to_minute(request.now) {
        return Err("slot starts in the past".to_string());
    }
    if interval.end > request.deadline {
        return Err("slot ends after the deadline".to_string());
    }
    if !band.contains(interval) {
        return Err(format!(
            "slot is outside {}-{} on a single day",
            band.start.format("%H:%M"),
            band.end.format("%H:%M")
        ));
    }
    if let Some(conflict) = request
        .existing_events
        .iter()
        .find(|event| interval.overlaps(event.start_time, event.end_time))
    {
        return Err(format!("slot overlaps \"{}\"", conflict.title));
    }
    Ok(())
}

fn truncate_to_minute(value: NaiveDateTime) -> NaiveDateTime {
    value - Duration::seconds(i64::from(value.second())) - Duration::nanoseconds(i64::from(value.nanosecond()))
}
