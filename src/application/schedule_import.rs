use crate::application::slot_finder::NowProvider;
use crate::domain::models::{parse_date, parse_hhmm, BulkClassRow, EventColor, DEFAULT_WEEKS};
use crate::domain::oracle_reply::extract_json_array;
use crate::domain::recurrence::{normalize_weeks, parse_weekday, weekday_name};
use crate::infrastructure::config::DEFAULT_ORACLE_TIMEOUT_SECONDS;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::oracle_client::{CompletionOracle, OracleAttachment};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub const SUPPORTED_MIME_TYPES: [&str; 4] =
    ["image/png", "image/jpeg", "image/webp", "application/pdf"];

const FALLBACK_START_TIME: &str = "08:00";
const FALLBACK_END_TIME: &str = "09:40";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedSchedule {
    pub rows: Vec<BulkClassRow>,
    pub raw_text: String,
}

/// Reads a course-registration document through the oracle and turns it into
/// rows the caller can review before a bulk import.
pub struct ScheduleImportService<O>
where
    O: CompletionOracle + ?Sized,
{
    oracle: Arc<O>,
    timeout: Duration,
    default_weeks: u32,
    now_provider: NowProvider,
}

impl<O> ScheduleImportService<O>
where
    O: CompletionOracle + ?Sized,
{
    pub fn new(oracle: Arc<O>) -> Self {
        Self {
            oracle,
            timeout: Duration::from_secs(DEFAULT_ORACLE_TIMEOUT_SECONDS),
            default_weeks: DEFAULT_WEEKS,
            now_provider: Arc::new(|| Local::now().naive_local()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_default_weeks(mut self, default_weeks: u32) -> Self {
        self.default_weeks = default_weeks.max(1);
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub async fn import_document(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<ImportedSchedule, InfraError> {
        let mime_type = mime_type.trim().to_ascii_lowercase();
        if !SUPPORTED_MIME_TYPES.contains(&mime_type.as_str()) {
            return Err(InfraError::InvalidConfig(format!(
                "unsupported document type {mime_type} (expected one of: {})",
                SUPPORTED_MIME_TYPES.join(", ")
            )));
        }
        if bytes.is_empty() {
            return Err(InfraError::Import("document is empty".to_string()));
        }

        let today = (self.now_provider)().date();
        let prompt = build_import_prompt(today, self.default_weeks);
        let attachment = OracleAttachment {
            mime_type,
            data: bytes,
        };

        let raw_text =
            match tokio::time::timeout(self.timeout, self.oracle.complete(&prompt, Some(&attachment)))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(InfraError::Import(format!(
                        "oracle did not answer within {} seconds",
                        self.timeout.as_secs_f64()
                    )));
                }
            };

        let rows = parse_import_reply(&raw_text, today, self.default_weeks)?;
        Ok(ImportedSchedule { rows, raw_text })
    }
}

fn build_import_prompt(today: NaiveDate, default_weeks: u32) -> String {
    let today = today.format("%Y-%m-%d");
    format!(
        "You are an academic schedule parser for Indonesian universities.\n\
         Read the attached course registration card (KRS) and list every class it contains.\n\
         For each class output an object with exactly these fields:\n\
         - \"course_name\": the course name, with its code if printed.\n\
         - \"day_of_week\": one of Monday, Tuesday, Wednesday, Thursday, Friday, Saturday, Sunday \
         (Senin=Monday, Selasa=Tuesday, Rabu=Wednesday, Kamis=Thursday, Jumat=Friday, Sabtu=Saturday, Minggu=Sunday).\n\
         - \"start_time\" and \"end_time\": 24-hour HH:mm, e.g. \"08:00\" and \"09:40\".\n\
         - \"location\": room or building if visible, otherwise \"\".\n\
         - \"color\": \"purple\" for labs, \"green\" for electives, otherwise \"blue\".\n\
         - \"semester_start_date\": \"{today}\".\n\
         - \"weeks\": {default_weeks}.\n\
         A class that meets on several days gets one entry per day. Ranges such as \"08.00-09.40\" give both times.\n\
         Reply with a JSON array only. If no schedule is readable, reply with [].\n\
         Example: [{{\"course_name\":\"Kalkulus I\",\"day_of_week\":\"Monday\",\"start_time\":\"08:00\",\"end_time\":\"09:40\",\"location\":\"GK-101\",\"color\":\"blue\",\"semester_start_date\":\"{today}\",\"weeks\":{default_weeks}}}]"
    )
}

fn parse_import_reply(
    raw_text: &str,
    today: NaiveDate,
    default_weeks: u32,
) -> Result<Vec<BulkClassRow>, InfraError> {
    let json = extract_json_array(raw_text).ok_or_else(|| {
        InfraError::Import(
            "could not detect a schedule in this document; check the image or PDF quality and try again"
                .to_string(),
        )
    })?;
    let entries: Vec<serde_json::Value> = serde_json::from_str(json)
        .map_err(|error| InfraError::Import(format!("schedule reply is not valid JSON: {error}")))?;
    if entries.is_empty() {
        return Err(InfraError::Import(
            "no schedule entries were extracted; the document may be unclear or unsupported"
                .to_string(),
        ));
    }

    let rows = entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let row = entry
                .as_object()
                .map(BulkClassRow::from_record)
                .and_then(|row| sanitize_row(row, today, default_weeks));
            if row.is_none() {
                tracing::warn!(index, "skipping unreadable schedule entry");
            }
            row
        })
        .collect::<Vec<_>>();

    if rows.is_empty() {
        return Err(InfraError::Import(
            "no schedule entries were extracted; the document may be unclear or unsupported"
                .to_string(),
        ));
    }
    Ok(rows)
}

/// Entries without a course name or weekday are dropped; other bad fields are
/// replaced with defaults so the caller can fix them during review.
fn sanitize_row(row: BulkClassRow, today: NaiveDate, default_weeks: u32) -> Option<BulkClassRow> {
    let course_name = row.course_name.trim().to_string();
    if course_name.is_empty() {
        return None;
    }
    let weekday = parse_weekday(&row.day_of_week).ok()?;

    let start_time = parse_hhmm(&row.start_time, "start_time")
        .map(|_| row.start_time.trim().to_string())
        .unwrap_or_else(|_| FALLBACK_START_TIME.to_string());
    let end_time = parse_hhmm(&row.end_time, "end_time")
        .map(|_| row.end_time.trim().to_string())
        .unwrap_or_else(|_| FALLBACK_END_TIME.to_string());
    let semester_start_date = parse_date(&row.semester_start_date, "semester_start_date")
        .unwrap_or(today)
        .format("%Y-%m-%d")
        .to_string();

    Some(BulkClassRow {
        course_name,
        day_of_week: weekday_name(weekday).to_string(),
        start_time,
        end_time,
        location: row.location.trim().to_string(),
        color: EventColor::normalize(&row.color).as_str().to_string(),
        semester_start_date,
        weeks: Some(i64::from(normalize_weeks(row.weeks, default_weeks))),
    })
}
