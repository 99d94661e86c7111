use crate::application::bootstrap::bootstrap_workspace;
use crate::application::schedule_import::{ImportedSchedule, ScheduleImportService};
use crate::application::slot_finder::{NowProvider, SlotFinder, TaskDraft};
use crate::domain::error::ValidationError;
use crate::domain::models::{
    parse_date, BulkClassRow, CalendarEvent, EventColor, EventType, RecurrenceSpec, StoredEvent,
};
use crate::domain::recurrence::{expand_bulk, expand_recurrence, weekday_name, RowRejection};
use crate::infrastructure::config::{
    read_oracle_settings, read_scheduling_policy, read_timezone, SchedulingPolicy,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_store::{EventFilter, EventStore, SqliteEventStore};
use crate::infrastructure::oracle_client::{CompletionOracle, ReqwestGeminiClient};
use base64::Engine;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const API_KEY_LOOKUP_KEYS: [&str; 2] = ["EDUNAI_GOOGLE_AI_API_KEY", "GOOGLE_AI_API_KEY"];

pub struct AppState {
    config_dir: PathBuf,
    logs_dir: PathBuf,
    event_store: Arc<dyn EventStore>,
    oracle: Option<Arc<dyn CompletionOracle>>,
    now_provider: Option<NowProvider>,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let event_store = Arc::new(SqliteEventStore::new(&bootstrap.database_path));

        Ok(Self {
            config_dir: bootstrap.config_dir,
            logs_dir: bootstrap.logs_dir,
            event_store,
            oracle: None,
            now_provider: None,
            log_guard: Mutex::new(()),
        })
    }

    pub fn with_event_store(mut self, event_store: Arc<dyn EventStore>) -> Self {
        self.event_store = event_store;
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn CompletionOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = Some(now_provider);
        self
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    /// Wall-clock time in the configured timezone.
    fn now(&self) -> Result<NaiveDateTime, InfraError> {
        if let Some(now_provider) = &self.now_provider {
            return Ok(now_provider());
        }
        let Some(timezone) = read_timezone(&self.config_dir)? else {
            return Ok(Utc::now().naive_utc());
        };
        let tz = timezone.parse::<chrono_tz::Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!("invalid timezone '{timezone}' in app.json: {error}"))
        })?;
        Ok(Utc::now().with_timezone(&tz).naive_local())
    }

    fn oracle(&self, policy: &SchedulingPolicy) -> Result<Arc<dyn CompletionOracle>, InfraError> {
        if let Some(oracle) = &self.oracle {
            return Ok(Arc::clone(oracle));
        }
        let api_key = load_oracle_api_key_from_env()?;
        let settings = read_oracle_settings(&self.config_dir);
        let client = ReqwestGeminiClient::new(
            api_key,
            settings,
            Duration::from_secs(policy.oracle_timeout_seconds),
        )?;
        Ok(Arc::new(client))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddFixedClassInput {
    pub title: String,
    #[serde(default)]
    pub location: Option<String>,
    /// Defaults to the weekday of `semester_start_date`.
    #[serde(default)]
    pub day_of_week: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub semester_start_date: String,
    #[serde(default)]
    pub weeks: Option<i64>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddAiTaskInput {
    pub title: String,
    pub duration_hours: f64,
    /// `YYYY-MM-DD`; the task may run until 23:59:59 of that day.
    pub deadline_date: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ClassImportResponse {
    pub total_events: usize,
    pub accepted_rows: usize,
    pub rejected: Vec<RowRejection>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AiTaskResponse {
    pub event: StoredEvent,
    pub ai_start: String,
    pub ai_end: String,
}

pub fn add_fixed_class_impl(
    state: &AppState,
    input: AddFixedClassInput,
) -> Result<ClassImportResponse, InfraError> {
    let policy = read_scheduling_policy(state.config_dir());
    let day_of_week = match input.day_of_week.filter(|day| !day.trim().is_empty()) {
        Some(day) => day,
        None => {
            let start_date = parse_date(&input.semester_start_date, "semester_start_date")?;
            weekday_name(start_date.weekday()).to_string()
        }
    };
    let row = BulkClassRow {
        course_name: input.title,
        day_of_week,
        start_time: input.start_time,
        end_time: input.end_time,
        location: input.location.unwrap_or_default(),
        color: input.color.unwrap_or_default(),
        semester_start_date: input.semester_start_date,
        weeks: input.weeks,
    };

    let spec = RecurrenceSpec::from_row(&row, policy.default_weeks)
        .map_err(|errors| InfraError::Validation(first_error(errors)))?;
    let events = expand_recurrence(&spec);
    insert_in_batches(state.event_store.as_ref(), &events, policy.insert_batch_size)?;

    state.log_info(
        "add_fixed_class",
        &format!(
            "created {} weekly events for '{}' on {}",
            events.len(),
            spec.title,
            weekday_name(spec.day_of_week)
        ),
    );
    Ok(ClassImportResponse {
        total_events: events.len(),
        accepted_rows: 1,
        rejected: Vec::new(),
    })
}

fn first_error(errors: Vec<ValidationError>) -> ValidationError {
    errors
        .into_iter()
        .next()
        .unwrap_or(ValidationError::EmptyField("row"))
}

/// Records may use the template's snake_case headers or the spreadsheet's
/// human-readable column titles.
pub fn bulk_import_classes_impl(
    state: &AppState,
    records: Vec<serde_json::Value>,
) -> Result<ClassImportResponse, InfraError> {
    let policy = read_scheduling_policy(state.config_dir());
    let rows = records
        .iter()
        .map(|record| {
            record
                .as_object()
                .map(BulkClassRow::from_record)
                .unwrap_or_default()
        })
        .collect::<Vec<_>>();

    let expansion = expand_bulk(&rows, policy.default_weeks);
    for rejection in &expansion.rejected {
        tracing::warn!(
            row = rejection.row_index,
            title = %rejection.title,
            reason = %rejection.reason,
            "skipping invalid class row"
        );
    }
    if expansion.events.is_empty() {
        return Err(InfraError::Import("No valid rows found to import.".to_string()));
    }

    insert_in_batches(
        state.event_store.as_ref(),
        &expansion.events,
        policy.insert_batch_size,
    )?;
    state.log_info(
        "bulk_import_classes",
        &format!(
            "imported {} events from {} rows ({} rejected)",
            expansion.events.len(),
            expansion.accepted_rows,
            expansion.rejected.len()
        ),
    );
    Ok(ClassImportResponse {
        total_events: expansion.events.len(),
        accepted_rows: expansion.accepted_rows,
        rejected: expansion.rejected,
    })
}

pub async fn import_schedule_document_impl(
    state: &AppState,
    file_base64: String,
    mime_type: String,
) -> Result<ImportedSchedule, InfraError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(file_base64.trim())
        .map_err(|error| InfraError::InvalidConfig(format!("document is not valid base64: {error}")))?;
    let policy = read_scheduling_policy(state.config_dir());
    let now = state.now()?;
    let service = ScheduleImportService::new(state.oracle(&policy)?)
        .with_timeout(Duration::from_secs(policy.oracle_timeout_seconds))
        .with_default_weeks(policy.default_weeks)
        .with_now_provider(Arc::new(move || now));

    let imported = service.import_document(bytes, &mime_type).await?;
    state.log_info(
        "import_schedule_document",
        &format!("extracted {} class rows from {mime_type}", imported.rows.len()),
    );
    Ok(imported)
}

pub async fn add_ai_task_impl(
    state: &AppState,
    input: AddAiTaskInput,
) -> Result<AiTaskResponse, InfraError> {
    let deadline_date = parse_date(&input.deadline_date, "deadline_date")?;
    let policy = read_scheduling_policy(state.config_dir());
    let now = state.now()?;
    let finder = SlotFinder::new(state.oracle(&policy)?, Arc::clone(&state.event_store))
        .with_policy(&policy)
        .with_now_provider(Arc::new(move || now));

    let event = finder
        .schedule_task(TaskDraft {
            title: input.title,
            color: EventColor::normalize(input.color.as_deref().unwrap_or_default()),
            duration_hours: input.duration_hours,
            deadline: end_of_day(deadline_date),
        })
        .await?;

    let ids = state.event_store.insert_batch(std::slice::from_ref(&event))?;
    let id = ids
        .into_iter()
        .next()
        .ok_or_else(|| InfraError::Store("insert returned no id".to_string()))?;
    let ai_start = event.start_time.format("%Y-%m-%dT%H:%M:%S").to_string();
    let ai_end = event.end_time.format("%Y-%m-%dT%H:%M:%S").to_string();
    state.log_info(
        "add_ai_task",
        &format!("scheduled '{}' from {ai_start} to {ai_end}", event.title),
    );
    Ok(AiTaskResponse {
        event: StoredEvent { id, event },
        ai_start,
        ai_end,
    })
}

pub fn list_events_impl(
    state: &AppState,
    from: Option<String>,
    to: Option<String>,
    event_type: Option<String>,
) -> Result<Vec<StoredEvent>, InfraError> {
    let from = from
        .map(|raw| parse_datetime_input(&raw, "from"))
        .transpose()?;
    let to = to.map(|raw| parse_datetime_input(&raw, "to")).transpose()?;
    if let (Some(from), Some(to)) = (from, to) {
        if to <= from {
            return Err(InfraError::InvalidConfig(
                "to must be greater than from".to_string(),
            ));
        }
    }
    let event_type = event_type
        .map(|raw| {
            EventType::parse(&raw).ok_or_else(|| {
                InfraError::InvalidConfig(format!(
                    "event_type must be one of class, exam, meeting, task (got '{raw}')"
                ))
            })
        })
        .transpose()?;

    state.event_store.query(&EventFilter {
        from,
        to,
        event_type,
    })
}

/// Completing an event removes it from the calendar.
pub fn complete_event_impl(state: &AppState, event_id: String) -> Result<bool, InfraError> {
    let event_id = event_id.trim();
    if event_id.is_empty() {
        return Err(ValidationError::EmptyField("event_id").into());
    }
    let removed = state.event_store.delete(event_id)?;
    if removed {
        state.log_info("complete_event", &format!("completed event {event_id}"));
    }
    Ok(removed)
}

/// Inserts in chunks; if a later chunk fails the earlier chunks are deleted
/// again so the request leaves nothing behind.
fn insert_in_batches(
    store: &dyn EventStore,
    events: &[CalendarEvent],
    batch_size: usize,
) -> Result<Vec<String>, InfraError> {
    let mut inserted = Vec::with_capacity(events.len());
    for chunk in events.chunks(batch_size.max(1)) {
        match store.insert_batch(chunk) {
            Ok(ids) => inserted.extend(ids),
            Err(error) => {
                if !inserted.is_empty() {
                    if let Err(cleanup_error) = store.delete_many(&inserted) {
                        tracing::warn!(
                            %cleanup_error,
                            orphaned = inserted.len(),
                            "failed to roll back earlier batches"
                        );
                    }
                }
                return Err(error);
            }
        }
    }
    Ok(inserted)
}

fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(23, 59, 59).expect("valid fixed time"))
}

fn parse_datetime_input(value: &str, field_name: &str) -> Result<NaiveDateTime, InfraError> {
    let value = value.trim();
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(parsed);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    Err(InfraError::InvalidConfig(format!(
        "{field_name} must be YYYY-MM-DD or YYYY-MM-DDTHH:mm[:ss]"
    )))
}

fn load_oracle_api_key_from_env() -> Result<String, InfraError> {
    load_oracle_api_key_from_lookup(|key| std::env::var(key).ok())
}

fn load_oracle_api_key_from_lookup<F>(lookup: F) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    required_lookup_value(&lookup, &API_KEY_LOOKUP_KEYS, "google ai api key")
}

fn required_lookup_value<F>(
    lookup: &F,
    keys: &[&str],
    field_name: &str,
) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    optional_lookup_value(lookup, keys).ok_or_else(|| {
        InfraError::InvalidConfig(format!(
            "missing {} (set one of: {})",
            field_name,
            keys.join(", ")
        ))
    })
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}
