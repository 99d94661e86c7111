pub mod application;
pub mod domain;
pub mod infrastructure;

use application::bootstrap::bootstrap_workspace;
use application::commands::{
    add_ai_task_impl, add_fixed_class_impl, bulk_import_classes_impl, complete_event_impl,
    import_schedule_document_impl, list_events_impl, AddAiTaskInput, AddFixedClassInput,
    AiTaskResponse, ClassImportResponse,
};
use application::schedule_import::ImportedSchedule;
use domain::models::StoredEvent;
use serde::Serialize;
use std::path::PathBuf;

pub use application::commands::AppState;
pub use application::slot_finder::{SlotFinder, TaskDraft};
pub use domain::recurrence::{expand_bulk, expand_recurrence};

#[derive(Debug, Serialize)]
pub struct BootstrapResponse {
    pub workspace_root: String,
    pub database_path: String,
}

pub fn bootstrap(root: Option<String>) -> Result<BootstrapResponse, String> {
    let workspace_root = match root {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().map_err(|error| error.to_string())?,
    };

    let result = bootstrap_workspace(&workspace_root).map_err(|error| error.to_string())?;
    Ok(BootstrapResponse {
        workspace_root: result.workspace_root.display().to_string(),
        database_path: result.database_path.display().to_string(),
    })
}

pub fn add_fixed_class(
    state: &AppState,
    input: AddFixedClassInput,
) -> Result<ClassImportResponse, String> {
    add_fixed_class_impl(state, input).map_err(|error| state.command_error("add_fixed_class", &error))
}

pub fn bulk_import_classes(
    state: &AppState,
    rows: Vec<serde_json::Value>,
) -> Result<ClassImportResponse, String> {
    bulk_import_classes_impl(state, rows)
        .map_err(|error| state.command_error("bulk_import_classes", &error))
}

pub async fn import_schedule_document(
    state: &AppState,
    file_base64: String,
    mime_type: String,
) -> Result<ImportedSchedule, String> {
    import_schedule_document_impl(state, file_base64, mime_type)
        .await
        .map_err(|error| state.command_error("import_schedule_document", &error))
}

pub async fn add_ai_task(state: &AppState, input: AddAiTaskInput) -> Result<AiTaskResponse, String> {
    add_ai_task_impl(state, input)
        .await
        .map_err(|error| state.command_error("add_ai_task", &error))
}

pub fn list_events(
    state: &AppState,
    from: Option<String>,
    to: Option<String>,
    event_type: Option<String>,
) -> Result<Vec<StoredEvent>, String> {
    list_events_impl(state, from, to, event_type)
        .map_err(|error| state.command_error("list_events", &error))
}

pub fn complete_event(state: &AppState, event_id: String) -> Result<bool, String> {
    complete_event_impl(state, event_id)
        .map_err(|error| state.command_error("complete_event", &error))
}
