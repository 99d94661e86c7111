use crate::domain::models::{DailyBand, DEFAULT_WEEKS, MAX_WEEKS};
use crate::infrastructure::error::InfraError;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const POLICIES_JSON: &str = "policies.json";
const ORACLE_JSON: &str = "oracle.json";

pub const DEFAULT_ORACLE_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_ORACLE_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/";
pub const DEFAULT_ORACLE_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 500;

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub policies: serde_json::Value,
    pub oracle: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingPolicy {
    pub band: DailyBand,
    pub verify_oracle_slot: bool,
    pub oracle_timeout_seconds: u64,
    pub default_weeks: u32,
    pub insert_batch_size: usize,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            band: DailyBand::default(),
            verify_oracle_slot: true,
            oracle_timeout_seconds: DEFAULT_ORACLE_TIMEOUT_SECONDS,
            default_weeks: DEFAULT_WEEKS,
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OracleSettings {
    pub model: String,
    pub endpoint: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_ORACLE_MODEL.to_string(),
            endpoint: DEFAULT_ORACLE_ENDPOINT.to_string(),
            temperature: 0.1,
            max_output_tokens: 4096,
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "Edunai",
                "timezone": "UTC"
            }),
        ),
        (
            POLICIES_JSON,
            serde_json::json!({
                "schema": 1,
                "scheduling": {
                    "bandStart": "08:00",
                    "bandEnd": "22:00",
                    "verifyOracleSlot": true,
                    "oracleTimeoutSeconds": DEFAULT_ORACLE_TIMEOUT_SECONDS
                },
                "recurrence": {
                    "defaultWeeks": DEFAULT_WEEKS,
                    "insertBatchSize": DEFAULT_INSERT_BATCH_SIZE
                }
            }),
        ),
        (
            ORACLE_JSON,
            serde_json::json!({
                "schema": 1,
                "model": DEFAULT_ORACLE_MODEL,
                "endpoint": DEFAULT_ORACLE_ENDPOINT,
                "temperature": 0.1,
                "maxOutputTokens": 4096
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        policies: read_config(&config_dir.join(POLICIES_JSON))?,
        oracle: read_config(&config_dir.join(ORACLE_JSON))?,
    })
}

pub fn read_timezone(config_dir: &Path) -> Result<Option<String>, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    Ok(app
        .get("timezone")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned))
}

/// Unreadable files and out-of-range values fall back to the defaults.
pub fn read_scheduling_policy(config_dir: &Path) -> SchedulingPolicy {
    let mut policy = SchedulingPolicy::default();
    let Ok(parsed) = read_config(&config_dir.join(POLICIES_JSON)) else {
        return policy;
    };

    if let Some(scheduling) = parsed.get("scheduling") {
        let band_start = read_hhmm(scheduling, "bandStart").unwrap_or(policy.band.start);
        let band_end = read_hhmm(scheduling, "bandEnd").unwrap_or(policy.band.end);
        if band_start < band_end {
            policy.band = DailyBand {
                start: band_start,
                end: band_end,
            };
        }
        if let Some(value) = scheduling
            .get("verifyOracleSlot")
            .and_then(serde_json::Value::as_bool)
        {
            policy.verify_oracle_slot = value;
        }
        if let Some(value) = scheduling
            .get("oracleTimeoutSeconds")
            .and_then(serde_json::Value::as_u64)
            .filter(|value| *value > 0)
        {
            policy.oracle_timeout_seconds = value;
        }
    }

    if let Some(recurrence) = parsed.get("recurrence") {
        if let Some(value) = recurrence
            .get("defaultWeeks")
            .and_then(serde_json::Value::as_u64)
            .filter(|value| *value > 0)
            .and_then(|value| u32::try_from(value).ok())
            .filter(|value| *value <= MAX_WEEKS)
        {
            policy.default_weeks = value;
        }
        if let Some(value) = recurrence
            .get("insertBatchSize")
            .and_then(serde_json::Value::as_u64)
            .filter(|value| *value > 0)
            .and_then(|value| usize::try_from(value).ok())
        {
            policy.insert_batch_size = value;
        }
    }

    policy
}

pub fn read_oracle_settings(config_dir: &Path) -> OracleSettings {
    let mut settings = OracleSettings::default();
    let Ok(parsed) = read_config(&config_dir.join(ORACLE_JSON)) else {
        return settings;
    };

    if let Some(model) = read_trimmed(&parsed, "model") {
        settings.model = model;
    }
    if let Some(endpoint) = read_trimmed(&parsed, "endpoint") {
        settings.endpoint = endpoint;
    }
    if let Some(value) = parsed
        .get("temperature")
        .and_then(serde_json::Value::as_f64)
        .filter(|value| (0.0..=2.0).contains(value))
    {
        settings.temperature = value;
    }
    if let Some(value) = parsed
        .get("maxOutputTokens")
        .and_then(serde_json::Value::as_u64)
        .filter(|value| *value > 0)
        .and_then(|value| u32::try_from(value).ok())
    {
        settings.max_output_tokens = value;
    }
    settings
}

fn read_hhmm(value: &serde_json::Value, key: &str) -> Option<NaiveTime> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .and_then(|raw| NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok())
}

fn read_trimmed(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}
