use crate::domain::models::{CalendarEvent, EventColor, EventType, StoredEvent};
use crate::infrastructure::error::InfraError;
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, params_from_iter, Connection};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

/// Window filter with intersection semantics: an event matches when it ends
/// after `from` and starts before `to`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
    pub event_type: Option<EventType>,
}

impl EventFilter {
    pub fn window(from: NaiveDateTime, to: NaiveDateTime) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            event_type: None,
        }
    }

    fn matches(&self, event: &CalendarEvent) -> bool {
        self.from.is_none_or(|from| event.end_time > from)
            && self.to.is_none_or(|to| event.start_time < to)
            && self.event_type.is_none_or(|event_type| event.event_type == event_type)
    }
}

pub trait EventStore: Send + Sync {
    /// Matching events ordered by start time.
    fn query(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>, InfraError>;
    /// All-or-nothing insert; returns the new ids in input order.
    fn insert_batch(&self, events: &[CalendarEvent]) -> Result<Vec<String>, InfraError>;
    fn delete(&self, id: &str) -> Result<bool, InfraError>;
    fn delete_many(&self, ids: &[String]) -> Result<usize, InfraError>;
}

fn store_error(error: rusqlite::Error) -> InfraError {
    InfraError::Store(error.to_string())
}

fn format_timestamp(value: NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(raw: &str, column: &str) -> Result<NaiveDateTime, InfraError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map_err(|error| InfraError::Store(format!("invalid events.{column} '{raw}': {error}")))
}

#[derive(Debug, Clone)]
pub struct SqliteEventStore {
    db_path: PathBuf,
}

impl SqliteEventStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(store_error)
    }
}

type EventRow = (String, String, Option<String>, String, String, String, String);

impl EventStore for SqliteEventStore {
    fn query(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>, InfraError> {
        let connection = self.connect()?;
        let mut sql = String::from(
            "SELECT id, title, location, start_time, end_time, event_type, color FROM events WHERE 1 = 1",
        );
        let mut values = Vec::new();
        if let Some(from) = filter.from {
            sql.push_str(" AND end_time > ?");
            values.push(format_timestamp(from));
        }
        if let Some(to) = filter.to {
            sql.push_str(" AND start_time < ?");
            values.push(format_timestamp(to));
        }
        if let Some(event_type) = filter.event_type {
            sql.push_str(" AND event_type = ?");
            values.push(event_type.as_str().to_string());
        }
        sql.push_str(" ORDER BY start_time ASC, id ASC");

        let mut statement = connection.prepare(&sql).map_err(store_error)?;
        let rows = statement
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })
            .map_err(store_error)?
            .collect::<Result<Vec<EventRow>, _>>()
            .map_err(store_error)?;

        rows.into_iter()
            .map(|(id, title, location, start_time, end_time, event_type, color)| {
                let event_type = EventType::parse(&event_type).ok_or_else(|| {
                    InfraError::Store(format!("invalid events.event_type '{event_type}'"))
                })?;
                Ok(StoredEvent {
                    id,
                    event: CalendarEvent {
                        title,
                        location,
                        start_time: parse_timestamp(&start_time, "start_time")?,
                        end_time: parse_timestamp(&end_time, "end_time")?,
                        event_type,
                        color: EventColor::normalize(&color),
                    },
                })
            })
            .collect()
    }

    fn insert_batch(&self, events: &[CalendarEvent]) -> Result<Vec<String>, InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction().map_err(store_error)?;
        let created_at = format_timestamp(Utc::now().naive_utc());
        let mut ids = Vec::with_capacity(events.len());
        {
            let mut statement = transaction
                .prepare(
                    "INSERT INTO events (id, title, location, start_time, end_time, event_type, color, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .map_err(store_error)?;
            for event in events {
                let id = next_id("evt");
                statement
                    .execute(params![
                        id,
                        event.title,
                        event.location,
                        format_timestamp(event.start_time),
                        format_timestamp(event.end_time),
                        event.event_type.as_str(),
                        event.color.as_str(),
                        created_at,
                    ])
                    .map_err(store_error)?;
                ids.push(id);
            }
        }
        transaction.commit().map_err(store_error)?;
        Ok(ids)
    }

    fn delete(&self, id: &str) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let removed = connection
            .execute("DELETE FROM events WHERE id = ?1", params![id.trim()])
            .map_err(store_error)?;
        Ok(removed > 0)
    }

    fn delete_many(&self, ids: &[String]) -> Result<usize, InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction().map_err(store_error)?;
        let mut removed = 0;
        {
            let mut statement = transaction
                .prepare("DELETE FROM events WHERE id = ?1")
                .map_err(store_error)?;
            for id in ids {
                removed += statement.execute(params![id]).map_err(store_error)?;
            }
        }
        transaction.commit().map_err(store_error)?;
        Ok(removed)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: Mutex<Vec<StoredEvent>>,
}

impl InMemoryEventStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<StoredEvent>>, InfraError> {
        self.events
            .lock()
            .map_err(|error| InfraError::Store(format!("event store lock poisoned: {error}")))
    }
}

impl EventStore for InMemoryEventStore {
    fn query(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>, InfraError> {
        let events = self.lock()?;
        let mut matched = events
            .iter()
            .filter(|stored| filter.matches(&stored.event))
            .cloned()
            .collect::<Vec<_>>();
        matched.sort_by(|left, right| {
            left.event
                .start_time
                .cmp(&right.event.start_time)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(matched)
    }

    fn insert_batch(&self, events: &[CalendarEvent]) -> Result<Vec<String>, InfraError> {
        if events.iter().any(|event| event.end_time <= event.start_time) {
            return Err(InfraError::Store("CHECK constraint failed: end_time > start_time".to_string()));
        }
        let mut stored = self.lock()?;
        let ids = events.iter().map(|_| next_id("evt")).collect::<Vec<_>>();
        stored.extend(ids.iter().zip(events).map(|(id, event)| StoredEvent {
            id: id.clone(),
            event: event.clone(),
        }));
        Ok(ids)
    }

    fn delete(&self, id: &str) -> Result<bool, InfraError> {
        let id = id.trim();
        let mut stored = self.lock()?;
        let before = stored.len();
        stored.retain(|event| event.id != id);
        Ok(stored.len() < before)
    }

    fn delete_many(&self, ids: &[String]) -> Result<usize, InfraError> {
        let mut stored = self.lock()?;
        let before = stored.len();
        stored.retain(|event| !ids.contains(&event.id));
        Ok(before - stored.len())
    }
}
