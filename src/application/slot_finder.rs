use crate::domain::models::{
    BusyEvent, CalendarEvent, DailyBand, EventColor, EventType, TaskSchedulingRequest,
};
use crate::domain::oracle_reply::{build_scheduling_prompt, parse_interval_reply, verify_interval};
use crate::infrastructure::config::SchedulingPolicy;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_store::{EventFilter, EventStore};
use crate::infrastructure::oracle_client::CompletionOracle;
use chrono::{Local, NaiveDateTime};
use std::sync::Arc;
use std::time::Duration;

pub type NowProvider = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Task the caller wants placed before its deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDraft {
    pub title: String,
    pub color: EventColor,
    pub duration_hours: f64,
    pub deadline: NaiveDateTime,
}

pub struct SlotFinder<O, S>
where
    O: CompletionOracle + ?Sized,
    S: EventStore + ?Sized,
{
    oracle: Arc<O>,
    event_store: Arc<S>,
    band: DailyBand,
    verify_slots: bool,
    timeout: Duration,
    now_provider: NowProvider,
}

impl<O, S> SlotFinder<O, S>
where
    O: CompletionOracle + ?Sized,
    S: EventStore + ?Sized,
{
    pub fn new(oracle: Arc<O>, event_store: Arc<S>) -> Self {
        let policy = SchedulingPolicy::default();
        Self {
            oracle,
            event_store,
            band: policy.band,
            verify_slots: policy.verify_oracle_slot,
            timeout: Duration::from_secs(policy.oracle_timeout_seconds),
            now_provider: Arc::new(|| Local::now().naive_local()),
        }
    }

    pub fn with_policy(mut self, policy: &SchedulingPolicy) -> Self {
        self.band = policy.band;
        self.verify_slots = policy.verify_oracle_slot;
        self.timeout = Duration::from_secs(policy.oracle_timeout_seconds);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Collects the fixed schedule between now and the deadline, then asks
    /// the oracle for a slot. Nothing is persisted.
    pub async fn schedule_task(&self, draft: TaskDraft) -> Result<CalendarEvent, InfraError> {
        let now = (self.now_provider)();
        if draft.deadline <= now {
            return Err(InfraError::SchedulingFailed(format!(
                "deadline {} has already passed",
                draft.deadline.format("%Y-%m-%d %H:%M")
            )));
        }
        let existing_events = self
            .event_store
            .query(&EventFilter::window(now, draft.deadline))?
            .iter()
            .map(|stored| BusyEvent::from(&stored.event))
            .collect();

        let request = TaskSchedulingRequest {
            title: draft.title,
            color: draft.color,
            duration_hours: draft.duration_hours,
            deadline: draft.deadline,
            now,
            existing_events,
        };
        self.find_task_slot(&request).await
    }

    pub async fn find_task_slot(
        &self,
        request: &TaskSchedulingRequest,
    ) -> Result<CalendarEvent, InfraError> {
        request.validate()?;
        let prompt = build_scheduling_prompt(request, &self.band);

        let raw = match tokio::time::timeout(self.timeout, self.oracle.complete(&prompt, None)).await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(error)) => return Err(InfraError::SchedulingFailed(error.to_string())),
            Err(_) => {
                return Err(InfraError::SchedulingFailed(format!(
                    "oracle did not answer within {} seconds",
                    self.timeout.as_secs_f64()
                )));
            }
        };

        let interval = parse_interval_reply(&raw).map_err(|error| {
            tracing::warn!(reply = %raw, %error, "oracle reply rejected");
            InfraError::SchedulingFailed(error.to_string())
        })?;

        if self.verify_slots {
            verify_interval(&interval, request, &self.band).map_err(|reason| {
                tracing::warn!(
                    start = %interval.start,
                    end = %interval.end,
                    %reason,
                    "oracle slot failed verification"
                );
                InfraError::SchedulingFailed(format!("oracle proposed an invalid slot: {reason}"))
            })?;
        }

        let event = CalendarEvent {
            title: request.title.trim().to_string(),
            location: None,
            start_time: interval.start,
            end_time: interval.end,
            event_type: EventType::Task,
            color: request.color,
        };
        event
            .validate()
            .map_err(|error| InfraError::SchedulingFailed(error.to_string()))?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ValidationError;
    use crate::infrastructure::event_store::InMemoryEventStore;
    use crate::infrastructure::oracle_client::OracleAttachment;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug)]
    enum FakeReply {
        Text(String),
        Error,
        Hang,
    }

    #[derive(Debug, Default)]
    struct FakeOracle {
        replies: Mutex<VecDeque<FakeReply>>,
        prompts: Mutex<Vec<String>>,
    }

    impl FakeOracle {
        fn replying(replies: Vec<FakeReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn text(reply: &str) -> Self {
            Self::replying(vec![FakeReply::Text(reply.to_string())])
        }

        fn last_prompt(&self) -> String {
            self.prompts
                .lock()
                .expect("prompts lock")
                .last()
                .cloned()
                .expect("a prompt was sent")
        }
    }

    #[async_trait]
    impl CompletionOracle for FakeOracle {
        async fn complete(
            &self,
            prompt: &str,
            _attachment: Option<&OracleAttachment>,
        ) -> Result<String, InfraError> {
            self.prompts.lock().expect("prompts lock").push(prompt.to_string());
            let reply = self
                .replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or(FakeReply::Error);
            match reply {
                FakeReply::Text(text) => Ok(text),
                FakeReply::Error => Err(InfraError::Oracle("quota exceeded".to_string())),
                FakeReply::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(String::new())
                }
            }
        }
    }

    fn at(value: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").expect("valid datetime")
    }

    fn fixed_now() -> NowProvider {
        Arc::new(|| at("2026-03-02T07:00:00"))
    }

    fn seeded_store() -> Arc<InMemoryEventStore> {
        let store = Arc::new(InMemoryEventStore::default());
        store
            .insert_batch(&[
                CalendarEvent {
                    title: "Calculus I".to_string(),
                    location: Some("GK-101".to_string()),
                    start_time: at("2026-03-02T08:00:00"),
                    end_time: at("2026-03-02T09:40:00"),
                    event_type: EventType::Class,
                    color: EventColor::Blue,
                },
                CalendarEvent {
                    title: "Old Seminar".to_string(),
                    location: None,
                    start_time: at("2026-02-20T08:00:00"),
                    end_time: at("2026-02-20T09:00:00"),
                    event_type: EventType::Meeting,
                    color: EventColor::Green,
                },
            ])
            .expect("seed store");
        store
    }

    fn draft() -> TaskDraft {
        TaskDraft {
            title: "Lab report".to_string(),
            color: EventColor::Green,
            duration_hours: 2.0,
            deadline: at("2026-03-04T23:59:59"),
        }
    }

    fn finder(oracle: Arc<FakeOracle>) -> SlotFinder<FakeOracle, InMemoryEventStore> {
        SlotFinder::new(oracle, seeded_store()).with_now_provider(fixed_now())
    }

    #[tokio::test]
    async fn fenced_zulu_reply_becomes_task_event() {
        let oracle = Arc::new(FakeOracle::text(
            "```json\n{\"start_time\":\"2026-03-02T14:00:00Z\",\"end_time\":\"2026-03-02T16:00:00Z\"}\n```",
        ));
        let event = finder(Arc::clone(&oracle))
            .schedule_task(draft())
            .await
            .expect("scheduled");

        assert_eq!(event.title, "Lab report");
        assert_eq!(event.event_type, EventType::Task);
        assert_eq!(event.color, EventColor::Green);
        assert_eq!(event.start_time, at("2026-03-02T14:00:00"));
        assert_eq!(event.end_time, at("2026-03-02T16:00:00"));

        let prompt = oracle.last_prompt();
        assert!(prompt.contains("- Calculus I: 2026-03-02 08:00 to 2026-03-02 09:40"));
        assert!(!prompt.contains("Old Seminar"));
    }

    #[tokio::test]
    async fn empty_schedule_prompt_uses_free_marker() {
        let oracle = Arc::new(FakeOracle::text(
            "{\"start_time\":\"2026-03-02T08:00:00\",\"end_time\":\"2026-03-02T10:00:00\"}",
        ));
        let finder = SlotFinder::new(Arc::clone(&oracle), Arc::new(InMemoryEventStore::default()))
            .with_now_provider(fixed_now());
        finder.schedule_task(draft()).await.expect("scheduled");
        assert!(oracle
            .last_prompt()
            .contains("No existing events. The schedule is completely free."));
    }

    #[tokio::test]
    async fn reply_without_json_fails_scheduling() {
        let oracle = Arc::new(FakeOracle::text("I could not find a slot."));
        let error = finder(oracle).schedule_task(draft()).await.expect_err("no json");
        match error {
            InfraError::SchedulingFailed(message) => assert!(message.contains("JSON object")),
            other => panic!("expected scheduling failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reply_missing_start_time_fails_scheduling() {
        let oracle = Arc::new(FakeOracle::text("{\"end_time\":\"2026-03-02T16:00:00\"}"));
        let error = finder(oracle).schedule_task(draft()).await.expect_err("missing field");
        assert!(matches!(error, InfraError::SchedulingFailed(message) if message.contains("start_time")));
    }

    #[tokio::test]
    async fn malformed_timestamp_fails_scheduling() {
        let oracle = Arc::new(FakeOracle::text(
            "{\"start_time\":\"next monday\",\"end_time\":\"2026-03-02T16:00:00\"}",
        ));
        let error = finder(oracle).schedule_task(draft()).await.expect_err("bad timestamp");
        assert!(matches!(error, InfraError::SchedulingFailed(message) if message.contains("next monday")));
    }

    #[tokio::test]
    async fn overlapping_slot_is_rejected_when_verification_is_on() {
        let oracle = Arc::new(FakeOracle::text(
            "{\"start_time\":\"2026-03-02T09:00:00\",\"end_time\":\"2026-03-02T11:00:00\"}",
        ));
        let error = finder(oracle).schedule_task(draft()).await.expect_err("overlap");
        assert!(matches!(error, InfraError::SchedulingFailed(message) if message.contains("Calculus I")));
    }

    #[tokio::test]
    async fn slot_outside_band_is_rejected_when_verification_is_on() {
        let oracle = Arc::new(FakeOracle::text(
            "{\"start_time\":\"2026-03-02T22:00:00\",\"end_time\":\"2026-03-03T00:00:00\"}",
        ));
        let error = finder(oracle).schedule_task(draft()).await.expect_err("outside band");
        assert!(matches!(error, InfraError::SchedulingFailed(_)));
    }

    #[tokio::test]
    async fn overlapping_slot_is_accepted_when_verification_is_off() {
        let oracle = Arc::new(FakeOracle::text(
            "{\"start_time\":\"2026-03-02T09:00:00\",\"end_time\":\"2026-03-02T11:00:00\"}",
        ));
        let policy = SchedulingPolicy {
            verify_oracle_slot: false,
            ..SchedulingPolicy::default()
        };
        let event = finder(oracle)
            .with_policy(&policy)
            .schedule_task(draft())
            .await
            .expect("trusted");
        assert_eq!(event.start_time, at("2026-03-02T09:00:00"));
    }

    #[tokio::test]
    async fn oracle_error_becomes_scheduling_failure() {
        let oracle = Arc::new(FakeOracle::replying(vec![FakeReply::Error]));
        let error = finder(oracle).schedule_task(draft()).await.expect_err("oracle error");
        assert!(matches!(error, InfraError::SchedulingFailed(message) if message.contains("quota exceeded")));
    }

    #[tokio::test]
    async fn hanging_oracle_times_out() {
        let oracle = Arc::new(FakeOracle::replying(vec![FakeReply::Hang]));
        let error = finder(oracle)
            .with_timeout(Duration::from_millis(50))
            .schedule_task(draft())
            .await
            .expect_err("timeout");
        assert!(matches!(error, InfraError::SchedulingFailed(message) if message.contains("did not answer")));
    }

    #[tokio::test]
    async fn past_deadline_is_rejected_without_calling_oracle() {
        let oracle = Arc::new(FakeOracle::default());
        let mut past = draft();
        past.deadline = at("2026-03-01T23:59:59");
        let error = finder(Arc::clone(&oracle))
            .schedule_task(past)
            .await
            .expect_err("past deadline");
        assert!(matches!(error, InfraError::SchedulingFailed(_)));
        assert!(oracle.prompts.lock().expect("prompts lock").is_empty());
    }

    #[tokio::test]
    async fn invalid_duration_is_a_validation_error() {
        let oracle = Arc::new(FakeOracle::default());
        let mut request = draft();
        request.duration_hours = 0.0;
        let error = finder(oracle).schedule_task(request).await.expect_err("duration");
        assert!(matches!(error, InfraError::Validation(_)));
    }

    #[test]
    fn default_clock_reads_local_wall_time() {
        let finder = SlotFinder::new(
            Arc::new(FakeOracle::default()),
            Arc::new(InMemoryEventStore::default()),
        );
        let before = Local::now().naive_local();
        let now = (finder.now_provider)();
        let after = Local::now().naive_local();
        assert!(before <= now && now <= after);
    }

    #[tokio::test]
    async fn huge_duration_is_rejected_before_the_oracle() {
        let oracle = Arc::new(FakeOracle::text(
            "{\"start_time\":\"2026-03-02T10:00:00\",\"end_time\":\"2026-03-02T12:00:00\"}",
        ));
        let mut request = draft();
        request.duration_hours = 1e13;
        let error = finder(Arc::clone(&oracle))
            .schedule_task(request)
            .await
            .expect_err("duration");
        assert!(matches!(
            error,
            InfraError::Validation(ValidationError::InvalidDuration)
        ));

        let mut request = draft();
        request.duration_hours = 100.0;
        let error = finder(Arc::clone(&oracle))
            .schedule_task(request)
            .await
            .expect_err("window");
        assert!(matches!(
            error,
            InfraError::Validation(ValidationError::DurationExceedsWindow)
        ));
        assert!(oracle.prompts.lock().expect("prompts lock").is_empty());
    }
}
