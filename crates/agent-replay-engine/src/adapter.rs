//! Event source adapter: raw history records to canonical replay events.

use std::sync::Arc;

use agent_replay_core::{
    EventKind, ReplayEvent, ReplayFilter,
    traits::{Checkpoint, HistoryError, HistoryRecord, HistoryStore, RecordKind, SessionSummary},
};
use futures::{StreamExt, TryStreamExt, future, stream::BoxStream};
use serde_json::Value;

/// Canonical kind for a raw record kind. Unknown kinds become `Info`.
#[must_use]
pub const fn map_kind(kind: RecordKind) -> EventKind {
    match kind {
        RecordKind::Message => EventKind::UserMessage,
        RecordKind::ToolCall => EventKind::ToolCall,
        RecordKind::ToolResult => EventKind::ToolResult,
        RecordKind::ModelRequest => EventKind::ModelCall,
        RecordKind::ModelResponse => EventKind::ModelResponse,
        RecordKind::Error => EventKind::Error,
        RecordKind::Warning => EventKind::Warning,
        RecordKind::Debug => EventKind::Debug,
        RecordKind::WorkflowStart => EventKind::WorkflowStart,
        RecordKind::WorkflowEnd => EventKind::WorkflowEnd,
        RecordKind::NodeStart => EventKind::NodeStart,
        RecordKind::NodeEnd => EventKind::NodeEnd,
        RecordKind::SystemResponse => EventKind::SystemResponse,
        RecordKind::TokenUsage | RecordKind::Cost | RecordKind::Info | RecordKind::Unknown => {
            EventKind::Info
        }
    }
}

/// Convert one history record into a canonical event.
#[must_use]
pub fn to_event(record: HistoryRecord) -> ReplayEvent {
    let kind = map_kind(record.kind);
    let mut metadata = record.metadata;

    if let Some(provider) = record.provider {
        metadata.insert("provider".to_string(), Value::String(provider));
    }
    if let Some(message_type) = record.message_type {
        metadata.insert("message_type".to_string(), Value::String(message_type));
    }
    if matches!(record.kind, RecordKind::TokenUsage | RecordKind::Cost) {
        let source = if record.kind == RecordKind::Cost {
            "cost"
        } else {
            "token_usage"
        };
        metadata.insert("source_kind".to_string(), Value::String(source.to_string()));
    }

    ReplayEvent {
        id: record.id,
        kind,
        timestamp: record.timestamp,
        data: record.data,
        metadata,
        session_id: record.session_id,
        thread_id: record.thread_id,
        workflow_id: record.workflow_id,
    }
}

/// Reads recorded sessions from a [`HistoryStore`] as canonical events.
#[derive(Clone)]
pub struct EventSourceAdapter {
    store: Arc<dyn HistoryStore>,
}

impl EventSourceAdapter {
    /// Create an adapter over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    /// Events of `session_id` passing `filter`, read from the beginning.
    #[must_use]
    pub fn events(
        &self,
        session_id: &str,
        filter: &ReplayFilter,
    ) -> BoxStream<'static, Result<ReplayEvent, HistoryError>> {
        let filter = filter.clone();
        self.store
            .records(session_id)
            .map_ok(to_event)
            .try_filter(move |event| future::ready(filter.matches(event)))
            .boxed()
    }

    /// Number of events of `session_id` passing `filter`.
    ///
    /// # Errors
    /// Returns error if the history cannot be read.
    pub async fn count_events(
        &self,
        session_id: &str,
        filter: &ReplayFilter,
    ) -> Result<usize, HistoryError> {
        self.events(session_id, filter)
            .try_fold(0_usize, |count, _| future::ready(Ok(count + 1)))
            .await
    }

    /// Checkpoints saved for `session_id`.
    ///
    /// # Errors
    /// Returns error if the history cannot be read.
    pub async fn checkpoints(&self, session_id: &str) -> Result<Vec<Checkpoint>, HistoryError> {
        self.store.checkpoints(session_id).await
    }

    /// Token, cost and call statistics for `session_id`.
    ///
    /// # Errors
    /// Returns error if the history cannot be read.
    pub async fn session_summary(&self, session_id: &str) -> Result<SessionSummary, HistoryError> {
        let checkpoint_count = self.store.checkpoints(session_id).await?.len();
        let initial = SessionSummary {
            session_id: session_id.to_string(),
            checkpoint_count,
            ..SessionSummary::default()
        };

        self.store
            .records(session_id)
            .try_fold(initial, |mut summary, record| {
                summary.total_events += 1;
                match record.kind {
                    RecordKind::ModelRequest => summary.model_calls += 1,
                    RecordKind::ToolCall => summary.tool_calls += 1,
                    RecordKind::Error => summary.errors += 1,
                    RecordKind::TokenUsage => summary.total_tokens += token_count(&record.data),
                    RecordKind::Cost => summary.total_cost += cost_amount(&record.data),
                    _ => {}
                }
                if summary.first_event_at.is_none_or(|t| record.timestamp < t) {
                    summary.first_event_at = Some(record.timestamp);
                }
                if summary.last_event_at.is_none_or(|t| record.timestamp > t) {
                    summary.last_event_at = Some(record.timestamp);
                }
                future::ready(Ok(summary))
            })
            .await
    }
}

fn token_count(data: &Value) -> u64 {
    if let Some(total) = data.get("total_tokens").and_then(Value::as_u64) {
        return total;
    }
    ["input_tokens", "output_tokens"]
        .iter()
        .filter_map(|key| data.get(key).and_then(Value::as_u64))
        .sum()
}

fn cost_amount(data: &Value) -> f64 {
    ["cost", "total_cost", "amount"]
        .iter()
        .find_map(|key| data.get(key).and_then(Value::as_f64))
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryHistoryStore;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn seeded() -> (Arc<MemoryHistoryStore>, EventSourceAdapter) {
        let store = Arc::new(MemoryHistoryStore::new());
        let t0 = Utc::now();
        let mut message = HistoryRecord::new("r1", RecordKind::Message, t0, "s1");
        message.message_type = Some("human".to_string());
        message.thread_id = Some("t1".to_string());

        let mut request = HistoryRecord::new("r2", RecordKind::ModelRequest, t0 + Duration::seconds(1), "s1");
        request.provider = Some("openai".to_string());
        request.metadata.insert("model".to_string(), json!("gpt-4o"));

        store
            .insert_records([
                message,
                request,
                HistoryRecord::new("r3", RecordKind::TokenUsage, t0 + Duration::seconds(2), "s1")
                    .with_data(json!({"input_tokens": 120, "output_tokens": 30})),
                HistoryRecord::new("r4", RecordKind::Cost, t0 + Duration::seconds(3), "s1")
                    .with_data(json!({"cost": 0.25})),
                HistoryRecord::new("r5", RecordKind::Error, t0 + Duration::seconds(4), "s1"),
                HistoryRecord::new("r6", RecordKind::Unknown, t0 + Duration::seconds(5), "s1"),
                HistoryRecord::new("r7", RecordKind::ToolCall, t0 + Duration::seconds(6), "s1"),
            ])
            .unwrap();
        store
            .insert_checkpoint(Checkpoint {
                id: "c1".to_string(),
                session_id: "s1".to_string(),
                thread_id: None,
                created_at: t0,
                metadata: std::collections::HashMap::new(),
            })
            .unwrap();

        let adapter = EventSourceAdapter::new(store.clone());
        (store, adapter)
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(map_kind(RecordKind::Message), EventKind::UserMessage);
        assert_eq!(map_kind(RecordKind::ModelRequest), EventKind::ModelCall);
        assert_eq!(map_kind(RecordKind::ModelResponse), EventKind::ModelResponse);
        assert_eq!(map_kind(RecordKind::TokenUsage), EventKind::Info);
        assert_eq!(map_kind(RecordKind::Cost), EventKind::Info);
        assert_eq!(map_kind(RecordKind::Unknown), EventKind::Info);
        assert_eq!(map_kind(RecordKind::WorkflowEnd), EventKind::WorkflowEnd);
    }

    #[tokio::test]
    async fn test_events_carry_metadata() {
        let (_, adapter) = seeded();
        let events: Vec<ReplayEvent> = adapter
            .events("s1", &ReplayFilter::default())
            .try_collect()
            .await
            .unwrap();

        assert_eq!(events.len(), 7);
        assert_eq!(events[0].kind, EventKind::UserMessage);
        assert_eq!(events[0].metadata["message_type"], json!("human"));
        assert_eq!(events[0].thread_id.as_deref(), Some("t1"));
        assert_eq!(events[1].metadata["provider"], json!("openai"));
        assert_eq!(events[1].metadata["model"], json!("gpt-4o"));
        assert_eq!(events[2].metadata["source_kind"], json!("token_usage"));
        assert_eq!(events[5].kind, EventKind::Info);
    }

    #[tokio::test]
    async fn test_filter_is_applied() {
        let (_, adapter) = seeded();
        let filter = ReplayFilter::kinds([EventKind::Error]);
        let events: Vec<ReplayEvent> = adapter.events("s1", &filter).try_collect().await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events.iter().all(|e| e.kind == EventKind::Error));
        assert_eq!(adapter.count_events("s1", &filter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_session_summary() {
        let (_, adapter) = seeded();
        let summary = adapter.session_summary("s1").await.unwrap();
        assert_eq!(summary.total_events, 7);
        assert_eq!(summary.total_tokens, 150);
        assert!((summary.total_cost - 0.25).abs() < f64::EPSILON);
        assert_eq!(summary.model_calls, 1);
        assert_eq!(summary.tool_calls, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.checkpoint_count, 1);
        assert!(summary.first_event_at < summary.last_event_at);
    }

    #[tokio::test]
    async fn test_missing_session_errors() {
        let (_, adapter) = seeded();
        let err = adapter.count_events("nope", &ReplayFilter::default()).await;
        assert!(matches!(err, Err(HistoryError::SessionNotFound(_))));
    }
}
