//! Canonical replay events.

use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a canonical replay event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkflowStart,
    WorkflowEnd,
    NodeStart,
    NodeEnd,
    ToolCall,
    ToolResult,
    ModelCall,
    ModelResponse,
    Error,
    Warning,
    Info,
    Debug,
    UserMessage,
    SystemResponse,
}

impl EventKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 14] = [
        Self::WorkflowStart,
        Self::WorkflowEnd,
        Self::NodeStart,
        Self::NodeEnd,
        Self::ToolCall,
        Self::ToolResult,
        Self::ModelCall,
        Self::ModelResponse,
        Self::Error,
        Self::Warning,
        Self::Info,
        Self::Debug,
        Self::UserMessage,
        Self::SystemResponse,
    ];

    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WorkflowStart => "workflow_start",
            Self::WorkflowEnd => "workflow_end",
            Self::NodeStart => "node_start",
            Self::NodeEnd => "node_end",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::ModelCall => "model_call",
            Self::ModelResponse => "model_response",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::UserMessage => "user_message",
            Self::SystemResponse => "system_response",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown event kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown event kind: {0}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

/// A canonical event re-delivered by a replay.
///
/// Produced once by the event source adapter. Strategies that annotate an
/// event take it by value and hand back the annotated copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayEvent {
    /// Event identifier (the originating record's id).
    pub id: String,
    /// Canonical kind.
    pub kind: EventKind,
    /// When the event was originally recorded.
    pub timestamp: DateTime<Utc>,
    /// Free-form payload.
    #[serde(default)]
    pub data: Value,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Source session the event belongs to.
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

impl ReplayEvent {
    /// Create an event with empty payload and metadata.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        kind: EventKind,
        timestamp: DateTime<Utc>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            timestamp,
            data: Value::Null,
            metadata: HashMap::new(),
            session_id: session_id.into(),
            thread_id: None,
            workflow_id: None,
        }
    }

    /// Set the payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Set the thread identifier.
    #[must_use]
    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Set the workflow identifier.
    #[must_use]
    pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    /// Add a metadata entry, returning the annotated event.
    #[must_use]
    pub fn annotated(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Look up `key` in the metadata, then in the payload.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key).or_else(|| self.data.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&EventKind::ModelResponse).unwrap();
        assert_eq!(json, "\"model_response\"");
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert_eq!("tool-call".parse::<EventKind>().unwrap(), EventKind::ToolCall);
        assert!("bogus".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_event_serializes_iso_timestamp() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = ReplayEvent::new("e1", EventKind::Info, ts, "s1").with_thread("t1");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["timestamp"], "2024-05-01T12:00:00Z");
        assert_eq!(json["kind"], "info");
        assert_eq!(json["thread_id"], "t1");
        assert!(json.get("workflow_id").is_none());
    }

    #[test]
    fn test_field_prefers_metadata() {
        let event = ReplayEvent::new("e1", EventKind::Info, Utc::now(), "s1")
            .with_data(serde_json::json!({"tool": "grep", "level": 1}))
            .annotated("level", serde_json::json!(2));
        assert_eq!(event.field("level"), Some(&serde_json::json!(2)));
        assert_eq!(event.field("tool"), Some(&serde_json::json!("grep")));
        assert_eq!(event.field("missing"), None);
    }
}
