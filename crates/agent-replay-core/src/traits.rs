//! Collaborator traits: history storage, configuration, cache, session
//! lookup and analysis.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::{AnalyzerConfig, ModeSettings, PacingMode, ProcessorConfig};
use crate::session::{ReplayId, ReplaySession};
use crate::ReplayEvent;

/// Kind of a raw history record, as written by the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Message,
    ToolCall,
    ToolResult,
    ModelRequest,
    ModelResponse,
    TokenUsage,
    Cost,
    Error,
    Warning,
    Info,
    Debug,
    WorkflowStart,
    WorkflowEnd,
    NodeStart,
    NodeEnd,
    SystemResponse,
    /// Any kind this crate does not know.
    #[serde(other)]
    Unknown,
}

/// A raw record from durable history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub kind: RecordKind,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Model provider, for model records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Message type, for message records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
}

impl HistoryRecord {
    /// Create a record with empty payload and metadata.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        kind: RecordKind,
        timestamp: DateTime<Utc>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            timestamp,
            session_id: session_id.into(),
            thread_id: None,
            workflow_id: None,
            data: Value::Null,
            metadata: HashMap::new(),
            provider: None,
            message_type: None,
        }
    }

    /// Set the payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// A checkpoint saved during the recorded session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Token, cost and call statistics of a recorded session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub total_events: usize,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub model_calls: usize,
    pub tool_calls: usize,
    pub errors: usize,
    pub checkpoint_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_event_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
}

/// History storage error.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("History error: {0}")]
    Internal(String),
}

/// Durable history of recorded sessions.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Records of `session_id` in recorded order. Each call reads from the
    /// beginning.
    fn records(&self, session_id: &str) -> BoxStream<'static, Result<HistoryRecord, HistoryError>>;

    /// Checkpoints saved for `session_id`.
    async fn checkpoints(&self, session_id: &str) -> Result<Vec<Checkpoint>, HistoryError>;
}

/// Existence check for recorded sessions.
#[async_trait]
pub trait SessionLookup: Send + Sync {
    /// Whether `session_id` names a recorded session.
    async fn session_exists(&self, session_id: &str) -> Result<bool, HistoryError>;
}

/// Replay configuration source.
pub trait ConfigService: Send + Sync {
    /// Whether replay is enabled at all.
    fn is_enabled(&self) -> bool;

    /// Engine-wide limits.
    fn processor_config(&self) -> ProcessorConfig;

    /// Settings for one pacing mode.
    fn mode_config(&self, mode: PacingMode) -> ModeSettings;

    /// Settings for the external analyzer.
    fn analyzer_config(&self) -> AnalyzerConfig;
}

/// Cache error.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key/value cache with expiry.
#[async_trait]
pub trait ReplayCache: Send + Sync {
    /// Value under `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;
}

/// Result of analyzing a replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayAnalysis {
    pub replay_id: ReplayId,
    pub session_id: String,
    pub statistics: Value,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Analyzer error.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Analyzer disabled")]
    Disabled,
    #[error("Analysis failed: {0}")]
    Failed(String),
}

/// Statistics/recommendation analyzer.
#[async_trait]
pub trait ReplayAnalyzer: Send + Sync {
    /// Analyze a replay and the events it delivered.
    async fn analyze(
        &self,
        session: &ReplaySession,
        events: &[ReplayEvent],
        config: &AnalyzerConfig,
    ) -> Result<ReplayAnalysis, AnalyzerError>;
}
