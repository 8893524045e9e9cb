//! Session facade: validates requests from untyped callers and delegates to
//! the [`ReplayEngine`].

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use agent_replay_core::{
    EventKind, PacingMode, ReplayAnalyzer, ReplayConfig, ReplayFilter, ReplayId,
    ReplaySession, ReplayStatus, SessionLookup,
    config::ExportFormat,
    traits::{AnalyzerError, Checkpoint, ReplayAnalysis, SessionSummary},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::ReplayEngine;
use crate::error::{ReplayError, Result};

/// Replay request as sent by untyped callers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplayRequest {
    pub mode: Option<String>,
    pub speed: Option<f64>,
    pub auto_start: Option<bool>,
    pub max_events: Option<usize>,
    pub enable_analysis: Option<bool>,
    pub filters: Option<RequestFilters>,
    pub export_format: Option<ExportFormat>,
}

/// Filter section of a [`ReplayRequest`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestFilters {
    pub event_types: Option<Vec<String>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub thread_ids: Option<Vec<String>>,
    pub workflow_ids: Option<Vec<String>>,
    pub custom_filters: Option<HashMap<String, Value>>,
}

impl RequestFilters {
    fn into_filter(self) -> Result<ReplayFilter> {
        let event_kinds = self
            .event_types
            .map(|types| {
                types
                    .iter()
                    .map(|t| t.parse::<EventKind>())
                    .collect::<std::result::Result<Vec<_>, _>>()
            })
            .transpose()
            .map_err(|e| ReplayError::InvalidConfig(e.to_string()))?;

        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(ReplayError::InvalidConfig(format!(
                    "startTime {start} is after endTime {end}"
                )));
            }
        }

        Ok(ReplayFilter {
            event_kinds,
            start_time: self.start_time,
            end_time: self.end_time,
            thread_ids: self.thread_ids,
            workflow_ids: self.workflow_ids,
            custom: self.custom_filters,
        })
    }
}

/// Resolve the pacing mode of a request. Unknown names fall back to
/// real-time.
fn resolve_mode(name: Option<&str>) -> PacingMode {
    let Some(name) = name else {
        return PacingMode::default();
    };
    name.parse().unwrap_or_else(|e| {
        tracing::warn!(mode = name, "{e}, falling back to real_time");
        PacingMode::RealTime
    })
}

/// What the facade remembers about a request it forwarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub session_id: String,
    pub mode: PacingMode,
    pub requested_at: DateTime<Utc>,
}

/// Status of a replay as seen through the facade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayStatusReport {
    pub replay_id: ReplayId,
    pub session_id: String,
    pub mode: PacingMode,
    /// `None` when only the request ledger still knows the replay.
    pub status: Option<ReplayStatus>,
    pub progress: Option<f64>,
    pub events_delivered: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<DateTime<Utc>>,
}

/// Entry point for callers holding untyped replay requests.
pub struct ReplayService {
    engine: Arc<ReplayEngine>,
    lookup: Arc<dyn SessionLookup>,
    analyzer: Option<Arc<dyn ReplayAnalyzer>>,
    ledger: RwLock<HashMap<ReplayId, LedgerEntry>>,
}

impl ReplayService {
    /// Create a facade over `engine`.
    #[must_use]
    pub fn new(engine: Arc<ReplayEngine>, lookup: Arc<dyn SessionLookup>) -> Self {
        Self {
            engine,
            lookup,
            analyzer: None,
            ledger: RwLock::new(HashMap::new()),
        }
    }

    /// Attach an external analyzer.
    #[must_use]
    pub fn with_analyzer(mut self, analyzer: Arc<dyn ReplayAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// The wrapped engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<ReplayEngine> {
        &self.engine
    }

    /// Parse `request` into a typed config.
    ///
    /// # Errors
    /// Returns error if the request is not a valid replay request.
    pub fn parse_request(&self, request: Value) -> Result<ReplayConfig> {
        let request: ReplayRequest = if request.is_null() {
            ReplayRequest::default()
        } else {
            serde_json::from_value(request).map_err(|e| ReplayError::InvalidConfig(e.to_string()))?
        };

        let mode = resolve_mode(request.mode.as_deref());
        let defaults = self.engine.default_config(mode);
        let speed = request.speed.unwrap_or(defaults.speed);
        let filter = request
            .filters
            .map(RequestFilters::into_filter)
            .transpose()?
            .unwrap_or_default();

        Ok(ReplayConfig {
            mode,
            speed,
            filter,
            auto_start: request.auto_start.unwrap_or(defaults.auto_start),
            max_events: request.max_events,
            enable_analysis: request
                .enable_analysis
                .unwrap_or(mode == PacingMode::Analysis),
            export_format: request.export_format,
        })
    }

    /// Start a replay of a recorded session from an untyped request.
    ///
    /// # Errors
    /// Returns error if the session does not exist, the request is invalid,
    /// or the engine refuses the replay.
    pub async fn start_replay(&self, session_id: &str, request: Value) -> Result<ReplayId> {
        if !self.lookup.session_exists(session_id).await? {
            return Err(ReplayError::SessionNotFound(session_id.to_string()));
        }

        let config = self.parse_request(request)?;
        let mode = config.mode;
        let replay_id = self.engine.start_replay(session_id, config).await?;

        self.ledger
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                replay_id,
                LedgerEntry {
                    session_id: session_id.to_string(),
                    mode,
                    requested_at: Utc::now(),
                },
            );
        Ok(replay_id)
    }

    /// Stop a replay.
    ///
    /// # Errors
    /// Returns error if the replay is unknown or already finished.
    pub async fn stop_replay(&self, replay_id: ReplayId) -> Result<ReplaySession> {
        self.engine.stop_replay(replay_id).await
    }

    /// Status of a replay, from the engine or, failing that, the request
    /// ledger.
    pub async fn get_replay_status(&self, replay_id: ReplayId) -> Option<ReplayStatusReport> {
        let entry = self.ledger_entry(replay_id);
        if let Some(session) = self.engine.get_replay_session(replay_id).await {
            return Some(ReplayStatusReport {
                replay_id,
                session_id: session.session_id,
                mode: session.mode,
                status: Some(session.status),
                progress: Some(session.progress),
                events_delivered: Some(session.events_delivered),
                error: session.error,
                requested_at: entry.map(|e| e.requested_at),
            });
        }

        entry.map(|entry| ReplayStatusReport {
            replay_id,
            session_id: entry.session_id,
            mode: entry.mode,
            status: None,
            progress: None,
            events_delivered: None,
            error: None,
            requested_at: Some(entry.requested_at),
        })
    }

    /// Run the external analyzer over a replay.
    ///
    /// Returns `Ok(None)` when no analyzer is attached.
    ///
    /// # Errors
    /// Returns error if the replay is unknown, analysis is disabled, or the
    /// analyzer fails.
    pub async fn analyze_replay(&self, replay_id: ReplayId) -> Result<Option<ReplayAnalysis>> {
        let Some(ref analyzer) = self.analyzer else {
            tracing::warn!(replay_id = %replay_id, "No analyzer configured, skipping analysis");
            return Ok(None);
        };

        let config = self.engine.config().analyzer_config();
        if !config.enabled {
            return Err(AnalyzerError::Disabled.into());
        }

        let session = self
            .engine
            .get_replay_session(replay_id)
            .await
            .ok_or(ReplayError::NotFound(replay_id))?;
        let events = self.engine.replay_events(replay_id).await?;

        let mut analysis = analyzer.analyze(&session, &events, &config).await?;
        analysis.recommendations.truncate(config.max_recommendations);
        tracing::info!(
            replay_id = %replay_id,
            session_id = %session.session_id,
            recommendations = analysis.recommendations.len(),
            "Replay analyzed"
        );
        Ok(Some(analysis))
    }

    /// Checkpoints of a recorded session.
    ///
    /// # Errors
    /// Returns error if the history cannot be read.
    pub async fn session_checkpoints(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        Ok(self.engine.source().checkpoints(session_id).await?)
    }

    /// Token, cost and call statistics of a recorded session.
    ///
    /// # Errors
    /// Returns error if the history cannot be read.
    pub async fn session_summary(&self, session_id: &str) -> Result<SessionSummary> {
        Ok(self.engine.source().session_summary(session_id).await?)
    }

    fn ledger_entry(&self, replay_id: ReplayId) -> Option<LedgerEntry> {
        self.ledger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&replay_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ReplaySettings;
    use crate::storage::{MemoryCache, MemoryHistoryStore};
    use agent_replay_core::traits::{HistoryRecord, RecordKind};
    use async_trait::async_trait;
    use serde_json::json;

    struct CountingAnalyzer;

    #[async_trait]
    impl ReplayAnalyzer for CountingAnalyzer {
        async fn analyze(
            &self,
            session: &ReplaySession,
            events: &[agent_replay_core::ReplayEvent],
            _config: &agent_replay_core::config::AnalyzerConfig,
        ) -> std::result::Result<ReplayAnalysis, AnalyzerError> {
            Ok(ReplayAnalysis {
                replay_id: session.replay_id,
                session_id: session.session_id.clone(),
                statistics: json!({"events": events.len()}),
                recommendations: (0..20).map(|i| format!("r{i}")).collect(),
            })
        }
    }

    fn service() -> ReplayService {
        let store = Arc::new(MemoryHistoryStore::new());
        store
            .insert_records([
                HistoryRecord::new("r1", RecordKind::Message, Utc::now(), "s1"),
                HistoryRecord::new("r2", RecordKind::Error, Utc::now(), "s1"),
            ])
            .unwrap();
        let engine = Arc::new(ReplayEngine::new(
            store.clone(),
            Arc::new(ReplaySettings::default()),
            Arc::new(MemoryCache::new()),
        ));
        ReplayService::new(engine, store)
    }

    #[tokio::test]
    async fn test_parse_request() {
        let service = service();
        let config = service
            .parse_request(json!({
                "mode": "fast-forward",
                "autoStart": false,
                "maxEvents": 5,
                "filters": {
                    "eventTypes": ["error", "tool_call"],
                    "threadIds": ["t1"],
                    "customFilters": {"provider": "openai"}
                },
                "exportFormat": "jsonl"
            }))
            .unwrap();

        assert_eq!(config.mode, PacingMode::FastForward);
        assert!((config.speed - 10.0).abs() < f64::EPSILON);
        assert!(!config.auto_start);
        assert_eq!(config.max_events, Some(5));
        assert_eq!(
            config.filter.event_kinds,
            Some(vec![EventKind::Error, EventKind::ToolCall])
        );
        assert_eq!(config.filter.custom.unwrap()["provider"], json!("openai"));
        assert_eq!(config.export_format, Some(ExportFormat::Jsonl));
    }

    #[tokio::test]
    async fn test_unknown_mode_falls_back_to_real_time() {
        let service = service();
        let config = service.parse_request(json!({"mode": "warp"})).unwrap();
        assert_eq!(config.mode, PacingMode::RealTime);
        assert!((config.speed - 1.0).abs() < f64::EPSILON);

        let config = service.parse_request(Value::Null).unwrap();
        assert_eq!(config, ReplayConfig::default());
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected() {
        let service = service();
        let err = service
            .parse_request(json!({"filters": {"eventTypes": ["nonsense"]}}))
            .unwrap_err();
        assert!(matches!(err, ReplayError::InvalidConfig(_)));

        let err = service.parse_request(json!({"speed": "fast"})).unwrap_err();
        assert!(matches!(err, ReplayError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_unknown_session_is_rejected() {
        let service = service();
        let err = service.start_replay("missing", Value::Null).await.unwrap_err();
        assert!(matches!(err, ReplayError::SessionNotFound(ref s) if s == "missing"));
    }

    #[tokio::test]
    async fn test_status_and_analysis() {
        let service = service().with_analyzer(Arc::new(CountingAnalyzer));
        let id = service
            .start_replay("s1", json!({"mode": "step_by_step", "autoStart": false}))
            .await
            .unwrap();

        let report = service.get_replay_status(id).await.unwrap();
        assert_eq!(report.session_id, "s1");
        assert_eq!(report.status, Some(ReplayStatus::Pending));
        assert!(report.requested_at.is_some());

        let analysis = service.analyze_replay(id).await.unwrap().unwrap();
        assert_eq!(analysis.statistics["events"], 0);
        assert_eq!(analysis.recommendations.len(), 10);

        let stopped = service.stop_replay(id).await.unwrap();
        assert_eq!(stopped.status, ReplayStatus::Stopped);
        assert_eq!(
            service.get_replay_status(id).await.unwrap().status,
            Some(ReplayStatus::Stopped)
        );
        assert!(service.get_replay_status(ReplayId::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_missing_analyzer_returns_none() {
        let service = service();
        let id = service
            .start_replay("s1", json!({"autoStart": false}))
            .await
            .unwrap();
        assert!(service.analyze_replay(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_passthroughs() {
        let service = service();
        let summary = service.session_summary("s1").await.unwrap();
        assert_eq!(summary.total_events, 2);
        assert_eq!(summary.errors, 1);
        assert!(service.session_checkpoints("s1").await.unwrap().is_empty());
    }
}
