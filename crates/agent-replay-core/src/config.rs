//! Replay configuration types.

use std::{collections::HashMap, fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{EventKind, ReplayEvent};

/// Pacing mode of a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingMode {
    /// Preserve the original spacing between events.
    #[default]
    RealTime,
    /// Fixed short delay, pausing on errors and workflow end.
    FastForward,
    /// Advance one event per resume.
    StepByStep,
    /// No pacing; accumulate statistics.
    Analysis,
}

impl PacingMode {
    /// Wire name of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RealTime => "real_time",
            Self::FastForward => "fast_forward",
            Self::StepByStep => "step_by_step",
            Self::Analysis => "analysis",
        }
    }
}

impl fmt::Display for PacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown pacing mode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown pacing mode: {0}")]
pub struct UnknownPacingMode(pub String);

impl FromStr for PacingMode {
    type Err = UnknownPacingMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "real_time" | "realtime" => Ok(Self::RealTime),
            "fast_forward" | "fastforward" => Ok(Self::FastForward),
            "step_by_step" | "step" => Ok(Self::StepByStep),
            "analysis" => Ok(Self::Analysis),
            _ => Err(UnknownPacingMode(s.to_string())),
        }
    }
}

/// Export format for buffered replay events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// A single JSON array.
    #[default]
    Json,
    /// One JSON object per line.
    Jsonl,
}

/// Event filter.
///
/// Every present dimension must match; absent dimensions match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_kinds: Option<Vec<EventKind>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_ids: Option<Vec<String>>,
    /// Key/value pairs that must equal the event's metadata (or payload) entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<HashMap<String, Value>>,
}

impl ReplayFilter {
    /// Restrict to the given kinds.
    #[must_use]
    pub fn kinds(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            event_kinds: Some(kinds.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Whether no dimension is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Whether `event` passes every present dimension.
    #[must_use]
    pub fn matches(&self, event: &ReplayEvent) -> bool {
        if let Some(ref kinds) = self.event_kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if event.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if event.timestamp > end {
                return false;
            }
        }
        if let Some(ref threads) = self.thread_ids {
            if !event.thread_id.as_ref().is_some_and(|t| threads.contains(t)) {
                return false;
            }
        }
        if let Some(ref workflows) = self.workflow_ids {
            if !event
                .workflow_id
                .as_ref()
                .is_some_and(|w| workflows.contains(w))
            {
                return false;
            }
        }
        if let Some(ref custom) = self.custom {
            if !custom
                .iter()
                .all(|(key, expected)| event.field(key) == Some(expected))
            {
                return false;
            }
        }
        true
    }
}

/// Typed configuration of a single replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub mode: PacingMode,
    /// Speed for real-time, multiplier for fast-forward. Always taken as
    /// given; see `ModeSettings::default_rate` for the configured default.
    pub speed: f64,
    #[serde(default)]
    pub filter: ReplayFilter,
    pub auto_start: bool,
    /// Stop after this many delivered events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_events: Option<usize>,
    /// Gather an `AnalysisReport` whatever the pacing mode.
    pub enable_analysis: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_format: Option<ExportFormat>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            mode: PacingMode::RealTime,
            speed: 1.0,
            filter: ReplayFilter::default(),
            auto_start: true,
            max_events: None,
            enable_analysis: false,
            export_format: None,
        }
    }
}

impl ReplayConfig {
    /// Default config for `mode`.
    #[must_use]
    pub fn for_mode(mode: PacingMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
}

/// Engine-wide limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Maximum number of non-terminal replays.
    pub max_concurrent_replays: usize,
    /// TTL for cache mirrors of sessions and event snapshots.
    #[serde(with = "humantime_serde")]
    pub session_timeout: Duration,
    /// Maximum events retained in a replay's buffer.
    pub buffer_capacity: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_replays: 10,
            session_timeout: Duration::from_secs(3600),
            buffer_capacity: 10_000,
        }
    }
}

/// Real-time pacing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealTimeConfig {
    pub default_speed: f64,
    pub min_speed: f64,
    pub max_speed: f64,
    pub allow_skip: bool,
}

impl Default for RealTimeConfig {
    fn default() -> Self {
        Self {
            default_speed: 1.0,
            min_speed: 0.1,
            max_speed: 10.0,
            allow_skip: true,
        }
    }
}

/// Fast-forward pacing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastForwardConfig {
    pub default_multiplier: f64,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
}

impl Default for FastForwardConfig {
    fn default() -> Self {
        Self {
            default_multiplier: 10.0,
            min_multiplier: 1.0,
            max_multiplier: 100.0,
        }
    }
}

/// Step-by-step pacing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepByStepConfig {
    /// Pause only on `pause_on` kinds instead of after every event.
    pub auto_pause: bool,
    pub pause_on: Vec<EventKind>,
    /// Attach a `step` annotation to every event.
    pub show_details: bool,
}

impl Default for StepByStepConfig {
    fn default() -> Self {
        Self {
            auto_pause: false,
            pause_on: vec![EventKind::Error, EventKind::ToolCall, EventKind::ModelCall],
            show_details: true,
        }
    }
}

/// Depth of per-event analysis annotations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisLevel {
    Basic,
    #[default]
    Detailed,
    Comprehensive,
}

/// Analysis strategy settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub deep_analysis: bool,
    pub level: AnalysisLevel,
    pub recommendations: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            deep_analysis: true,
            level: AnalysisLevel::Detailed,
            recommendations: true,
        }
    }
}

/// Per-mode settings, one variant per pacing mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ModeSettings {
    RealTime(RealTimeConfig),
    FastForward(FastForwardConfig),
    StepByStep(StepByStepConfig),
    Analysis(AnalysisConfig),
}

impl ModeSettings {
    /// The mode these settings apply to.
    #[must_use]
    pub const fn mode(&self) -> PacingMode {
        match self {
            Self::RealTime(_) => PacingMode::RealTime,
            Self::FastForward(_) => PacingMode::FastForward,
            Self::StepByStep(_) => PacingMode::StepByStep,
            Self::Analysis(_) => PacingMode::Analysis,
        }
    }

    /// Default settings for `mode`.
    #[must_use]
    pub fn default_for(mode: PacingMode) -> Self {
        match mode {
            PacingMode::RealTime => Self::RealTime(RealTimeConfig::default()),
            PacingMode::FastForward => Self::FastForward(FastForwardConfig::default()),
            PacingMode::StepByStep => Self::StepByStep(StepByStepConfig::default()),
            PacingMode::Analysis => Self::Analysis(AnalysisConfig::default()),
        }
    }

    /// Rate used when a replay names no speed: the default speed for
    /// real-time, the default multiplier for fast-forward, 1.0 otherwise.
    #[must_use]
    pub const fn default_rate(&self) -> f64 {
        match self {
            Self::RealTime(config) => config.default_speed,
            Self::FastForward(config) => config.default_multiplier,
            Self::StepByStep(_) | Self::Analysis(_) => 1.0,
        }
    }
}

/// Settings handed to the external analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub enabled: bool,
    pub max_recommendations: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_recommendations: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: EventKind) -> ReplayEvent {
        ReplayEvent::new("e", kind, Utc::now(), "s")
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = ReplayFilter::default();
        assert!(filter.is_empty());
        assert!(EventKind::ALL.into_iter().all(|k| filter.matches(&event(k))));
    }

    #[test]
    fn test_filter_dimensions_combine_with_and() {
        let filter = ReplayFilter {
            event_kinds: Some(vec![EventKind::ToolCall]),
            thread_ids: Some(vec!["t1".to_string()]),
            ..ReplayFilter::default()
        };

        assert!(filter.matches(&event(EventKind::ToolCall).with_thread("t1")));
        assert!(!filter.matches(&event(EventKind::ToolCall).with_thread("t2")));
        assert!(!filter.matches(&event(EventKind::ToolCall)));
        assert!(!filter.matches(&event(EventKind::Info).with_thread("t1")));
    }

    #[test]
    fn test_time_window_is_inclusive() {
        let base = Utc::now();
        let filter = ReplayFilter {
            start_time: Some(base),
            end_time: Some(base + chrono::Duration::seconds(10)),
            ..ReplayFilter::default()
        };
        let mut e = event(EventKind::Info);
        e.timestamp = base;
        assert!(filter.matches(&e));
        e.timestamp = base + chrono::Duration::seconds(10);
        assert!(filter.matches(&e));
        e.timestamp = base + chrono::Duration::seconds(11);
        assert!(!filter.matches(&e));
    }

    #[test]
    fn test_custom_predicates() {
        let mut custom = HashMap::new();
        custom.insert("provider".to_string(), json!("openai"));
        let filter = ReplayFilter {
            custom: Some(custom),
            ..ReplayFilter::default()
        };

        let in_metadata = event(EventKind::ModelCall).annotated("provider", json!("openai"));
        let in_data = event(EventKind::ModelCall).with_data(json!({"provider": "openai"}));
        let other = event(EventKind::ModelCall).annotated("provider", json!("anthropic"));

        assert!(filter.matches(&in_metadata));
        assert!(filter.matches(&in_data));
        assert!(!filter.matches(&other));
    }

    #[test]
    fn test_pacing_mode_parsing() {
        assert_eq!("fast_forward".parse::<PacingMode>().unwrap(), PacingMode::FastForward);
        assert_eq!("Step-By-Step".parse::<PacingMode>().unwrap(), PacingMode::StepByStep);
        assert_eq!("realtime".parse::<PacingMode>().unwrap(), PacingMode::RealTime);
        assert!("warp".parse::<PacingMode>().is_err());
    }

    #[test]
    fn test_default_rate_per_mode() {
        let rate = |mode| ModeSettings::default_for(mode).default_rate();
        assert!((rate(PacingMode::RealTime) - 1.0).abs() < f64::EPSILON);
        assert!((rate(PacingMode::FastForward) - 10.0).abs() < f64::EPSILON);
        assert!((rate(PacingMode::Analysis) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_processor_config_humantime() {
        let config: ProcessorConfig =
            serde_json::from_value(json!({"session_timeout": "15m"})).unwrap();
        assert_eq!(config.session_timeout, Duration::from_secs(900));
        assert_eq!(config.max_concurrent_replays, 10);
    }
}
