//! Replay session records and the status state machine.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{PacingMode, ReplayConfig};
use crate::event::EventKind;

/// Replay identifier.
pub type ReplayId = Uuid;

/// Replay status.
///
/// `Pending -> Running -> {Paused <-> Running} -> {Completed | Error | Stopped}`,
/// with `Error` and `Stopped` reachable from every non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    /// Created, run loop not yet started.
    Pending,
    /// Events are being delivered.
    Running,
    /// Delivery suspended until resumed.
    Paused,
    /// All events delivered.
    Completed,
    /// The run loop failed.
    Error,
    /// Stopped by a caller.
    Stopped,
}

impl ReplayStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Stopped)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running)
            | (Self::Running, Self::Paused | Self::Completed)
            | (Self::Paused, Self::Running) => true,
            (from, Self::Error | Self::Stopped) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the analysis timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub event_id: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

/// Statistics accumulated by the analysis strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub total_events: usize,
    pub events_by_kind: BTreeMap<EventKind, usize>,
    pub tool_calls: usize,
    pub model_calls: usize,
    pub errors: usize,
    pub warnings: usize,
    /// The first events seen, capped.
    pub timeline: Vec<TimelineEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

/// A replay and its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySession {
    pub replay_id: ReplayId,
    /// Recorded session being replayed.
    pub session_id: String,
    pub mode: PacingMode,
    pub status: ReplayStatus,
    /// Configuration resolved at start.
    pub config: ReplayConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Fraction of events delivered, in `[0, 1]`.
    pub progress: f64,
    /// Events delivered so far.
    #[serde(default)]
    pub events_delivered: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisReport>,
}

impl ReplaySession {
    /// Create a pending session with a fresh identifier.
    #[must_use]
    pub fn new(session_id: impl Into<String>, config: ReplayConfig) -> Self {
        let now = Utc::now();
        Self {
            replay_id: Uuid::new_v4(),
            session_id: session_id.into(),
            mode: config.mode,
            status: ReplayStatus::Pending,
            config,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            error: None,
            progress: 0.0,
            events_delivered: 0,
            analysis: None,
        }
    }

    /// Move to `next`, stamping timestamps.
    ///
    /// Returns `false` and leaves the session untouched if the state machine
    /// does not allow the move.
    pub fn transition(&mut self, next: ReplayStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        if next == ReplayStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        if next == ReplayStatus::Completed {
            self.progress = 1.0;
        }
        self.status = next;
        self.updated_at = now;
        true
    }

    /// Record delivery progress. Never moves progress backwards.
    pub fn record_progress(&mut self, delivered: usize, total: usize) {
        self.events_delivered = delivered;
        #[allow(clippy::cast_precision_loss)]
        let fraction = if total == 0 {
            1.0
        } else {
            (delivered as f64 / total as f64).min(1.0)
        };
        self.progress = self.progress.max(fraction);
        self.updated_at = Utc::now();
    }
}
