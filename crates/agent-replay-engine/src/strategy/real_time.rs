//! Real-time pacing.

use std::time::Duration;

use agent_replay_core::{PacingMode, ReplayEvent, config::RealTimeConfig};
use chrono::{DateTime, Utc};

use super::{PacingContext, PacingStrategy, bounded_rate, scale};

/// Longest recorded gap replayed when skipping is allowed.
pub const MAX_IDLE_GAP: Duration = Duration::from_secs(300);

/// Preserves the recorded spacing between events, scaled by speed.
pub struct RealTimeStrategy {
    config: RealTimeConfig,
    previous: Option<DateTime<Utc>>,
}

impl RealTimeStrategy {
    #[must_use]
    pub const fn new(config: RealTimeConfig) -> Self {
        Self {
            config,
            previous: None,
        }
    }
}

impl PacingStrategy for RealTimeStrategy {
    fn mode(&self) -> PacingMode {
        PacingMode::RealTime
    }

    fn process(&mut self, event: ReplayEvent, _ctx: &PacingContext) -> ReplayEvent {
        event
    }

    fn should_pause(&self, _event: &ReplayEvent, _ctx: &PacingContext) -> bool {
        false
    }

    fn delay(&mut self, event: &ReplayEvent, ctx: &PacingContext) -> Duration {
        let Some(previous) = self.previous.replace(event.timestamp) else {
            return Duration::ZERO;
        };

        // Out-of-order timestamps replay without a wait.
        let mut gap = (event.timestamp - previous).to_std().unwrap_or(Duration::ZERO);
        if self.config.allow_skip {
            gap = gap.min(MAX_IDLE_GAP);
        }

        let speed = bounded_rate(ctx.speed, self.config.min_speed, self.config.max_speed);
        scale(gap, speed)
    }
}
