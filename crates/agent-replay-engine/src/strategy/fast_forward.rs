//! Fast-forward pacing.

use std::time::Duration;

use agent_replay_core::{EventKind, PacingMode, ReplayEvent, config::FastForwardConfig};

use super::{PacingContext, PacingStrategy, bounded_rate, scale};

/// Delay between events at a multiplier of 1.
pub const BASE_DELAY: Duration = Duration::from_millis(100);

/// Fixed short delay; stops on errors and at the end of a workflow.
pub struct FastForwardStrategy {
    config: FastForwardConfig,
}

impl FastForwardStrategy {
    #[must_use]
    pub const fn new(config: FastForwardConfig) -> Self {
        Self { config }
    }
}

impl PacingStrategy for FastForwardStrategy {
    fn mode(&self) -> PacingMode {
        PacingMode::FastForward
    }

    fn process(&mut self, event: ReplayEvent, _ctx: &PacingContext) -> ReplayEvent {
        event
    }

    fn should_pause(&self, event: &ReplayEvent, _ctx: &PacingContext) -> bool {
        matches!(event.kind, EventKind::Error | EventKind::WorkflowEnd)
    }

    fn delay(&mut self, _event: &ReplayEvent, ctx: &PacingContext) -> Duration {
        let multiplier = bounded_rate(
            ctx.multiplier,
            self.config.min_multiplier,
            self.config.max_multiplier,
        );
        scale(BASE_DELAY, multiplier)
    }
}
