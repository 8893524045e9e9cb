//! Step-by-step pacing.

use std::time::Duration;

use agent_replay_core::{PacingMode, ReplayEvent, config::StepByStepConfig};
use serde_json::json;

use super::{PacingContext, PacingStrategy};

/// Delivers one event per resume.
///
/// Pauses after every event, unless `auto_pause` is set with a non-empty
/// `pause_on` list, in which case only those kinds pause.
pub struct StepByStepStrategy {
    config: StepByStepConfig,
    step: usize,
}

impl StepByStepStrategy {
    #[must_use]
    pub const fn new(config: StepByStepConfig) -> Self {
        Self { config, step: 0 }
    }

    fn breakpoints_only(&self) -> bool {
        self.config.auto_pause && !self.config.pause_on.is_empty()
    }
}

impl PacingStrategy for StepByStepStrategy {
    fn mode(&self) -> PacingMode {
        PacingMode::StepByStep
    }

    fn process(&mut self, event: ReplayEvent, _ctx: &PacingContext) -> ReplayEvent {
        self.step += 1;
        if !self.config.show_details {
            return event;
        }
        let breakpoint = self.config.pause_on.contains(&event.kind);
        event.annotated(
            "step",
            json!({
                "index": self.step,
                "breakpoint": breakpoint,
            }),
        )
    }

    fn should_pause(&self, event: &ReplayEvent, _ctx: &PacingContext) -> bool {
        if self.breakpoints_only() {
            self.config.pause_on.contains(&event.kind)
        } else {
            true
        }
    }

    fn delay(&mut self, _event: &ReplayEvent, _ctx: &PacingContext) -> Duration {
        Duration::ZERO
    }
}
