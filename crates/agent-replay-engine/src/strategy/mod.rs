//! Pacing strategies.
//!
//! A strategy decides, per delivered event, how long to wait before the next
//! one, whether the replay pauses after it, and how the event is annotated.
//! Every replay owns its own strategy instance.

mod analysis;
mod fast_forward;
mod real_time;
mod step_by_step;

use std::time::Duration;

use agent_replay_core::{
    ModeSettings, PacingMode, ReplayConfig, ReplayEvent, session::AnalysisReport,
};

pub use analysis::{AnalysisStrategy, TIMELINE_CAP};
pub use fast_forward::{BASE_DELAY, FastForwardStrategy};
pub use real_time::{MAX_IDLE_GAP, RealTimeStrategy};
pub use step_by_step::StepByStepStrategy;

/// Runtime parameters supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingContext {
    /// Playback speed for real-time pacing.
    pub speed: f64,
    /// Multiplier for fast-forward pacing.
    pub multiplier: f64,
}

impl PacingContext {
    /// Context carrying `config.speed` as both speed and multiplier.
    #[must_use]
    pub const fn from_config(config: &ReplayConfig) -> Self {
        Self {
            speed: config.speed,
            multiplier: config.speed,
        }
    }
}

impl Default for PacingContext {
    fn default() -> Self {
        Self {
            speed: 1.0,
            multiplier: 1.0,
        }
    }
}

/// Per-event pacing policy.
pub trait PacingStrategy: Send + Sync {
    /// Mode implemented by this strategy.
    fn mode(&self) -> PacingMode;

    /// Return the event to emit, possibly annotated.
    fn process(&mut self, event: ReplayEvent, ctx: &PacingContext) -> ReplayEvent;

    /// Whether the replay pauses once this event is delivered.
    fn should_pause(&self, event: &ReplayEvent, ctx: &PacingContext) -> bool;

    /// How long to wait before delivering this event.
    fn delay(&mut self, event: &ReplayEvent, ctx: &PacingContext) -> Duration;

    /// Statistics accumulated so far, for strategies that keep any.
    fn report(&self) -> Option<AnalysisReport> {
        None
    }
}

/// Build a fresh strategy for `settings`.
#[must_use]
pub fn for_mode(settings: ModeSettings) -> Box<dyn PacingStrategy> {
    match settings {
        ModeSettings::RealTime(config) => Box::new(RealTimeStrategy::new(config)),
        ModeSettings::FastForward(config) => Box::new(FastForwardStrategy::new(config)),
        ModeSettings::StepByStep(config) => Box::new(StepByStepStrategy::new(config)),
        ModeSettings::Analysis(config) => Box::new(AnalysisStrategy::new(config)),
    }
}

/// Clamp a rate into `[min, max]`, tolerating inverted bounds and NaN, and
/// never returning a non-positive value.
pub(crate) fn bounded_rate(value: f64, min: f64, max: f64) -> f64 {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    let rate = if value.is_nan() { lo } else { value.max(lo).min(hi) };
    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        1.0
    }
}

/// `duration / rate`, saturating instead of panicking.
pub(crate) fn scale(duration: Duration, rate: f64) -> Duration {
    Duration::try_from_secs_f64(duration.as_secs_f64() / rate).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_replay_core::EventKind;

    #[test]
    fn test_for_mode_builds_matching_strategy() {
        for mode in [
            PacingMode::RealTime,
            PacingMode::FastForward,
            PacingMode::StepByStep,
            PacingMode::Analysis,
        ] {
            assert_eq!(for_mode(ModeSettings::default_for(mode)).mode(), mode);
        }
    }

    #[test]
    fn test_bounded_rate() {
        assert!((bounded_rate(50.0, 0.1, 10.0) - 10.0).abs() < f64::EPSILON);
        assert!((bounded_rate(0.0, 0.1, 10.0) - 0.1).abs() < f64::EPSILON);
        assert!((bounded_rate(f64::NAN, 0.5, 10.0) - 0.5).abs() < f64::EPSILON);
        assert!((bounded_rate(3.0, 10.0, 1.0) - 3.0).abs() < f64::EPSILON);
        assert!((bounded_rate(-1.0, -5.0, 0.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_only_analysis_reports() {
        let mut strategy = for_mode(ModeSettings::default_for(PacingMode::RealTime));
        let event = ReplayEvent::new("e", EventKind::Info, chrono::Utc::now(), "s");
        let _ = strategy.process(event, &PacingContext::default());
        assert!(strategy.report().is_none());
    }
}
