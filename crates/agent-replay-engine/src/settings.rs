//! Replay settings loaded from defaults, TOML files and the environment.

use agent_replay_core::{
    ConfigService, ModeSettings, PacingMode,
    config::{
        AnalysisConfig, AnalyzerConfig, FastForwardConfig, ProcessorConfig, RealTimeConfig,
        StepByStepConfig,
    },
};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{ReplayError, Result};

/// Default configuration file, relative to the working directory.
pub const CONFIG_FILE: &str = "agent-replay.toml";

/// Environment variable naming an extra configuration file.
pub const CONFIG_PATH_ENV: &str = "AGENT_REPLAY_CONFIG_PATH";

/// Prefix of environment overrides. `__` separates nested keys, e.g.
/// `AGENT_REPLAY_PROCESSOR__MAX_CONCURRENT_REPLAYS=4`.
pub const ENV_PREFIX: &str = "AGENT_REPLAY_";

/// Replay settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaySettings {
    pub enabled: bool,
    pub processor: ProcessorConfig,
    pub real_time: RealTimeConfig,
    pub fast_forward: FastForwardConfig,
    pub step_by_step: StepByStepConfig,
    pub analysis: AnalysisConfig,
    pub analyzer: AnalyzerConfig,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            processor: ProcessorConfig::default(),
            real_time: RealTimeConfig::default(),
            fast_forward: FastForwardConfig::default(),
            step_by_step: StepByStepConfig::default(),
            analysis: AnalysisConfig::default(),
            analyzer: AnalyzerConfig::default(),
        }
    }
}

impl ReplaySettings {
    /// Load settings.
    ///
    /// Loads in this order:
    /// 1. Defaults
    /// 2. `agent-replay.toml`
    /// 3. The file named by `AGENT_REPLAY_CONFIG_PATH`
    /// 4. `AGENT_REPLAY_*` environment variables
    ///
    /// # Errors
    /// Returns error if a source is malformed or the result fails validation.
    pub fn load() -> Result<Self> {
        let mut figment = Self::defaults().merge(Toml::file(CONFIG_FILE));
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(
            Env::prefixed(ENV_PREFIX)
                .ignore(&["CONFIG_PATH"])
                .split("__"),
        );
        Self::extract(&figment)
    }

    /// Load settings from a single TOML file layered over the defaults.
    ///
    /// # Errors
    /// Returns error if the file is malformed or fails validation.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::extract(&Self::defaults().merge(Toml::file(path.as_ref())))
    }

    /// Parse settings from a TOML string layered over the defaults.
    ///
    /// # Errors
    /// Returns error if the string is malformed or fails validation.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::extract(&Self::defaults().merge(Toml::string(toml)))
    }

    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
    }

    fn extract(figment: &Figment) -> Result<Self> {
        let settings: Self = figment
            .extract()
            .map_err(|e| ReplayError::Configuration(format!("Failed to load settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check limits and rate ranges.
    ///
    /// # Errors
    /// Returns error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.processor.max_concurrent_replays == 0 {
            return Err(invalid("processor.max_concurrent_replays must be at least 1"));
        }
        if self.processor.buffer_capacity == 0 {
            return Err(invalid("processor.buffer_capacity must be at least 1"));
        }
        let rt = &self.real_time;
        check_range("real_time speed", rt.min_speed, rt.default_speed, rt.max_speed)?;
        let ff = &self.fast_forward;
        check_range(
            "fast_forward multiplier",
            ff.min_multiplier,
            ff.default_multiplier,
            ff.max_multiplier,
        )?;
        Ok(())
    }
}

fn invalid(message: &str) -> ReplayError {
    ReplayError::Configuration(message.to_string())
}

fn check_range(name: &str, min: f64, default: f64, max: f64) -> Result<()> {
    if !(min.is_finite() && max.is_finite() && min > 0.0) {
        return Err(ReplayError::Configuration(format!(
            "{name} bounds must be positive numbers"
        )));
    }
    if min > max {
        return Err(ReplayError::Configuration(format!(
            "{name} minimum {min} exceeds maximum {max}"
        )));
    }
    if !(min..=max).contains(&default) {
        return Err(ReplayError::Configuration(format!(
            "{name} default {default} outside [{min}, {max}]"
        )));
    }
    Ok(())
}

impl ConfigService for ReplaySettings {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn processor_config(&self) -> ProcessorConfig {
        self.processor.clone()
    }

    fn mode_config(&self, mode: PacingMode) -> ModeSettings {
        match mode {
            PacingMode::RealTime => ModeSettings::RealTime(self.real_time.clone()),
            PacingMode::FastForward => ModeSettings::FastForward(self.fast_forward.clone()),
            PacingMode::StepByStep => ModeSettings::StepByStep(self.step_by_step.clone()),
            PacingMode::Analysis => ModeSettings::Analysis(self.analysis.clone()),
        }
    }

    fn analyzer_config(&self) -> AnalyzerConfig {
        self.analyzer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_replay_core::{EventKind, config::AnalysisLevel};
    use std::{io::Write, time::Duration};

    #[test]
    fn test_defaults() {
        let settings = ReplaySettings::default();
        assert!(settings.enabled);
        assert_eq!(settings.processor.max_concurrent_replays, 10);
        assert_eq!(settings.processor.session_timeout, Duration::from_secs(3600));
        assert!(settings.validate().is_ok());

        match settings.mode_config(PacingMode::StepByStep) {
            ModeSettings::StepByStep(step) => {
                assert!(!step.auto_pause);
                assert_eq!(
                    step.pause_on,
                    vec![EventKind::Error, EventKind::ToolCall, EventKind::ModelCall]
                );
            }
            other => panic!("unexpected settings: {other:?}"),
        }
        assert!(
            (settings.mode_config(PacingMode::FastForward).default_rate() - 10.0).abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let settings = ReplaySettings::from_toml_str(
            r#"
            enabled = false

            [processor]
            max_concurrent_replays = 2
            session_timeout = "10m"

            [analysis]
            level = "comprehensive"

            [step_by_step]
            auto_pause = true
            pause_on = ["error"]
            "#,
        )
        .unwrap();

        assert!(!settings.is_enabled());
        assert_eq!(settings.processor.max_concurrent_replays, 2);
        assert_eq!(settings.processor.session_timeout, Duration::from_secs(600));
        assert_eq!(settings.processor.buffer_capacity, 10_000);
        assert_eq!(settings.analysis.level, AnalysisLevel::Comprehensive);
        assert!(settings.analysis.deep_analysis);
        assert_eq!(settings.step_by_step.pause_on, vec![EventKind::Error]);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[fast_forward]\ndefault_multiplier = 25.0").unwrap();

        let settings = ReplaySettings::from_file(file.path()).unwrap();
        assert!((settings.fast_forward.default_multiplier - 25.0).abs() < f64::EPSILON);
        assert!((settings.real_time.default_speed - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validation_rejects_bad_ranges() {
        let err = ReplaySettings::from_toml_str("[real_time]\nmin_speed = 5.0\nmax_speed = 1.0")
            .unwrap_err();
        assert!(matches!(err, ReplayError::Configuration(_)));

        let err = ReplaySettings::from_toml_str("[processor]\nmax_concurrent_replays = 0")
            .unwrap_err();
        assert!(err.to_string().contains("max_concurrent_replays"));

        let err = ReplaySettings::from_toml_str("[fast_forward]\ndefault_multiplier = 500.0")
            .unwrap_err();
        assert!(err.to_string().contains("outside"));
    }

    #[test]
    fn test_malformed_toml_is_a_configuration_error() {
        let err = ReplaySettings::from_toml_str("processor = [").unwrap_err();
        assert!(matches!(err, ReplayError::Configuration(_)));
    }
}
