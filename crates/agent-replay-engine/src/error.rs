//! Replay engine error type.

use agent_replay_core::{
    ReplayId, ReplayStatus,
    traits::{AnalyzerError, CacheError, HistoryError},
};

/// Replay engine error.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("Replay is disabled")]
    Disabled,
    #[error("Concurrent replay limit reached ({limit}), retry later")]
    CapacityReached { limit: usize },
    #[error("Recorded session not found: {0}")]
    SessionNotFound(String),
    #[error("Replay not found: {0}")]
    NotFound(ReplayId),
    #[error("Cannot move replay from {from} to {to}")]
    InvalidTransition { from: ReplayStatus, to: ReplayStatus },
    #[error("Invalid replay configuration: {0}")]
    InvalidConfig(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("History error: {0}")]
    History(#[from] HistoryError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for replay operations.
pub type Result<T> = std::result::Result<T, ReplayError>;
