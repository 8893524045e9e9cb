//! Replay engine for recorded agent sessions.
//!
//! Provides:
//! - `EventSourceAdapter` - Recorded history as canonical, filtered events
//! - Pacing strategies (real-time, fast-forward, step-by-step, analysis)
//! - `ReplayEngine` - Replay lifecycle, run loops and event streams
//! - `ReplayService` - Facade for untyped replay requests
//! - `ReplaySettings` - Layered configuration
//! - In-memory history store and cache

pub mod adapter;
pub mod engine;
pub mod error;
pub mod facade;
pub mod settings;
pub mod storage;
pub mod strategy;

pub use adapter::EventSourceAdapter;
pub use engine::ReplayEngine;
pub use error::{ReplayError, Result};
pub use facade::ReplayService;
pub use settings::ReplaySettings;
pub use strategy::{PacingContext, PacingStrategy};
