//! Core abstractions for replaying recorded agent sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `ReplayEvent` / `EventKind` - Canonical event model
//! - `ReplaySession` / `ReplayStatus` - Replay record and state machine
//! - `ReplayConfig` / `ReplayFilter` - Typed replay configuration
//! - `EventBuffer` - Append-only event buffer with live readers
//! - Collaborator traits (history, config, cache, lookup, analyzer)

pub mod config;
pub mod event;
pub mod event_buffer;
pub mod session;
pub mod traits;

pub use config::{ModeSettings, PacingMode, ReplayConfig, ReplayFilter};
pub use event::{EventKind, ReplayEvent};
pub use event_buffer::EventBuffer;
pub use session::{ReplayId, ReplaySession, ReplayStatus};
pub use traits::{ConfigService, HistoryStore, ReplayAnalyzer, ReplayCache, SessionLookup};
