//! Replay engine: owns the replays, runs their loops and serves their
//! streams.

mod controller;
mod registry;
mod runner;

use std::sync::Arc;

use agent_replay_core::{
    ConfigService, EventBuffer, HistoryStore, ModeSettings, PacingMode, ReplayCache, ReplayConfig,
    ReplayEvent, ReplayId, ReplaySession, ReplayStatus,
    config::{AnalysisConfig, ExportFormat},
};
use futures::{StreamExt, stream::BoxStream};

use crate::adapter::EventSourceAdapter;
use crate::error::{ReplayError, Result};
use crate::strategy::{self, AnalysisStrategy};

use controller::ReplayController;
use registry::ReplayRegistry;
use runner::{ReplayRun, events_key, mirror, persist_final, session_key};

/// Replay engine.
///
/// Each replay is owned by a controller in the engine's registry while it is
/// live. Once it terminates, its session record and delivered events remain
/// readable from the cache until their TTL expires.
pub struct ReplayEngine {
    source: EventSourceAdapter,
    config: Arc<dyn ConfigService>,
    cache: Arc<dyn ReplayCache>,
    registry: ReplayRegistry,
}

impl ReplayEngine {
    /// Create an engine reading history from `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn HistoryStore>,
        config: Arc<dyn ConfigService>,
        cache: Arc<dyn ReplayCache>,
    ) -> Self {
        Self {
            source: EventSourceAdapter::new(store),
            config,
            cache,
            registry: ReplayRegistry::default(),
        }
    }

    /// The adapter over the history store.
    #[must_use]
    pub const fn source(&self) -> &EventSourceAdapter {
        &self.source
    }

    /// The configuration service.
    #[must_use]
    pub fn config(&self) -> &Arc<dyn ConfigService> {
        &self.config
    }

    /// Config for `mode` whose speed is the mode's configured default rate.
    ///
    /// [`Self::start_replay`] takes `speed` as given, so callers building a
    /// config by hand should start from here rather than
    /// [`ReplayConfig::for_mode`].
    #[must_use]
    pub fn default_config(&self, mode: PacingMode) -> ReplayConfig {
        ReplayConfig {
            speed: self.config.mode_config(mode).default_rate(),
            ..ReplayConfig::for_mode(mode)
        }
    }

    /// Create a replay of `session_id`, launching it if `config.auto_start`.
    ///
    /// # Errors
    /// Returns error if replay is disabled, the config is invalid, or the
    /// concurrent replay limit is reached.
    pub async fn start_replay(&self, session_id: &str, config: ReplayConfig) -> Result<ReplayId> {
        if !self.config.is_enabled() {
            return Err(ReplayError::Disabled);
        }
        if !config.speed.is_finite() || config.speed <= 0.0 {
            return Err(ReplayError::InvalidConfig(format!(
                "speed must be a positive number, got {}",
                config.speed
            )));
        }

        let processor = self.config.processor_config();
        let mode = config.mode;
        let auto_start = config.auto_start;
        let strategy = strategy::for_mode(self.config.mode_config(mode));
        let statistics = (config.enable_analysis && mode != PacingMode::Analysis)
            .then(|| AnalysisStrategy::new(self.analysis_settings()));
        let session = ReplaySession::new(session_id, config);
        let replay_id = session.replay_id;
        let controller = Arc::new(
            ReplayController::new(session, strategy, processor.buffer_capacity)
                .with_statistics(statistics),
        );

        self.registry
            .insert_within_limit(Arc::clone(&controller), processor.max_concurrent_replays)
            .await?;
        mirror(self.cache.as_ref(), &controller, processor.session_timeout).await;

        tracing::info!(
            replay_id = %replay_id,
            session_id = %session_id,
            mode = %mode,
            auto_start,
            "Replay created"
        );

        if auto_start {
            self.launch(&controller);
        }
        Ok(replay_id)
    }

    /// Events of a replay: everything buffered so far, then live events until
    /// the replay ends. Launches a pending replay.
    ///
    /// A replay that already left memory is served from the cached snapshot.
    ///
    /// # Errors
    /// Returns error if the replay is unknown.
    pub async fn replay_stream(&self, replay_id: ReplayId) -> Result<BoxStream<'static, ReplayEvent>> {
        if let Some(controller) = self.registry.get(replay_id).await {
            if controller.status() == ReplayStatus::Pending {
                self.launch(&controller);
            }
            return Ok(controller.buffer().stream());
        }

        if let Some(events) = self.cached_events(replay_id).await? {
            return Ok(Arc::new(EventBuffer::from_events(events)).stream());
        }
        if self.cached_session(replay_id).await.is_some() {
            return Ok(futures::stream::empty().boxed());
        }
        Err(ReplayError::NotFound(replay_id))
    }

    /// Pause a running replay.
    ///
    /// # Errors
    /// Returns error if the replay is unknown or not running.
    pub async fn pause_replay(&self, replay_id: ReplayId) -> Result<ReplaySession> {
        self.change_status(replay_id, ReplayStatus::Running, ReplayStatus::Paused)
            .await
    }

    /// Resume a paused replay.
    ///
    /// # Errors
    /// Returns error if the replay is unknown or not paused.
    pub async fn resume_replay(&self, replay_id: ReplayId) -> Result<ReplaySession> {
        self.change_status(replay_id, ReplayStatus::Paused, ReplayStatus::Running)
            .await
    }

    async fn change_status(
        &self,
        replay_id: ReplayId,
        from: ReplayStatus,
        next: ReplayStatus,
    ) -> Result<ReplaySession> {
        let controller = self
            .registry
            .get(replay_id)
            .await
            .ok_or(ReplayError::NotFound(replay_id))?;
        let session = controller.transition_from(from, next)?;
        tracing::info!(
            replay_id = %replay_id,
            session_id = %session.session_id,
            status = %next,
            "Replay status changed"
        );
        mirror(self.cache.as_ref(), &controller, self.ttl()).await;
        Ok(session)
    }

    /// Stop a replay, cancel its task and persist its final state.
    ///
    /// # Errors
    /// Returns error if the replay is unknown or already terminal.
    pub async fn stop_replay(&self, replay_id: ReplayId) -> Result<ReplaySession> {
        let Some(controller) = self.registry.get(replay_id).await else {
            return match self.cached_session(replay_id).await {
                Some(session) => Err(ReplayError::InvalidTransition {
                    from: session.status,
                    to: ReplayStatus::Stopped,
                }),
                None => Err(ReplayError::NotFound(replay_id)),
            };
        };

        controller.transition(ReplayStatus::Stopped)?;
        if let Some(task) = controller.take_task() {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(replay_id = %replay_id, "Replay task ended abnormally: {e}");
                }
            }
        }

        persist_final(self.cache.as_ref(), &controller, self.ttl()).await;
        self.registry.remove(replay_id).await;

        let session = controller.snapshot();
        tracing::info!(
            replay_id = %replay_id,
            session_id = %session.session_id,
            events = session.events_delivered,
            "Replay stopped"
        );
        Ok(session)
    }

    /// Current state of a replay, from memory or the cache mirror.
    pub async fn get_replay_session(&self, replay_id: ReplayId) -> Option<ReplaySession> {
        if let Some(controller) = self.registry.get(replay_id).await {
            return Some(controller.snapshot());
        }
        self.cached_session(replay_id).await
    }

    /// Replays that have not reached a terminal status.
    pub async fn list_active_replays(&self) -> Vec<ReplaySession> {
        self.registry
            .all()
            .await
            .into_iter()
            .map(|c| c.snapshot())
            .filter(|s| !s.status.is_terminal())
            .collect()
    }

    /// Events delivered so far by a replay.
    ///
    /// # Errors
    /// Returns error if the replay is unknown.
    pub async fn replay_events(&self, replay_id: ReplayId) -> Result<Vec<ReplayEvent>> {
        if let Some(controller) = self.registry.get(replay_id).await {
            return Ok(controller.buffer().snapshot());
        }
        if let Some(events) = self.cached_events(replay_id).await? {
            return Ok(events);
        }
        if self.cached_session(replay_id).await.is_some() {
            return Ok(Vec::new());
        }
        Err(ReplayError::NotFound(replay_id))
    }

    /// Render a replay's delivered events in its configured export format.
    ///
    /// # Errors
    /// Returns error if the replay is unknown or an event fails to serialize.
    pub async fn export_events(&self, replay_id: ReplayId) -> Result<String> {
        let format = self
            .get_replay_session(replay_id)
            .await
            .ok_or(ReplayError::NotFound(replay_id))?
            .config
            .export_format
            .unwrap_or_default();
        let events = self.replay_events(replay_id).await?;

        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&events)?),
            ExportFormat::Jsonl => {
                let mut out = String::new();
                for event in &events {
                    out.push_str(&serde_json::to_string(event)?);
                    out.push('\n');
                }
                Ok(out)
            }
        }
    }

    fn analysis_settings(&self) -> AnalysisConfig {
        match self.config.mode_config(PacingMode::Analysis) {
            ModeSettings::Analysis(settings) => settings,
            _ => AnalysisConfig::default(),
        }
    }

    fn ttl(&self) -> std::time::Duration {
        self.config.processor_config().session_timeout
    }

    fn launch(&self, controller: &Arc<ReplayController>) {
        if !controller.mark_launched() {
            return;
        }
        let run = ReplayRun {
            controller: Arc::clone(controller),
            source: self.source.clone(),
            cache: Arc::clone(&self.cache),
            registry: self.registry.clone(),
            ttl: self.ttl(),
        };
        controller.set_task(tokio::spawn(run.run()));
    }

    async fn cached_session(&self, replay_id: ReplayId) -> Option<ReplaySession> {
        match self.cache.get(&session_key(replay_id)).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::warn!(replay_id = %replay_id, "Discarding unreadable cached session: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(replay_id = %replay_id, "Failed to read cached session: {e}");
                None
            }
        }
    }

    async fn cached_events(&self, replay_id: ReplayId) -> Result<Option<Vec<ReplayEvent>>> {
        match self.cache.get(&events_key(replay_id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}
