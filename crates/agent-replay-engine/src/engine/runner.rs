//! The per-replay run loop and cache persistence.

use std::{pin::Pin, sync::Arc, time::Duration};

use agent_replay_core::{EventBuffer, ReplayId, ReplayStatus, traits::ReplayCache};
use futures::StreamExt;
use tokio::sync::watch;

use super::{controller::ReplayController, registry::ReplayRegistry};
use crate::adapter::EventSourceAdapter;
use crate::error::Result;
use crate::strategy::PacingContext;

pub(crate) fn session_key(id: ReplayId) -> String {
    format!("replay:session:{id}")
}

pub(crate) fn events_key(id: ReplayId) -> String {
    format!("replay:events:{id}")
}

/// Mirror the session record into the cache.
pub(crate) async fn mirror(cache: &dyn ReplayCache, controller: &ReplayController, ttl: Duration) {
    let session = controller.snapshot();
    let value = match serde_json::to_value(&session) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(replay_id = %session.replay_id, "Failed to serialize session: {e}");
            return;
        }
    };
    if let Err(e) = cache.set(&session_key(session.replay_id), value, ttl).await {
        tracing::warn!(replay_id = %session.replay_id, "Failed to mirror session: {e}");
    }
}

/// Write the final session record and the delivered events to the cache.
pub(crate) async fn persist_final(
    cache: &dyn ReplayCache,
    controller: &ReplayController,
    ttl: Duration,
) {
    controller.capture_report();
    controller.buffer().close();
    mirror(cache, controller, ttl).await;

    let id = controller.id();
    match serde_json::to_value(controller.buffer().snapshot()) {
        Ok(events) => {
            if let Err(e) = cache.set(&events_key(id), events, ttl).await {
                tracing::warn!(replay_id = %id, "Failed to persist replay events: {e}");
            }
        }
        Err(e) => tracing::warn!(replay_id = %id, "Failed to serialize replay events: {e}"),
    }
}

/// Closes the buffer on every exit path, including cancellation.
struct CloseOnDrop(Arc<EventBuffer>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

pub(crate) struct ReplayRun {
    pub(crate) controller: Arc<ReplayController>,
    pub(crate) source: EventSourceAdapter,
    pub(crate) cache: Arc<dyn ReplayCache>,
    pub(crate) registry: ReplayRegistry,
    pub(crate) ttl: Duration,
}

impl ReplayRun {
    pub(crate) async fn run(self) {
        let _close = CloseOnDrop(Arc::clone(self.controller.buffer()));
        let id = self.controller.id();

        let outcome = self.drive().await;
        self.controller.capture_report();
        match outcome {
            Ok(()) => match self.controller.transition(ReplayStatus::Completed) {
                Ok(session) => tracing::info!(
                    replay_id = %id,
                    events = session.events_delivered,
                    "Replay completed"
                ),
                Err(_) => tracing::debug!(
                    replay_id = %id,
                    status = %self.controller.status(),
                    "Replay ended without completing"
                ),
            },
            Err(e) => {
                tracing::error!(replay_id = %id, "Replay failed: {e}");
                if let Err(err) = self.controller.fail(e.to_string()) {
                    tracing::debug!(replay_id = %id, "Could not record failure: {err}");
                }
            }
        }
        // The cached record must never outlive the task in a live status.
        let status = self.controller.status();
        if !status.is_terminal() {
            tracing::warn!(replay_id = %id, %status, "Replay task ended in a live status");
            let _ = self
                .controller
                .fail(format!("replay task ended while {status}"));
        }

        persist_final(self.cache.as_ref(), &self.controller, self.ttl).await;
        self.registry.remove(id).await;
        drop(self.controller.take_task());
    }

    async fn drive(&self) -> Result<()> {
        let session = match self.controller.transition(ReplayStatus::Running) {
            Ok(session) => session,
            Err(_) if self.controller.status() == ReplayStatus::Stopped => return Ok(()),
            Err(e) => return Err(e),
        };
        tracing::info!(
            replay_id = %session.replay_id,
            session_id = %session.session_id,
            mode = %session.mode,
            "Replay running"
        );
        mirror(self.cache.as_ref(), &self.controller, self.ttl).await;

        let config = &session.config;
        let total = self
            .source
            .count_events(&session.session_id, &config.filter)
            .await?;
        let total = config.max_events.map_or(total, |max| total.min(max));
        if config.max_events == Some(0) {
            return Ok(());
        }

        let ctx = PacingContext::from_config(config);
        let mut status = self.controller.subscribe();
        let mut events = self
            .source
            .events(&session.session_id, &config.filter)
            .peekable();
        let mut delivered = 0_usize;

        loop {
            if wait_while_paused(&mut status).await.is_terminal() {
                return Ok(());
            }
            let Some(next) = events.next().await else {
                break;
            };

            let (event, pause, delay) = self.controller.pace(next?, &ctx);
            if !delay.is_zero() && !sleep_unless_stopped(delay, &mut status).await {
                return Ok(());
            }
            // A pause requested during the wait holds this event back.
            if wait_while_paused(&mut status).await.is_terminal() {
                return Ok(());
            }

            self.controller.buffer().push(event);
            delivered += 1;
            self.controller.record_progress(delivered, total);
            mirror(self.cache.as_ref(), &self.controller, self.ttl).await;

            if config.max_events.is_some_and(|max| delivered >= max) {
                break;
            }
            // A pause after the last event would leave nothing to resume into.
            if pause
                && Pin::new(&mut events).peek().await.is_some()
                && self.controller.transition(ReplayStatus::Paused).is_ok()
            {
                tracing::debug!(replay_id = %session.replay_id, delivered, "Replay paused by strategy");
                mirror(self.cache.as_ref(), &self.controller, self.ttl).await;
            }
        }

        // A caller-requested pause still holds back completion.
        wait_while_paused(&mut status).await;
        Ok(())
    }
}

/// Wait until the status leaves `Paused`, returning the new status.
async fn wait_while_paused(rx: &mut watch::Receiver<ReplayStatus>) -> ReplayStatus {
    loop {
        let status = *rx.borrow_and_update();
        if status != ReplayStatus::Paused {
            return status;
        }
        if rx.changed().await.is_err() {
            return ReplayStatus::Stopped;
        }
    }
}

/// Sleep for `delay`; returns `false` if the replay reached a terminal status
/// first.
async fn sleep_unless_stopped(delay: Duration, rx: &mut watch::Receiver<ReplayStatus>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return true,
            changed = rx.changed() => {
                if changed.is_err() || rx.borrow_and_update().is_terminal() {
                    return false;
                }
            }
        }
    }
}
