//! Per-replay controller: owns the session record, status signal, event
//! buffer, strategy and task handle of one replay.

use std::{
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use agent_replay_core::{
    EventBuffer, ReplayEvent, ReplayId, ReplaySession, ReplayStatus, session::AnalysisReport,
};
use tokio::{sync::watch, task::JoinHandle};

use crate::error::{ReplayError, Result};
use crate::strategy::{AnalysisStrategy, PacingContext, PacingStrategy};

pub(crate) struct ReplayController {
    session: RwLock<ReplaySession>,
    status: watch::Sender<ReplayStatus>,
    buffer: Arc<EventBuffer>,
    strategy: Mutex<Box<dyn PacingStrategy>>,
    /// Side accumulator for `enable_analysis` on non-analysis modes.
    statistics: Mutex<Option<AnalysisStrategy>>,
    task: Mutex<Option<JoinHandle<()>>>,
    launched: AtomicBool,
}

impl ReplayController {
    pub(crate) fn new(
        session: ReplaySession,
        strategy: Box<dyn PacingStrategy>,
        buffer_capacity: usize,
    ) -> Self {
        let (status, _) = watch::channel(session.status);
        Self {
            session: RwLock::new(session),
            status,
            buffer: Arc::new(EventBuffer::new(buffer_capacity)),
            strategy: Mutex::new(strategy),
            statistics: Mutex::new(None),
            task: Mutex::new(None),
            launched: AtomicBool::new(false),
        }
    }

    /// Also gather statistics with `statistics`, alongside the strategy.
    #[must_use]
    pub(crate) fn with_statistics(self, statistics: Option<AnalysisStrategy>) -> Self {
        *self.statistics.lock().unwrap_or_else(PoisonError::into_inner) = statistics;
        self
    }

    pub(crate) fn id(&self) -> ReplayId {
        self.read().replay_id
    }

    pub(crate) fn snapshot(&self) -> ReplaySession {
        self.read().clone()
    }

    pub(crate) fn status(&self) -> ReplayStatus {
        *self.status.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ReplayStatus> {
        self.status.subscribe()
    }

    pub(crate) const fn buffer(&self) -> &Arc<EventBuffer> {
        &self.buffer
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ReplaySession> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ReplaySession> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the session to `next` and wake everything watching its status.
    pub(crate) fn transition(&self, next: ReplayStatus) -> Result<ReplaySession> {
        self.transition_if(|_| true, next)
    }

    /// Like [`Self::transition`], but only from `expected`.
    pub(crate) fn transition_from(
        &self,
        expected: ReplayStatus,
        next: ReplayStatus,
    ) -> Result<ReplaySession> {
        self.transition_if(|current| current == expected, next)
    }

    fn transition_if(
        &self,
        allowed: impl FnOnce(ReplayStatus) -> bool,
        next: ReplayStatus,
    ) -> Result<ReplaySession> {
        let mut session = self.write();
        let from = session.status;
        if !allowed(from) || !session.transition(next) {
            return Err(ReplayError::InvalidTransition { from, to: next });
        }
        self.status.send_replace(next);
        Ok(session.clone())
    }

    /// Move to `Error`, recording `message`.
    pub(crate) fn fail(&self, message: String) -> Result<ReplaySession> {
        let mut session = self.write();
        let from = session.status;
        if !session.transition(ReplayStatus::Error) {
            return Err(ReplayError::InvalidTransition {
                from,
                to: ReplayStatus::Error,
            });
        }
        session.error = Some(message);
        self.status.send_replace(ReplayStatus::Error);
        Ok(session.clone())
    }

    pub(crate) fn record_progress(&self, delivered: usize, total: usize) {
        self.write().record_progress(delivered, total);
    }

    /// Run `event` through the strategy: the event to emit, whether to pause
    /// after it, and how long to wait before emitting it.
    pub(crate) fn pace(
        &self,
        event: ReplayEvent,
        ctx: &PacingContext,
    ) -> (ReplayEvent, bool, Duration) {
        let mut strategy = self.strategy.lock().unwrap_or_else(PoisonError::into_inner);
        let event = strategy.process(event, ctx);
        let pause = strategy.should_pause(&event, ctx);
        let delay = strategy.delay(&event, ctx);
        drop(strategy);
        if let Some(statistics) = self
            .statistics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            statistics.observe(&event);
        }
        (event, pause, delay)
    }

    /// Copy the strategy's statistics, or the side accumulator's, onto the
    /// session record.
    pub(crate) fn capture_report(&self) {
        let report: Option<AnalysisReport> = self
            .strategy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .report();
        let report = report.or_else(|| {
            self.statistics
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .and_then(PacingStrategy::report)
        });
        if report.is_some() {
            self.write().analysis = report;
        }
    }

    /// Returns `true` the first time it is called.
    pub(crate) fn mark_launched(&self) -> bool {
        !self.launched.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn set_task(&self, handle: JoinHandle<()>) {
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub(crate) fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
