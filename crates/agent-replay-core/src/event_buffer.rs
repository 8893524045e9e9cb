//! Append-only per-replay event buffer with change notification.

use std::{
    collections::VecDeque,
    sync::{Arc, PoisonError, RwLock},
};

use futures::StreamExt;
use tokio::sync::watch;

use crate::ReplayEvent;

/// Default number of events retained per replay.
pub const DEFAULT_CAPACITY: usize = 10_000;

struct Inner {
    history: VecDeque<ReplayEvent>,
    /// Events evicted from the front of `history`.
    evicted: usize,
    closed: bool,
}

/// Event buffer shared by one writer (the run loop) and any number of readers.
///
/// Readers keep an absolute offset and are woken when the writer appends or
/// closes, so an in-memory reader never misses or duplicates an event unless
/// it falls more than `capacity` events behind.
pub struct EventBuffer {
    inner: RwLock<Inner>,
    capacity: usize,
    version: watch::Sender<u64>,
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBuffer {
    /// Create a buffer retaining at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(capacity.min(256)),
                evicted: 0,
                closed: false,
            }),
            capacity: capacity.max(1),
            version,
        }
    }

    /// Create a closed buffer holding `events`.
    #[must_use]
    pub fn from_events(events: Vec<ReplayEvent>) -> Self {
        let buffer = Self::new(events.len().max(1));
        {
            let mut inner = buffer.write();
            inner.history.extend(events);
            inner.closed = true;
        }
        buffer
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Append an event. Ignored once the buffer is closed.
    pub fn push(&self, event: ReplayEvent) {
        {
            let mut inner = self.write();
            if inner.closed {
                tracing::debug!(event_id = %event.id, "Dropping event pushed to closed buffer");
                return;
            }
            if inner.history.len() == self.capacity {
                inner.history.pop_front();
                inner.evicted += 1;
            }
            inner.history.push_back(event);
        }
        self.notify();
    }

    /// Mark the buffer finished; readers drain and then end.
    pub fn close(&self) {
        {
            let mut inner = self.write();
            if inner.closed {
                return;
            }
            inner.closed = true;
        }
        self.notify();
    }

    /// Whether the writer has finished.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.read().closed
    }

    /// Total number of events ever appended.
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.read();
        inner.evicted + inner.history.len()
    }

    /// Whether nothing was ever appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the retained events.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ReplayEvent> {
        self.read().history.iter().cloned().collect()
    }

    /// Retained events at or after absolute `offset`, the next offset, and
    /// whether the buffer is closed.
    #[must_use]
    pub fn read_from(&self, offset: usize) -> (Vec<ReplayEvent>, usize, bool) {
        let inner = self.read();
        let start = offset.max(inner.evicted) - inner.evicted;
        let events: Vec<ReplayEvent> = inner.history.iter().skip(start).cloned().collect();
        (events, inner.evicted + inner.history.len(), inner.closed)
    }

    /// Stream every retained event from the beginning, then live appends,
    /// ending once the buffer is closed and drained.
    #[must_use]
    pub fn stream(self: &Arc<Self>) -> futures::stream::BoxStream<'static, ReplayEvent> {
        let rx = self.version.subscribe();
        let state = (Arc::clone(self), rx, 0_usize, VecDeque::new());

        futures::stream::unfold(state, |(buffer, mut rx, mut offset, mut pending)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((event, (buffer, rx, offset, pending)));
                }

                drop(rx.borrow_and_update());
                let (batch, next, closed) = buffer.read_from(offset);
                offset = next;
                if !batch.is_empty() {
                    pending.extend(batch);
                    continue;
                }
                if closed || rx.changed().await.is_err() {
                    return None;
                }
            }
        })
        .boxed()
    }
}
