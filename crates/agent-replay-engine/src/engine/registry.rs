//! Registry of in-memory replays.

use std::{collections::HashMap, sync::Arc};

use agent_replay_core::ReplayId;
use tokio::sync::RwLock;

use super::controller::ReplayController;
use crate::error::{ReplayError, Result};

#[derive(Clone, Default)]
pub(crate) struct ReplayRegistry {
    replays: Arc<RwLock<HashMap<ReplayId, Arc<ReplayController>>>>,
}

impl ReplayRegistry {
    /// Register `controller` unless `limit` non-terminal replays already exist.
    /// The check and the insert happen under one lock.
    pub(crate) async fn insert_within_limit(
        &self,
        controller: Arc<ReplayController>,
        limit: usize,
    ) -> Result<()> {
        let mut replays = self.replays.write().await;
        let active = replays
            .values()
            .filter(|c| !c.status().is_terminal())
            .count();
        if active >= limit {
            return Err(ReplayError::CapacityReached { limit });
        }
        replays.insert(controller.id(), controller);
        Ok(())
    }

    pub(crate) async fn get(&self, id: ReplayId) -> Option<Arc<ReplayController>> {
        self.replays.read().await.get(&id).cloned()
    }

    pub(crate) async fn remove(&self, id: ReplayId) -> Option<Arc<ReplayController>> {
        self.replays.write().await.remove(&id)
    }

    pub(crate) async fn all(&self) -> Vec<Arc<ReplayController>> {
        self.replays.read().await.values().cloned().collect()
    }
}
