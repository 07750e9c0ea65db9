//! Participant sessions: stage machine, per-run state, and the engine
//! that drives them.

pub mod engine;
pub mod run;
pub mod stage;

use engine::SessionEngine;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Registry of live session runs.
#[derive(Clone, Default)]
pub struct RunRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Arc<SessionEngine>>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, engine: Arc<SessionEngine>) {
        self.inner.write().await.insert(engine.run_id, engine);
    }

    pub async fn get(&self, run_id: Uuid) -> Option<Arc<SessionEngine>> {
        self.inner.read().await.get(&run_id).cloned()
    }

    /// Remove a run and stop its background tasks.
    pub async fn remove(&self, run_id: Uuid) -> Option<Arc<SessionEngine>> {
        let engine = self.inner.write().await.remove(&run_id);
        if let Some(engine) = &engine {
            engine.shutdown().await;
        }
        engine
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
