//! In-memory checkpoint storage
//!
//! [`InMemoryCheckpointStore`] keeps one [`Checkpoint`] per session in an
//! `Arc<RwLock<HashMap>>`. Clones share the same map, so a store can be handed to
//! several engines in the same process. Contents are lost when the process exits; use
//! [`FileCheckpointStore`](crate::FileCheckpointStore) when sessions must survive a
//! restart.
//!
//! ```rust
//! use stepgraph_checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore, StateMap};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryCheckpointStore::new();
//! store.save("s-1", Checkpoint::new("s-1", StateMap::new())).await?;
//! assert!(store.load("s-1").await?.is_some());
//! # Ok(())
//! # }
//! ```

use crate::{
    checkpoint::{validate_session_id, Checkpoint, SessionSummary},
    error::Result,
    traits::{check_key, expiry_cutoff, CheckpointStore},
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

type SessionStorage = Arc<RwLock<HashMap<String, Checkpoint>>>;

/// Thread-safe in-memory checkpoint store
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    storage: SessionStorage,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions currently held
    pub async fn session_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Drop every session (test isolation)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        validate_session_id(session_id)?;
        Ok(self.storage.read().await.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, checkpoint: Checkpoint) -> Result<()> {
        validate_session_id(session_id)?;
        check_key(session_id, &checkpoint)?;
        self.storage
            .write()
            .await
            .insert(session_id.to_string(), checkpoint);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        validate_session_id(session_id)?;
        Ok(self.storage.write().await.remove(session_id).is_some())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let storage = self.storage.read().await;
        let mut sessions: Vec<SessionSummary> = storage.values().map(Checkpoint::summary).collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(sessions)
    }

    async fn sweep_expired(&self, ttl: Duration) -> Result<usize> {
        let cutoff = expiry_cutoff(ttl);
        let mut storage = self.storage.write().await;
        let before = storage.len();
        storage.retain(|_, cp| cp.updated_at >= cutoff);
        let removed = before - storage.len();
        if removed > 0 {
            tracing::info!(removed, "Swept expired sessions");
        }
        Ok(removed)
    }
}
