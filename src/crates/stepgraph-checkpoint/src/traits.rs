//! Store contract for session checkpoints

use crate::{
    checkpoint::{Checkpoint, SessionSummary},
    error::Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Keyed persistence of a session's last committed checkpoint.
///
/// Implementations must be thread-safe (`Send + Sync`) so one store can serve many
/// sessions concurrently. Per session the contract is last-write-wins; the engine
/// never issues two concurrent saves for the same session id.
///
/// ## Example: custom backend
///
/// ```rust,no_run
/// use stepgraph_checkpoint::{Checkpoint, CheckpointStore, SessionSummary};
/// use async_trait::async_trait;
/// use std::time::Duration;
///
/// struct RedisStore;
///
/// #[async_trait]
/// impl CheckpointStore for RedisStore {
///     async fn load(&self, _session_id: &str) -> stepgraph_checkpoint::Result<Option<Checkpoint>> {
///         // GET checkpoint:{session_id} and decode
///         Ok(None)
///     }
///     async fn save(&self, _session_id: &str, _checkpoint: Checkpoint) -> stepgraph_checkpoint::Result<()> {
///         Ok(())
///     }
///     async fn delete(&self, _session_id: &str) -> stepgraph_checkpoint::Result<bool> {
///         Ok(false)
///     }
///     async fn list_sessions(&self) -> stepgraph_checkpoint::Result<Vec<SessionSummary>> {
///         Ok(Vec::new())
///     }
///     async fn sweep_expired(&self, _ttl: Duration) -> stepgraph_checkpoint::Result<usize> {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Fetch the checkpoint for a session; `Ok(None)` when the session is unknown.
    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>>;

    /// Replace the checkpoint for a session.
    async fn save(&self, session_id: &str, checkpoint: Checkpoint) -> Result<()>;

    /// Remove a session. Returns whether anything was removed.
    async fn delete(&self, session_id: &str) -> Result<bool>;

    /// Summaries of every stored session, ordered by session id.
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>>;

    /// Drop sessions whose last save is older than `ttl`. Returns the number removed.
    async fn sweep_expired(&self, ttl: Duration) -> Result<usize>;
}

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        (**self).load(session_id).await
    }

    async fn save(&self, session_id: &str, checkpoint: Checkpoint) -> Result<()> {
        (**self).save(session_id, checkpoint).await
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        (**self).delete(session_id).await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        (**self).list_sessions().await
    }

    async fn sweep_expired(&self, ttl: Duration) -> Result<usize> {
        (**self).sweep_expired(ttl).await
    }
}

/// Cutoff timestamp for a TTL sweep
pub(crate) fn expiry_cutoff(ttl: Duration) -> chrono::DateTime<chrono::Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| chrono::Utc::now().checked_sub_signed(ttl))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC)
}

/// Reject a save whose payload belongs to another session.
pub(crate) fn check_key(session_id: &str, checkpoint: &Checkpoint) -> Result<()> {
    if checkpoint.session_id != session_id {
        return Err(crate::error::CheckpointError::invalid(format!(
            "checkpoint for session '{}' saved under key '{}'",
            checkpoint.session_id, session_id
        )));
    }
    checkpoint.validate()
}
