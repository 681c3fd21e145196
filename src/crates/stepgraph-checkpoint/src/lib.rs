//! # stepgraph-checkpoint - Session persistence for stepgraph
//!
//! Checkpoint types and the [`CheckpointStore`] contract used by `stepgraph-core` to
//! persist a session between supersteps and across process restarts.
//!
//! ## Overview
//!
//! A [`Checkpoint`] holds one session's committed state, the nodes still pending
//! (with any [`InterruptToken`] of a suspended node), the iteration counter and a
//! version that grows by one per save. Stores only keep the latest checkpoint per
//! session: last write wins.
//!
//! ## Stores
//!
//! - [`InMemoryCheckpointStore`] - `Arc<RwLock<HashMap>>`, for tests and single-process use
//! - [`FileCheckpointStore`] - one document per session in a directory, atomic replace
//!
//! Any other backend implements [`CheckpointStore`]: `load`, `save`, `delete`,
//! `list_sessions` and `sweep_expired`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stepgraph_checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, StateMap};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = FileCheckpointStore::open("/tmp/stepgraph-sessions").await?;
//!     store.save("session-1", Checkpoint::new("session-1", StateMap::new())).await?;
//!
//!     if let Some(cp) = store.load("session-1").await? {
//!         println!("version {} pending {:?}", cp.version, cp.pending_node_ids());
//!     }
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod error;
pub mod file;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use checkpoint::{
    validate_session_id, Checkpoint, CheckpointSource, InterruptToken, PendingNode,
    SessionId, SessionSummary, StateMap, CURRENT_FORMAT,
};
pub use error::{CheckpointError, Result};
pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;
pub use serializer::{BincodeSerializer, JsonSerializer, SerializerProtocol};
pub use traits::CheckpointStore;
