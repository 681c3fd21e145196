//! Error types for graph construction and execution
//!
//! Only faults that end a call are errors here. A node that fails while running is
//! not one of them: the scheduler records its message in the state's error field and
//! carries on with the sibling nodes. Reaching the iteration ceiling is not an error
//! either; it shows up as [`Termination::IterationLimit`](crate::Termination) on a
//! normal result.
//!
//! # Error Hierarchy
//!
//! ```text
//! GraphError
//! ├── Validation         - graph structure rejected at compile time
//! ├── Routing            - a router returned an undeclared target (fatal to the run)
//! ├── Checkpoint         - store load/save failed (fatal to the call, safe to retry)
//! ├── SessionNotFound    - inspect/update on an unknown session
//! ├── SessionBusy        - a second concurrent call for the same session
//! ├── InvalidInput       - caller input has the wrong shape
//! ├── InvalidResume      - checkpoint references a node that cannot be resumed
//! ├── Execution          - superstep backstop exceeded
//! └── Configuration      - engine configuration rejected
//! ```
//!
//! # Matching Errors
//!
//! ```rust
//! use stepgraph_core::GraphError;
//!
//! fn describe(err: &GraphError) -> String {
//!     match err {
//!         GraphError::Routing { edge, target } => {
//!             format!("fix the router on {}: '{}' is not a declared target", edge, target)
//!         }
//!         GraphError::Checkpoint(e) => format!("store unavailable, retry later: {}", e),
//!         other => other.to_string(),
//!     }
//! }
//! ```

use stepgraph_checkpoint::CheckpointError;
use thiserror::Error;

/// Convenience result type using [`GraphError`]
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors returned by graph compilation and engine calls
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph structure validation failed
    ///
    /// Raised by `StateGraph::compile` when an entry is missing or duplicated, an edge
    /// references an unknown node, or a conditional edge declares no targets.
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// A routing function returned a target outside its declared set
    ///
    /// This is a configuration fault. The run stops and the last saved checkpoint is
    /// left untouched.
    #[error("Routing error on edge '{edge}': '{target}' is not a declared target")]
    Routing {
        /// Label of the offending edge, e.g. `analyzer -> ?`
        edge: String,
        /// The identifier the router returned
        target: String,
    },

    /// Checkpoint store failure
    ///
    /// The call is aborted; the stored session stays at its last committed superstep,
    /// so the same call can be retried.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// No checkpoint exists for the session
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Another call is already running for the session
    #[error("Session '{0}' already has a run in progress")]
    SessionBusy(String),

    /// Caller input has the wrong shape
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A stored interrupt cannot be resumed by this graph
    #[error("Cannot resume node '{node}': {reason}")]
    InvalidResume {
        /// Node named by the stored token
        node: String,
        /// Why the resume was refused
        reason: String,
    },

    /// Execution aborted outside of any single node
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Engine configuration rejected
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GraphError {
    pub fn routing(edge: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Routing {
            edge: edge.into(),
            target: target.into(),
        }
    }

    pub fn invalid_resume(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResume {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Checkpoint(_) | Self::SessionBusy(_))
    }
}
