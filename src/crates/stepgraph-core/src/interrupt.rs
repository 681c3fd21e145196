//! Interrupt controller: suspend a run inside a node and resume it later
//!
//! An interruptible node is registered as two functions: the body that runs up to
//! the suspend point, and the continuation that runs after it. When the body returns
//! [`NodeOutput::Suspend`](crate::NodeOutput::Suspend):
//!
//! 1. the scheduler commits the superstep for every other frontier node,
//! 2. the paused node is stored as a pending node carrying an [`InterruptToken`]
//!    (its `context` is whatever the body computed before suspending),
//! 3. the call returns with `resumable = true`.
//!
//! On the next `submit` for that session the caller's input becomes the resume
//! payload and only the continuation runs:
//!
//! ```text
//!   submit #1                       submit #2 (payload)
//!   ─────────                       ───────────────────
//!   body(state) ─► Suspend(ctx)     resume(state, ctx, payload) ─► update
//!        │                                   ▲
//!        └──── checkpoint: pending = [node + token(ctx)] ────┘
//! ```
//!
//! The body is never re-run for the suspended pass, so side effects before the suspend
//! point happen once. A token is consumed by the first superstep that resumes it; the
//! checkpoint saved at the end of that superstep no longer holds it, so a stale token
//! can never be replayed.

use crate::error::{GraphError, Result};
use crate::graph::CompiledGraph;
use crate::node::Suspension;
use crate::scheduler::Task;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepgraph_checkpoint::{Checkpoint, PendingNode};
use uuid::Uuid;

pub use stepgraph_checkpoint::InterruptToken;

/// Caller-visible view of a pending interrupt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInterrupt {
    pub token_id: Uuid,
    pub node: String,
    pub value: Value,
}

impl From<&InterruptToken> for PendingInterrupt {
    fn from(token: &InterruptToken) -> Self {
        Self {
            token_id: token.id,
            node: token.node.clone(),
            value: token.value.clone(),
        }
    }
}

pub(crate) struct InterruptController<'a> {
    graph: &'a CompiledGraph,
}

impl<'a> InterruptController<'a> {
    pub fn new(graph: &'a CompiledGraph) -> Self {
        Self { graph }
    }

    /// Pending-node record for a task that suspended during superstep `step`.
    pub fn suspend(task: &Task, step: u64, suspension: Suspension) -> PendingNode {
        let token = InterruptToken::new(task.node.clone(), step, suspension.value, suspension.context);
        tracing::info!(
            node = %task.node,
            step,
            token = %token.id,
            "Node suspended"
        );
        let pending = PendingNode::suspended(token);
        match &task.state_override {
            Some(o) => pending.with_override(o.clone()),
            None => pending,
        }
    }

    /// Frontier for resuming `checkpoint` with `payload`.
    ///
    /// Every suspended node receives the same payload; non-suspended pending nodes are
    /// scheduled as ordinary tasks.
    pub fn resume_frontier(&self, checkpoint: &Checkpoint, payload: &Value) -> Result<Vec<Task>> {
        for pending in &checkpoint.pending_nodes {
            if !self.graph.contains(&pending.node) {
                return Err(GraphError::invalid_resume(
                    &pending.node,
                    "node is not part of this graph",
                ));
            }
            if pending.is_suspended() && !self.graph.is_interruptible(&pending.node) {
                return Err(GraphError::invalid_resume(
                    &pending.node,
                    "node has no continuation",
                ));
            }
        }
        for token in checkpoint.interrupts() {
            tracing::info!(node = %token.node, token = %token.id, "Resuming suspended node");
        }
        Ok(checkpoint
            .pending_nodes
            .iter()
            .cloned()
            .map(|pending| Task::from_pending(pending, payload))
            .collect())
    }

    /// First pending interrupt, as shown to callers
    pub fn pending(checkpoint: &Checkpoint) -> Option<PendingInterrupt> {
        checkpoint.interrupts().next().map(PendingInterrupt::from)
    }
}
