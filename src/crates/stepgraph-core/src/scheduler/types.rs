//! Scheduler task types

use crate::dispatch::Dispatch;
use crate::graph::NodeId;
use crate::node::Suspension;
use crate::state::State;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepgraph_checkpoint::{InterruptToken, PendingNode};

/// How a call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The frontier emptied on its own
    Completed,
    /// The iteration guard forced termination during this call
    IterationLimit,
    /// A node suspended; the session is resumable
    Interrupted,
}

impl Termination {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Termination::Interrupted)
    }
}

/// Resume payload for a suspended node
#[derive(Debug, Clone)]
pub(crate) struct ResumeDirective {
    pub token: InterruptToken,
    pub payload: Value,
}

/// One scheduled node invocation
#[derive(Debug, Clone)]
pub(crate) struct Task {
    pub node: NodeId,
    pub state_override: Option<State>,
    pub resume: Option<ResumeDirective>,
}

impl Task {
    pub fn new(node: impl Into<NodeId>) -> Self {
        Self {
            node: node.into(),
            state_override: None,
            resume: None,
        }
    }

    pub fn dispatched(dispatch: Dispatch) -> Self {
        let (node, state_override) = dispatch.into_parts();
        Self {
            node,
            state_override: Some(state_override),
            resume: None,
        }
    }

    /// Rebuild a task from a stored pending node. Suspended nodes get `payload`.
    pub fn from_pending(pending: PendingNode, payload: &Value) -> Self {
        let resume = pending.interrupt.map(|token| ResumeDirective {
            token,
            payload: payload.clone(),
        });
        Self {
            node: pending.node,
            state_override: pending.state_override,
            resume,
        }
    }

    /// Pending-node record for a task that has not run yet
    pub fn to_pending(&self) -> PendingNode {
        let pending = PendingNode::new(self.node.clone());
        match &self.state_override {
            Some(o) => pending.with_override(o.clone()),
            None => pending,
        }
    }
}

/// Result of running one task
#[derive(Debug)]
pub(crate) enum TaskOutcome {
    Updated(State),
    Suspended(Suspension),
    Failed(String),
}
