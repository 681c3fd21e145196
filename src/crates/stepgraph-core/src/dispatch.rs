//! Routing results: single targets, fan-out dispatches, and termination
//!
//! A conditional edge's router returns a [`Route`]:
//!
//! - [`Route::Node`] - run one node next
//! - [`Route::Dispatch`] - run several nodes in the next superstep, each seeing the
//!   committed state with its own [`Dispatch::state_override`] written on top
//! - [`Route::Terminal`] - this edge contributes nothing; the run ends once every
//!   evaluated edge agrees
//!
//! ```rust
//! use stepgraph_core::{Dispatch, Route, TERMINAL};
//! use serde_json::json;
//!
//! let fan_out = Route::from(vec![
//!     Dispatch::new("image_agent", json!({"user_intent": "upload_image"})),
//!     Dispatch::new("palette_agent", json!({"user_intent": "set_palette"})),
//! ]);
//! assert_eq!(fan_out.targets(), vec!["image_agent", "palette_agent"]);
//!
//! assert!(Route::from(TERMINAL).is_terminal());
//! ```

use crate::graph::{NodeId, TERMINAL};
use crate::state::State;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fan-out directive: run `target` with `state_override` layered over the committed state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    target: NodeId,
    state_override: State,
}

impl Dispatch {
    /// Create a dispatch. A non-object `state_override` is treated as no override.
    pub fn new(target: impl Into<NodeId>, state_override: Value) -> Self {
        let state_override = match state_override {
            Value::Object(map) => map,
            _ => State::new(),
        };
        Self {
            target: target.into(),
            state_override,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state_override(&self) -> &State {
        &self.state_override
    }

    pub fn into_parts(self) -> (NodeId, State) {
        (self.target, self.state_override)
    }
}

/// Why an edge ended the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// The router chose to stop
    Completed,
    /// The iteration guard replaced a loop-back with termination
    IterationLimit,
}

/// Outcome of evaluating one edge
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Node(NodeId),
    Dispatch(Vec<Dispatch>),
    Terminal(TerminalReason),
}

impl Route {
    pub fn to(node: impl Into<NodeId>) -> Self {
        Route::from(node.into())
    }

    pub fn terminal() -> Self {
        Route::Terminal(TerminalReason::Completed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Route::Terminal(_))
    }

    /// Target node ids in order (dispatches keep duplicates)
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Route::Node(node) => vec![node.as_str()],
            Route::Dispatch(dispatches) => dispatches.iter().map(Dispatch::target).collect(),
            Route::Terminal(_) => Vec::new(),
        }
    }
}

impl From<NodeId> for Route {
    fn from(node: NodeId) -> Self {
        if node == TERMINAL {
            Route::terminal()
        } else {
            Route::Node(node)
        }
    }
}

impl From<&str> for Route {
    fn from(node: &str) -> Self {
        Route::from(node.to_string())
    }
}

impl From<Vec<Dispatch>> for Route {
    fn from(dispatches: Vec<Dispatch>) -> Self {
        Route::Dispatch(dispatches)
    }
}

impl From<Dispatch> for Route {
    fn from(dispatch: Dispatch) -> Self {
        Route::Dispatch(vec![dispatch])
    }
}
