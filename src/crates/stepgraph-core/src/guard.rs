//! Iteration guard
//!
//! Graphs in this crate are cyclic on purpose (a conversation loops back to the node
//! that listens for input), so termination rests on one counter. The guard owns a
//! state field; the scheduler adds one to it for every completed pass through a
//! *counted* node, and loop-back routers ask the guard before returning their target:
//!
//! ```rust
//! use stepgraph_core::{IterationGuard, Route, TerminalReason};
//! use serde_json::json;
//!
//! let guard = IterationGuard::new(3).counting("listen");
//!
//! let state = json!({"iteration_count": 2}).as_object().cloned().unwrap();
//! assert_eq!(guard.loop_back(&state, "listen"), Route::to("listen"));
//!
//! let state = json!({"iteration_count": 3}).as_object().cloned().unwrap();
//! assert_eq!(guard.loop_back(&state, "listen"), Route::Terminal(TerminalReason::IterationLimit));
//! ```
//!
//! The substitution happens on the superstep where the counter first equals the
//! ceiling: never earlier, never later.

use crate::dispatch::{Route, TerminalReason};
use crate::graph::NodeId;
use crate::state::State;
use serde_json::Value;
use std::collections::BTreeSet;

/// Default state field holding the counter
pub const DEFAULT_ITERATION_FIELD: &str = "iteration_count";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationGuard {
    field: String,
    ceiling: u64,
    counted: BTreeSet<NodeId>,
}

impl IterationGuard {
    pub fn new(ceiling: u64) -> Self {
        Self {
            field: DEFAULT_ITERATION_FIELD.to_string(),
            ceiling,
            counted: BTreeSet::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    /// Count every completed pass through `node`.
    pub fn counting(mut self, node: impl Into<NodeId>) -> Self {
        self.counted.insert(node.into());
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn counted_nodes(&self) -> impl Iterator<Item = &str> {
        self.counted.iter().map(String::as_str)
    }

    pub fn counts(&self, node: &str) -> bool {
        self.counted.contains(node)
    }

    /// Current counter value; missing or non-numeric reads as zero
    pub fn count(&self, state: &State) -> u64 {
        state.get(&self.field).and_then(Value::as_u64).unwrap_or(0)
    }

    pub fn reached(&self, state: &State) -> bool {
        self.count(state) >= self.ceiling
    }

    /// Route to `target` unless the ceiling has been reached.
    pub fn loop_back(&self, state: &State, target: impl Into<NodeId>) -> Route {
        self.gate(state, Route::to(target))
    }

    /// Replace any non-terminal route with termination once the ceiling is reached.
    pub fn gate(&self, state: &State, route: Route) -> Route {
        if route.is_terminal() || !self.reached(state) {
            return route;
        }
        tracing::debug!(
            field = %self.field,
            count = self.count(state),
            ceiling = self.ceiling,
            "Iteration ceiling reached, terminating"
        );
        Route::Terminal(TerminalReason::IterationLimit)
    }

    /// Write `base + passes` into the counter field.
    pub(crate) fn advance(&self, state: &mut State, base: u64, passes: u64) {
        state.insert(self.field.clone(), Value::from(base + passes));
    }

    pub(crate) fn reset(&self, state: &mut State) {
        state.insert(self.field.clone(), Value::from(0u64));
    }
}
