//! Builder API for graphs
//!
//! [`StateGraph`] collects nodes, edges, reducers and the iteration guard, then
//! [`compile`](StateGraph::compile) validates everything at once and returns an
//! immutable [`CompiledGraph`].
//!
//! ```rust
//! use stepgraph_core::{NodeError, State, StateGraph, TERMINAL};
//! use serde_json::json;
//!
//! fn bump(state: State) -> Result<State, NodeError> {
//!     let n = state.get("counter").and_then(|v| v.as_i64()).unwrap_or(0);
//!     Ok(json!({"counter": n + 1}).as_object().cloned().unwrap_or_default())
//! }
//!
//! let mut graph = StateGraph::new();
//! graph.add_node("bump", |state| async move { bump(state) });
//! graph.set_entry("bump");
//! graph.add_edge("bump", TERMINAL);
//!
//! let compiled = graph.compile().unwrap();
//! assert_eq!(compiled.entry(), "bump");
//! ```

use crate::dispatch::Route;
use crate::error::Result;
use crate::graph::{CompiledGraph, Edge, Graph, NodeId, START, TERMINAL};
use crate::guard::IterationGuard;
use crate::node::{
    plain_node, resume_node, suspendable_node, NodeError, NodeKind, NodeOutput, ResumeInput,
};
use crate::state::{Reducer, State};
use std::future::Future;
use std::sync::Arc;

/// Graph builder
#[derive(Default)]
pub struct StateGraph {
    graph: Graph,
}

impl StateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_node(&mut self, id: NodeId, kind: NodeKind) {
        if id == START || id == TERMINAL {
            self.graph
                .problems
                .push(format!("'{}' is reserved and cannot be a node id", id));
            return;
        }
        if self.graph.nodes.contains_key(&id) {
            self.graph
                .problems
                .push(format!("node '{}' is defined twice", id));
            return;
        }
        self.graph.order.push(id.clone());
        self.graph.nodes.insert(id, kind);
    }

    /// Add a node returning a partial update.
    pub fn add_node<F, Fut>(&mut self, id: impl Into<NodeId>, node: F) -> &mut Self
    where
        F: Fn(State) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<State, NodeError>> + Send + 'static,
    {
        self.insert_node(id.into(), NodeKind::Plain(plain_node(node)));
        self
    }

    /// Add a node that may suspend the run.
    ///
    /// `run` either returns an update or [`NodeOutput::Suspend`]. When the caller later
    /// resumes, only `resume` is invoked: it receives the suspension context saved by
    /// `run` and the caller's payload, and returns the node's update for that pass.
    pub fn add_interruptible_node<F, Fut, R, RFut>(
        &mut self,
        id: impl Into<NodeId>,
        run: F,
        resume: R,
    ) -> &mut Self
    where
        F: Fn(State) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<NodeOutput, NodeError>> + Send + 'static,
        R: Fn(ResumeInput) -> RFut + Send + Sync + 'static,
        RFut: Future<Output = std::result::Result<State, NodeError>> + Send + 'static,
    {
        let kind = NodeKind::Interruptible {
            run: suspendable_node(run),
            resume: resume_node(resume),
        };
        self.insert_node(id.into(), kind);
        self
    }

    /// Add a static edge. `add_edge(START, node)` sets the entry node.
    pub fn add_edge(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> &mut Self {
        let from = from.into();
        let to = to.into();
        if from == START {
            return self.set_entry(to);
        }
        self.graph.edges.entry(from).or_default().push(Edge::Static(to));
        self
    }

    /// Add a conditional edge whose router may only return `valid_targets`
    /// (node ids or [`TERMINAL`]).
    pub fn add_conditional_edge<F, I, T>(
        &mut self,
        from: impl Into<NodeId>,
        router: F,
        valid_targets: I,
    ) -> &mut Self
    where
        F: Fn(&State) -> Route + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
        T: Into<NodeId>,
    {
        let edge = Edge::Conditional {
            router: Arc::new(router),
            valid_targets: valid_targets.into_iter().map(Into::into).collect(),
        };
        self.graph.edges.entry(from.into()).or_default().push(edge);
        self
    }

    pub fn set_entry(&mut self, node: impl Into<NodeId>) -> &mut Self {
        let node = node.into();
        if !self.graph.entries.contains(&node) {
            self.graph.entries.push(node);
        }
        self
    }

    /// Shorthand for `add_edge(node, TERMINAL)`
    pub fn add_finish(&mut self, node: impl Into<NodeId>) -> &mut Self {
        self.add_edge(node, TERMINAL)
    }

    pub fn register_reducer(
        &mut self,
        field: impl Into<String>,
        reducer: impl Reducer + 'static,
    ) -> &mut Self {
        self.graph.reducers.register(field, reducer);
        self
    }

    /// Rename the field failing nodes write their message into (default `error`).
    pub fn set_error_field(&mut self, field: impl Into<String>) -> &mut Self {
        self.graph.reducers.set_error_field(field);
        self
    }

    pub fn set_iteration_guard(&mut self, guard: IterationGuard) -> &mut Self {
        self.graph.guard = Some(guard);
        self
    }

    /// Fields every fresh session starts with
    pub fn set_initial_state(&mut self, state: State) -> &mut Self {
        self.graph.initial_state = state;
        self
    }

    /// Validate and freeze the graph.
    pub fn compile(self) -> Result<CompiledGraph> {
        let compiled = CompiledGraph::new(self.graph)?;
        tracing::debug!(
            entry = compiled.entry(),
            nodes = compiled.node_ids().count(),
            "Compiled graph"
        );
        Ok(compiled)
    }
}
