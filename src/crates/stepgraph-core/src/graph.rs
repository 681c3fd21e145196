//! Graph definition: nodes, edges, and the immutable compiled form
//!
//! The topology is an explicit adjacency structure. Nodes live in a map keyed by id
//! (insertion order is kept for deterministic listings); edges live in a routing table
//! keyed by source node. Nothing is expressed as nested calls, so a run can stop
//! between any two supersteps and the guard is consulted at well-defined points.
//!
//! # Edges
//!
//! ```text
//! Static       A ──────────────► B            always fires
//! Conditional  A ──router(state)─┬─► B        one of the declared targets,
//!                                ├─► C        a list of dispatches,
//!                                └─► TERMINAL or termination
//! ```
//!
//! A conditional edge declares its valid targets up front. Whatever the router
//! returns at run time is checked against that set; anything else is a
//! [`GraphError::Routing`] naming the edge and the target.
//!
//! [`CompiledGraph`] is produced by [`StateGraph::compile`](crate::StateGraph::compile)
//! and never changes afterwards. Share it with `Arc` across every session.

use crate::dispatch::{Route, TerminalReason};
use crate::error::{GraphError, Result};
use crate::guard::IterationGuard;
use crate::node::NodeKind;
use crate::state::{ReducerRegistry, State};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Node identifier
pub type NodeId = String;

/// Pseudo-source used by `add_edge(START, entry)`
pub const START: &str = "__start__";

/// Sentinel target meaning "end the run"
pub const TERMINAL: &str = "__end__";

/// Routing function of a conditional edge. Must be pure.
pub type RouterFn = Arc<dyn Fn(&State) -> Route + Send + Sync>;

/// Outgoing edge of a node
#[derive(Clone)]
pub enum Edge {
    Static(NodeId),
    Conditional {
        router: RouterFn,
        valid_targets: BTreeSet<NodeId>,
    },
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Static(to) => f.debug_tuple("Static").field(to).finish(),
            Edge::Conditional { valid_targets, .. } => f
                .debug_struct("Conditional")
                .field("router", &"<function>")
                .field("valid_targets", valid_targets)
                .finish(),
        }
    }
}

impl Edge {
    /// Human-readable label used in diagnostics
    pub fn label(&self, from: &str) -> String {
        match self {
            Edge::Static(to) => format!("{} -> {}", from, to),
            Edge::Conditional { .. } => format!("{} -> ?", from),
        }
    }

    /// Evaluate the edge against the merged state and check the result.
    pub fn resolve(&self, from: &str, state: &State) -> Result<Route> {
        let (router, valid_targets) = match self {
            Edge::Static(to) => return Ok(Route::to(to.clone())),
            Edge::Conditional {
                router,
                valid_targets,
            } => (router, valid_targets),
        };

        let route = router(state);
        match &route {
            Route::Terminal(TerminalReason::IterationLimit) => {}
            Route::Terminal(TerminalReason::Completed) => {
                if !valid_targets.contains(TERMINAL) {
                    return Err(GraphError::routing(self.label(from), TERMINAL));
                }
            }
            Route::Node(_) | Route::Dispatch(_) => {
                if let Some(bad) = route
                    .targets()
                    .into_iter()
                    .find(|t| !valid_targets.contains(*t))
                {
                    return Err(GraphError::routing(self.label(from), bad));
                }
            }
        }
        Ok(route)
    }
}

/// Mutable graph under construction
#[derive(Clone, Default)]
pub(crate) struct Graph {
    pub(crate) nodes: HashMap<NodeId, NodeKind>,
    pub(crate) order: Vec<NodeId>,
    pub(crate) edges: HashMap<NodeId, Vec<Edge>>,
    pub(crate) entries: Vec<NodeId>,
    pub(crate) reducers: ReducerRegistry,
    pub(crate) guard: Option<IterationGuard>,
    pub(crate) initial_state: State,
    pub(crate) problems: Vec<String>,
}

impl Graph {
    fn exists(&self, node: &str) -> bool {
        self.nodes.contains_key(node)
    }

    /// Check structure. Cycles are allowed.
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        if let Some(problem) = self.problems.first() {
            return Err(problem.clone());
        }

        let entry = match self.entries.as_slice() {
            [] => return Err("graph has no entry node".to_string()),
            [entry] => entry,
            many => {
                return Err(format!(
                    "graph must have exactly one entry node, found {}: {}",
                    many.len(),
                    many.join(", ")
                ))
            }
        };
        if !self.exists(entry) {
            return Err(format!("entry node '{}' does not exist", entry));
        }

        for (from, edges) in &self.edges {
            if !self.exists(from) {
                return Err(format!("edge source '{}' does not exist", from));
            }
            for edge in edges {
                match edge {
                    Edge::Static(to) => {
                        if !self.exists(to) && to != TERMINAL {
                            return Err(format!("edge target '{}' does not exist", to));
                        }
                    }
                    Edge::Conditional { valid_targets, .. } => {
                        if valid_targets.is_empty() {
                            return Err(format!(
                                "conditional edge from '{}' declares no targets",
                                from
                            ));
                        }
                        for to in valid_targets {
                            if !self.exists(to) && to != TERMINAL {
                                return Err(format!(
                                    "conditional edge from '{}' declares unknown target '{}'",
                                    from, to
                                ));
                            }
                        }
                    }
                }
            }
        }

        if let Some(guard) = &self.guard {
            if let Some(node) = guard.counted_nodes().find(|n| !self.exists(n)) {
                return Err(format!("iteration guard counts unknown node '{}'", node));
            }
        }

        Ok(())
    }
}

/// Immutable, validated graph shared by every session
#[derive(Clone)]
pub struct CompiledGraph {
    graph: Graph,
    entry: NodeId,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("entry", &self.entry)
            .field("nodes", &self.graph.order)
            .field("edges", &self.graph.edges)
            .field("reducers", &self.graph.reducers)
            .field("guard", &self.graph.guard)
            .finish()
    }
}

impl CompiledGraph {
    pub(crate) fn new(graph: Graph) -> Result<Self> {
        graph.validate().map_err(GraphError::Validation)?;
        let entry = graph.entries[0].clone();
        Ok(Self { graph, entry })
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Node ids in insertion order
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.graph.order.iter().map(String::as_str)
    }

    pub fn contains(&self, node: &str) -> bool {
        self.graph.exists(node)
    }

    pub fn is_interruptible(&self, node: &str) -> bool {
        self.graph
            .nodes
            .get(node)
            .and_then(NodeKind::resume_fn)
            .is_some()
    }

    pub fn edges_from(&self, node: &str) -> &[Edge] {
        self.graph.edges.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn reducers(&self) -> &ReducerRegistry {
        &self.graph.reducers
    }

    pub fn guard(&self) -> Option<&IterationGuard> {
        self.graph.guard.as_ref()
    }

    /// State every fresh session starts from, before caller input is applied
    pub fn initial_state(&self) -> &State {
        &self.graph.initial_state
    }

    pub(crate) fn node(&self, node: &str) -> Option<&NodeKind> {
        self.graph.nodes.get(node)
    }

    /// Counter value recorded in checkpoints
    pub fn iteration_count(&self, state: &State) -> u64 {
        self.guard().map(|g| g.count(state)).unwrap_or(0)
    }
}
