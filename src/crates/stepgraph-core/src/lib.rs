//! # stepgraph-core - Resumable, conditionally routed task graphs
//!
//! An execution engine for cyclic graphs of named nodes that drive a multi-turn
//! conversation. Nodes are opaque async functions over a shared JSON state; the engine
//! decides what runs when, merges what they return, and persists every step.
//!
//! ## Overview
//!
//! - **Supersteps** - the frontier runs concurrently against one committed snapshot,
//!   then all partial updates are merged in frontier order
//! - **Reducers** - per-field merge policy for fields several nodes write at once
//! - **Conditional routing** - routers return a node, a list of [`Dispatch`]es (fan-out
//!   with per-node state overrides) or termination, checked against declared targets
//! - **Interrupts** - an interruptible node suspends the run; the next call resumes its
//!   continuation with the caller's input, without re-running the code before the
//!   suspend point
//! - **Iteration guard** - a counter that replaces loop-backs with termination once a
//!   ceiling is reached, so cyclic graphs always halt
//! - **Checkpoints** - saved after every superstep through a
//!   [`CheckpointStore`](stepgraph_checkpoint::CheckpointStore)
//!
//! ## Execution Model
//!
//! ```text
//!  submit(session, input)
//!        │
//!        ▼
//!  load checkpoint ──► frontier ──► run nodes ──► merge (reducers) ──► route ──► save
//!                          ▲                                              │
//!                          └──────────── next frontier ◄──────────────────┘
//!                                              │
//!                     empty frontier: terminal │ node suspended: resumable
//!                                              ▼
//!                                        SubmitResult
//! ```
//!
//! A node that returns an error or panics contributes `{error: message}` instead of its
//! update; its siblings still commit and its own edges do not fire. A router returning
//! an undeclared target aborts the call with [`GraphError::Routing`]. A store failure
//! aborts the call with [`GraphError::Checkpoint`] and leaves the session at its last
//! saved superstep.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::{json, Value};
//! use stepgraph_checkpoint::InMemoryCheckpointStore;
//! use stepgraph_core::{
//!     Engine, EngineConfig, IterationGuard, NodeError, NodeOutput, ResumeInput,
//!     State, StateGraph, Suspension, Termination,
//! };
//!
//! fn obj(v: Value) -> State {
//!     v.as_object().cloned().unwrap_or_default()
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let guard = IterationGuard::new(2).counting("listen");
//! let loop_guard = guard.clone();
//!
//! let mut graph = StateGraph::new();
//! graph.add_interruptible_node(
//!     "listen",
//!     |state: State| async move {
//!         if state.get("iteration_count").and_then(Value::as_u64).unwrap_or(0) == 0 {
//!             Ok::<_, NodeError>(NodeOutput::Update(obj(json!({"greeted": true}))))
//!         } else {
//!             Ok(NodeOutput::Suspend(Suspension::new(json!({"type": "waiting_for_input"}))))
//!         }
//!     },
//!     |input: ResumeInput| async move {
//!         Ok::<_, NodeError>(obj(json!({"last_message": input.payload["message"]})))
//!     },
//! );
//! graph.set_entry("listen");
//! graph.add_conditional_edge("listen", move |s: &State| loop_guard.loop_back(s, "listen"), ["listen"]);
//! graph.set_iteration_guard(guard);
//!
//! let engine = Engine::new(
//!     Arc::new(graph.compile()?),
//!     Arc::new(InMemoryCheckpointStore::new()),
//!     EngineConfig::default(),
//! )?;
//!
//! let first = engine.submit(Some("demo"), json!({})).await?;
//! assert!(first.resumable);
//!
//! let second = engine.submit(Some("demo"), json!({"message": "hi"})).await?;
//! assert_eq!(second.termination, Termination::IterationLimit);
//! assert_eq!(second.state["last_message"], json!("hi"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`builder`] - [`StateGraph`] builder and compile-time validation
//! - [`graph`] - edges, [`CompiledGraph`], the [`START`]/[`TERMINAL`] sentinels
//! - [`dispatch`] - [`Route`], [`Dispatch`], [`TerminalReason`]
//! - [`node`] - node function contract, [`NodeOutput`], [`Suspension`], [`ResumeInput`]
//! - [`state`] - [`State`], [`Reducer`] implementations, [`ReducerRegistry`]
//! - [`guard`] - [`IterationGuard`]
//! - [`interrupt`] - interrupt tokens and resume frontiers
//! - [`intent`] - [`Intent`] labels and the static [`IntentTable`]
//! - [`engine`] - [`Engine`] with `submit`, `inspect`, `update_state`
//! - [`config`] - [`EngineConfig`], [`RestartPolicy`]
//! - [`error`] - [`GraphError`]

pub mod builder;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod graph;
pub mod guard;
pub mod intent;
pub mod interrupt;
pub mod node;
mod scheduler;
pub mod state;

pub use builder::StateGraph;
pub use config::{EngineConfig, RestartPolicy, DEFAULT_MAX_SUPERSTEPS};
pub use dispatch::{Dispatch, Route, TerminalReason};
pub use engine::{Engine, InspectResult, SubmitResult};
pub use error::{GraphError, Result};
pub use graph::{CompiledGraph, Edge, NodeId, RouterFn, START, TERMINAL};
pub use guard::{IterationGuard, DEFAULT_ITERATION_FIELD};
pub use intent::{Intent, IntentTable};
pub use interrupt::{InterruptToken, PendingInterrupt};
pub use node::{NodeError, NodeOutput, ResumeInput, Suspension};
pub use scheduler::Termination;
pub use state::{
    AppendReducer, MergeReducer, OverwriteReducer, PreferNonNullReducer, Reducer,
    ReducerRegistry, State, StateError, SumReducer, DEFAULT_ERROR_FIELD,
};
