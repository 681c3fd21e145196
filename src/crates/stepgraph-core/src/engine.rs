//! Caller-facing engine
//!
//! [`Engine`] pairs one immutable [`CompiledGraph`] with a [`CheckpointStore`] and
//! exposes the session operations: [`submit`](Engine::submit) starts or resumes a run,
//! [`inspect`](Engine::inspect) reads a session without advancing it, and
//! [`update_state`](Engine::update_state) patches a stored session between calls.
//!
//! # What `submit` does with a session
//!
//! | Stored checkpoint           | Frontier                          | Input                  |
//! |-----------------------------|-----------------------------------|------------------------|
//! | none                        | entry node                        | seeded into the state  |
//! | suspended node(s)           | pending nodes, continuations run  | resume payload         |
//! | pending nodes, no interrupt | pending nodes (re-entry)          | ignored                |
//! | terminal                    | entry node, per [`RestartPolicy`] | seeded into the state  |
//!
//! At most one call runs per session at a time; a second concurrent call for the
//! same session id fails with [`GraphError::SessionBusy`].
//!
//! ```rust
//! use std::sync::Arc;
//! use stepgraph_checkpoint::InMemoryCheckpointStore;
//! use stepgraph_core::{Engine, EngineConfig, NodeError, StateGraph, TERMINAL};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = StateGraph::new();
//! graph.add_node("count", |_state| async move {
//!     Ok::<_, NodeError>(json!({"counter": 1}).as_object().cloned().unwrap_or_default())
//! });
//! graph.set_entry("count");
//! graph.add_edge("count", TERMINAL);
//!
//! let engine = Engine::new(
//!     Arc::new(graph.compile()?),
//!     Arc::new(InMemoryCheckpointStore::new()),
//!     EngineConfig::default(),
//! )?;
//!
//! let result = engine.submit(None, json!({})).await?;
//! assert!(!result.resumable);
//! assert_eq!(result.state["counter"], json!(1));
//! # Ok(())
//! # }
//! ```

use crate::config::{EngineConfig, RestartPolicy};
use crate::error::{GraphError, Result};
use crate::graph::CompiledGraph;
use crate::interrupt::{InterruptController, PendingInterrupt};
use crate::scheduler::{RunReport, Scheduler, Task, Termination};
use crate::state::State;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stepgraph_checkpoint::{
    validate_session_id, Checkpoint, CheckpointSource, CheckpointStore, SessionSummary,
};
use tracing::{info, instrument, warn, Span};
use uuid::Uuid;

/// Result of [`Engine::submit`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub session_id: String,
    pub state: State,
    /// Whether the run is suspended waiting for external input
    pub resumable: bool,
    pub termination: Termination,
    /// Value shown by the suspended node, if any
    pub interrupt: Option<PendingInterrupt>,
    /// Latest non-null error field value
    pub error: Option<String>,
    /// Checkpoint version after this call
    pub version: u64,
    /// Supersteps executed by this call
    pub supersteps: usize,
}

/// Result of [`Engine::inspect`] and [`Engine::update_state`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectResult {
    pub session_id: String,
    pub state: State,
    pub resumable: bool,
    pub pending_nodes: Vec<String>,
    pub iteration_count: u64,
    pub version: u64,
    pub interrupt: Option<PendingInterrupt>,
    pub error: Option<String>,
}

/// Session registry entry released on drop
struct SessionLease {
    busy: Arc<Mutex<HashSet<String>>>,
    session_id: String,
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Ok(mut busy) = self.busy.lock() {
            busy.remove(&self.session_id);
        }
    }
}

/// Runs sessions of one compiled graph against one checkpoint store
#[derive(Clone)]
pub struct Engine {
    graph: Arc<CompiledGraph>,
    store: Arc<dyn CheckpointStore>,
    config: EngineConfig,
    busy: Arc<Mutex<HashSet<String>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("graph", &self.graph)
            .field("config", &self.config)
            .finish()
    }
}

/// Reject malformed ids as caller errors before they reach the store.
fn checked_session_id(session_id: &str) -> Result<&str> {
    validate_session_id(session_id).map_err(|e| GraphError::InvalidInput(e.to_string()))?;
    Ok(session_id)
}

impl Engine {
    pub fn new(
        graph: Arc<CompiledGraph>,
        store: Arc<dyn CheckpointStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            graph,
            store,
            config,
            busy: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start, resume or restart a session.
    ///
    /// Without `session_id` a new uuid is allocated. See the module docs for how the
    /// stored checkpoint decides what runs and what `input` means.
    #[instrument(skip(self, input), fields(session_id = tracing::field::Empty))]
    pub async fn submit(&self, session_id: Option<&str>, input: Value) -> Result<SubmitResult> {
        let session_id = match session_id {
            Some(id) => checked_session_id(id)?.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        Span::current().record("session_id", session_id.as_str());

        let _lease = self.lease(&session_id)?;
        let stored = self.store.load(&session_id).await?;

        let (checkpoint, frontier) = match stored {
            None => {
                info!("Starting new session");
                let state = self.seed(self.graph.initial_state().clone(), &input)?;
                let checkpoint = Checkpoint::new(session_id.clone(), state);
                (checkpoint, vec![Task::new(self.graph.entry())])
            }
            Some(checkpoint) if checkpoint.is_resumable() => {
                info!(
                    version = checkpoint.version,
                    pending = ?checkpoint.pending_node_ids(),
                    "Resuming suspended session"
                );
                let frontier =
                    InterruptController::new(&self.graph).resume_frontier(&checkpoint, &input)?;
                (checkpoint, frontier)
            }
            Some(checkpoint) if checkpoint.is_in_flight() => {
                warn!(
                    version = checkpoint.version,
                    pending = ?checkpoint.pending_node_ids(),
                    "Re-entering interrupted run; input is not applied"
                );
                let frontier = checkpoint
                    .pending_nodes
                    .iter()
                    .cloned()
                    .map(|pending| Task::from_pending(pending, &Value::Null))
                    .collect();
                (checkpoint, frontier)
            }
            Some(mut checkpoint) => {
                info!(
                    version = checkpoint.version,
                    policy = ?self.config.restart,
                    "Restarting terminated session"
                );
                let base = match self.config.restart {
                    RestartPolicy::ReuseState => {
                        let mut state = checkpoint.state.clone();
                        if let Some(guard) = self.graph.guard() {
                            guard.reset(&mut state);
                        }
                        state
                    }
                    RestartPolicy::Fresh => self.graph.initial_state().clone(),
                };
                checkpoint.state = self.seed(base, &input)?;
                checkpoint.source = CheckpointSource::Input;
                (checkpoint, vec![Task::new(self.graph.entry())])
            }
        };

        let report = self.scheduler().run(checkpoint, frontier).await?;
        Ok(self.submit_result(report))
    }

    /// Current state of a session. Never advances the run.
    #[instrument(skip(self))]
    pub async fn inspect(&self, session_id: &str) -> Result<InspectResult> {
        checked_session_id(session_id)?;
        let checkpoint = self
            .store
            .load(session_id)
            .await?
            .ok_or_else(|| GraphError::SessionNotFound(session_id.to_string()))?;
        Ok(self.inspect_result(&checkpoint))
    }

    /// Fold `patch` into a stored session through the reducers without running any
    /// node. Pending nodes, interrupt tokens and the iteration counter are kept.
    #[instrument(skip(self, patch))]
    pub async fn update_state(&self, session_id: &str, patch: Value) -> Result<InspectResult> {
        let patch = match patch {
            Value::Object(map) => map,
            other => {
                return Err(GraphError::InvalidInput(format!(
                    "state patch must be an object, got {}",
                    crate::state::json_kind(&other)
                )))
            }
        };
        if let Some(guard) = self.graph.guard() {
            if patch.contains_key(guard.field()) {
                return Err(GraphError::InvalidInput(format!(
                    "field '{}' is owned by the iteration guard",
                    guard.field()
                )));
            }
        }

        checked_session_id(session_id)?;
        let _lease = self.lease(session_id)?;
        let mut checkpoint = self
            .store
            .load(session_id)
            .await?
            .ok_or_else(|| GraphError::SessionNotFound(session_id.to_string()))?;

        let mut state = checkpoint.state.clone();
        self.graph
            .reducers()
            .apply(&mut state, &patch)
            .map_err(|e| GraphError::InvalidInput(e.to_string()))?;

        let pending = std::mem::take(&mut checkpoint.pending_nodes);
        let iteration_count = checkpoint.iteration_count;
        checkpoint.advance(state, pending, iteration_count, CheckpointSource::Update);
        self.store.save(session_id, checkpoint.clone()).await?;

        info!(version = checkpoint.version, fields = ?patch.keys().collect::<Vec<_>>(), "Updated session state");
        Ok(self.inspect_result(&checkpoint))
    }

    /// Remove a session. Returns whether it existed.
    #[instrument(skip(self))]
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        checked_session_id(session_id)?;
        let _lease = self.lease(session_id)?;
        Ok(self.store.delete(session_id).await?)
    }

    /// Drop sessions idle for longer than `ttl`. Returns how many were removed.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self, ttl: Duration) -> Result<usize> {
        let removed = self.store.sweep_expired(ttl).await?;
        if removed > 0 {
            info!(removed, "Swept expired sessions");
        }
        Ok(removed)
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        Ok(self.store.list_sessions().await?)
    }

    fn scheduler(&self) -> Scheduler<'_> {
        Scheduler::new(
            &self.graph,
            self.store.as_ref(),
            self.config.max_workers,
            self.config.max_supersteps,
        )
    }

    fn seed(&self, mut state: State, input: &Value) -> Result<State> {
        self.graph
            .reducers()
            .apply_value(&mut state, input)
            .map_err(|e| GraphError::InvalidInput(e.to_string()))?;
        Ok(state)
    }

    fn lease(&self, session_id: &str) -> Result<SessionLease> {
        let mut busy = self
            .busy
            .lock()
            .map_err(|_| GraphError::Execution("session registry lock poisoned".to_string()))?;
        if !busy.insert(session_id.to_string()) {
            warn!(session_id, "Rejected concurrent call");
            return Err(GraphError::SessionBusy(session_id.to_string()));
        }
        Ok(SessionLease {
            busy: self.busy.clone(),
            session_id: session_id.to_string(),
        })
    }

    fn submit_result(&self, report: RunReport) -> SubmitResult {
        let RunReport {
            checkpoint,
            termination,
            supersteps,
        } = report;
        SubmitResult {
            resumable: checkpoint.is_resumable(),
            interrupt: InterruptController::pending(&checkpoint),
            error: self.graph.reducers().latest_error(&checkpoint.state),
            version: checkpoint.version,
            termination,
            supersteps,
            session_id: checkpoint.session_id,
            state: checkpoint.state,
        }
    }

    fn inspect_result(&self, checkpoint: &Checkpoint) -> InspectResult {
        InspectResult {
            session_id: checkpoint.session_id.clone(),
            state: checkpoint.state.clone(),
            resumable: checkpoint.is_resumable(),
            pending_nodes: checkpoint
                .pending_node_ids()
                .into_iter()
                .map(str::to_string)
                .collect(),
            iteration_count: checkpoint.iteration_count,
            version: checkpoint.version,
            interrupt: InterruptController::pending(checkpoint),
            error: self.graph.reducers().latest_error(&checkpoint.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::StateGraph;
    use crate::graph::TERMINAL;
    use crate::node::NodeError;
    use serde_json::json;
    use stepgraph_checkpoint::InMemoryCheckpointStore;

    fn obj(v: Value) -> State {
        v.as_object().cloned().unwrap()
    }

    fn engine(config: EngineConfig) -> Engine {
        let mut graph = StateGraph::new();
        graph.add_node("visit", |s: State| async move {
            let visits = s.get("visits").and_then(Value::as_i64).unwrap_or(0);
            Ok::<_, NodeError>(obj(json!({"visits": visits + 1})))
        });
        graph.set_entry("visit");
        graph.add_finish("visit");
        graph.set_initial_state(obj(json!({"visits": 0})));
        Engine::new(
            Arc::new(graph.compile().unwrap()),
            Arc::new(InMemoryCheckpointStore::new()),
            config,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_malformed_session_id_is_not_retryable() {
        let engine = engine(EngineConfig::default());
        for result in [
            engine.inspect("bad/id").await.map(|_| ()),
            engine.update_state("bad/id", json!({"visits": 1})).await.map(|_| ()),
            engine.delete_session("").await.map(|_| ()),
            engine.submit(Some("bad id"), json!({})).await.map(|_| ()),
        ] {
            let err = result.unwrap_err();
            assert!(matches!(err, GraphError::InvalidInput(_)), "got {:?}", err);
            assert!(!err.is_retryable());
        }
    }

    #[tokio::test]
    async fn test_new_session_gets_uuid() {
        let result = engine(EngineConfig::default()).submit(None, json!({})).await.unwrap();
        assert!(Uuid::parse_str(&result.session_id).is_ok());
        assert_eq!(result.version, 1);
        assert_eq!(result.supersteps, 1);
        assert_eq!(result.termination, Termination::Completed);
    }

    #[tokio::test]
    async fn test_bad_session_id_and_input_rejected() {
        let engine = engine(EngineConfig::default());
        assert!(matches!(
            engine.submit(Some("../etc"), json!({})).await,
            Err(GraphError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.submit(Some("s1"), json!([1, 2])).await,
            Err(GraphError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_restart_policies() {
        let reuse = engine(EngineConfig::default());
        reuse.submit(Some("s"), json!({})).await.unwrap();
        let second = reuse.submit(Some("s"), json!({"note": "again"})).await.unwrap();
        assert_eq!(second.state["visits"], json!(2));
        assert_eq!(second.state["note"], json!("again"));
        assert_eq!(second.version, 2);

        let fresh = engine(EngineConfig::default().with_restart(RestartPolicy::Fresh));
        fresh.submit(Some("s"), json!({"note": "first"})).await.unwrap();
        let second = fresh.submit(Some("s"), json!({})).await.unwrap();
        assert_eq!(second.state["visits"], json!(1));
        assert!(second.state.get("note").is_none());
        assert_eq!(second.version, 2);
    }

    #[tokio::test]
    async fn test_inspect_unknown_session() {
        let engine = engine(EngineConfig::default());
        assert!(matches!(
            engine.inspect("nobody").await,
            Err(GraphError::SessionNotFound(id)) if id == "nobody"
        ));
    }

    #[tokio::test]
    async fn test_lease_is_exclusive_and_released() {
        let engine = engine(EngineConfig::default());
        let lease = engine.lease("s").unwrap();
        assert!(matches!(
            engine.submit(Some("s"), json!({})).await,
            Err(GraphError::SessionBusy(_))
        ));
        drop(lease);
        assert!(engine.submit(Some("s"), json!({})).await.is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut graph = StateGraph::new();
        graph.add_node("a", |_s| async move { Ok::<_, NodeError>(State::new()) });
        graph.set_entry("a");
        graph.add_edge("a", TERMINAL);
        let result = Engine::new(
            Arc::new(graph.compile().unwrap()),
            Arc::new(InMemoryCheckpointStore::new()),
            EngineConfig::default().with_max_workers(0),
        );
        assert!(matches!(result, Err(GraphError::Configuration(_))));
    }
}
