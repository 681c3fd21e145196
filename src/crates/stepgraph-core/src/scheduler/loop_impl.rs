//! Superstep loop

use super::executor::TaskExecutor;
use super::types::{Task, TaskOutcome, Termination};
use crate::dispatch::{Route, TerminalReason};
use crate::error::{GraphError, Result};
use crate::graph::CompiledGraph;
use crate::interrupt::InterruptController;
use crate::state::State;
use std::collections::{HashMap, HashSet};
use stepgraph_checkpoint::{Checkpoint, CheckpointSource, CheckpointStore, PendingNode};
use tracing::{debug, error, info, warn};

/// What a finished call hands back to the engine
#[derive(Debug)]
pub(crate) struct RunReport {
    pub checkpoint: Checkpoint,
    pub termination: Termination,
    pub supersteps: usize,
}

/// Merged result of one superstep
struct StepCommit {
    state: State,
    next: Vec<Task>,
    suspended: Vec<PendingNode>,
    limit_hit: bool,
}

pub(crate) struct Scheduler<'a> {
    graph: &'a CompiledGraph,
    store: &'a dyn CheckpointStore,
    executor: TaskExecutor,
    max_supersteps: usize,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        graph: &'a CompiledGraph,
        store: &'a dyn CheckpointStore,
        max_workers: Option<usize>,
        max_supersteps: usize,
    ) -> Self {
        Self {
            graph,
            store,
            executor: TaskExecutor::new(max_workers),
            max_supersteps,
        }
    }

    /// Run supersteps from `frontier` until the frontier empties or a node suspends.
    ///
    /// The checkpoint is saved after every superstep. On error nothing past the last
    /// successful save is persisted.
    pub async fn run(&self, mut checkpoint: Checkpoint, mut frontier: Vec<Task>) -> Result<RunReport> {
        let session_id = checkpoint.session_id.clone();
        let mut state = checkpoint.state.clone();
        let mut supersteps = 0;
        let mut limit_hit = false;

        loop {
            if frontier.is_empty() {
                let termination = if limit_hit {
                    Termination::IterationLimit
                } else {
                    Termination::Completed
                };
                info!(
                    session_id = %session_id,
                    supersteps,
                    version = checkpoint.version,
                    termination = ?termination,
                    "Run finished"
                );
                return Ok(RunReport {
                    checkpoint,
                    termination,
                    supersteps,
                });
            }

            if supersteps >= self.max_supersteps {
                error!(
                    session_id = %session_id,
                    max_supersteps = self.max_supersteps,
                    "Superstep limit exceeded"
                );
                return Err(GraphError::Execution(format!(
                    "run exceeded {} supersteps without terminating",
                    self.max_supersteps
                )));
            }
            supersteps += 1;
            let step = checkpoint.version + 1;

            debug!(
                session_id = %session_id,
                step,
                frontier = ?frontier.iter().map(|t| t.node.as_str()).collect::<Vec<_>>(),
                "Starting superstep"
            );

            let outcomes = self.executor.execute_all(self.graph, &state, &frontier).await;
            let commit = self.commit(&state, &frontier, outcomes, step)?;

            state = commit.state;
            limit_hit |= commit.limit_hit;
            let interrupted = !commit.suspended.is_empty();

            let mut pending = commit.suspended;
            pending.extend(commit.next.iter().map(Task::to_pending));
            checkpoint.advance(
                state.clone(),
                pending,
                self.graph.iteration_count(&state),
                CheckpointSource::Loop,
            );

            if let Err(e) = self.store.save(&session_id, checkpoint.clone()).await {
                error!(session_id = %session_id, step, error = %e, "Failed to save checkpoint");
                return Err(e.into());
            }

            if interrupted {
                info!(
                    session_id = %session_id,
                    step,
                    pending = ?checkpoint.pending_node_ids(),
                    "Run suspended"
                );
                return Ok(RunReport {
                    checkpoint,
                    termination: Termination::Interrupted,
                    supersteps,
                });
            }

            frontier = commit.next;
        }
    }

    /// Merge outcomes in frontier order, then route from every node that completed.
    fn commit(
        &self,
        committed: &State,
        frontier: &[Task],
        outcomes: Vec<TaskOutcome>,
        step: u64,
    ) -> Result<StepCommit> {
        let reducers = self.graph.reducers();
        let guard = self.graph.guard();

        let mut merged = committed.clone();
        let mut completed: Vec<&Task> = Vec::new();
        let mut suspended = Vec::new();
        let mut writers: HashMap<String, usize> = HashMap::new();
        let mut passes = 0u64;

        for (task, outcome) in frontier.iter().zip(outcomes) {
            match outcome {
                TaskOutcome::Updated(update) => match reducers.apply(&mut merged, &update) {
                    Ok(()) => {
                        for field in update.keys() {
                            *writers.entry(field.clone()).or_default() += 1;
                        }
                        if guard.is_some_and(|g| g.counts(&task.node)) {
                            passes += 1;
                        }
                        completed.push(task);
                    }
                    Err(e) => {
                        warn!(node = %task.node, error = %e, "Rejected node update");
                        self.record_error(&mut merged, e.to_string());
                    }
                },
                TaskOutcome::Failed(message) => self.record_error(&mut merged, message),
                TaskOutcome::Suspended(suspension) => {
                    suspended.push(InterruptController::suspend(task, step, suspension));
                }
            }
        }

        for (field, count) in &writers {
            if *count > 1
                && !reducers.is_co_reducible(field)
                && guard.map_or(true, |g| g.field() != field.as_str())
            {
                warn!(
                    field = %field,
                    writers = count,
                    reducer = reducers.reducer_name(field),
                    "Field written by several nodes in one superstep; last in frontier order wins"
                );
            }
        }

        if let Some(guard) = guard {
            if passes > 0 {
                guard.advance(&mut merged, guard.count(committed), passes);
            }
        }

        let mut next = Vec::new();
        let mut scheduled: HashSet<String> = HashSet::new();
        let mut limit_hit = false;

        for task in completed {
            for edge in self.graph.edges_from(&task.node) {
                let route = edge.resolve(&task.node, &merged).map_err(|e| {
                    error!(node = %task.node, error = %e, "Routing failed");
                    e
                })?;
                match route {
                    Route::Node(node) => {
                        if scheduled.insert(node.clone()) {
                            next.push(Task::new(node));
                        }
                    }
                    Route::Dispatch(dispatches) => {
                        next.extend(dispatches.into_iter().map(Task::dispatched));
                    }
                    Route::Terminal(TerminalReason::IterationLimit) => limit_hit = true,
                    Route::Terminal(TerminalReason::Completed) => {}
                }
            }
        }

        Ok(StepCommit {
            state: merged,
            next,
            suspended,
            limit_hit,
        })
    }

    /// Write a failure message through the error reducer, falling back to a plain
    /// insert if a custom reducer rejects it.
    fn record_error(&self, state: &mut State, message: String) {
        let reducers = self.graph.reducers();
        let update = reducers.error_update(message.clone());
        if reducers.apply(state, &update).is_err() {
            state.insert(reducers.error_field().to_string(), message.into());
        }
    }
}
