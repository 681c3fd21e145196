//! Task executor: runs a frontier with a bounded number of concurrent nodes.

use super::types::{Task, TaskOutcome};
use crate::graph::CompiledGraph;
use crate::node::{NodeOutput, ResumeInput};
use crate::state::{overlay, State};
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs node bodies and converts every failure into data.
///
/// No retries: a failed node is reported once and the scheduler moves on.
pub(crate) struct TaskExecutor {
    limit: Option<Arc<Semaphore>>,
}

impl TaskExecutor {
    /// `max_workers = None` lets the whole frontier run at once.
    pub fn new(max_workers: Option<usize>) -> Self {
        Self {
            limit: max_workers.map(|n| Arc::new(Semaphore::new(n.max(1)))),
        }
    }

    /// Execute every task against the committed state. Outcomes come back in task
    /// order regardless of completion order.
    pub async fn execute_all(
        &self,
        graph: &CompiledGraph,
        committed: &State,
        tasks: &[Task],
    ) -> Vec<TaskOutcome> {
        join_all(tasks.iter().map(|task| self.execute(graph, committed, task))).await
    }

    async fn execute(&self, graph: &CompiledGraph, committed: &State, task: &Task) -> TaskOutcome {
        let _permit = match &self.limit {
            Some(limit) => match limit.acquire().await {
                Ok(permit) => Some(permit),
                Err(_) => return TaskOutcome::Failed("worker pool closed".to_string()),
            },
            None => None,
        };

        let Some(kind) = graph.node(&task.node) else {
            return TaskOutcome::Failed(format!("node '{}' is not part of the graph", task.node));
        };
        let view = overlay(committed, task.state_override.as_ref());

        tracing::debug!(
            node = %task.node,
            resume = task.resume.is_some(),
            "Executing node"
        );

        let outcome = match &task.resume {
            Some(directive) => {
                let Some(resume) = kind.resume_fn() else {
                    return TaskOutcome::Failed(format!(
                        "node '{}' cannot be resumed",
                        task.node
                    ));
                };
                let input = ResumeInput {
                    state: view,
                    context: directive.token.context.clone(),
                    payload: directive.payload.clone(),
                };
                let resume = Arc::clone(resume);
                match AssertUnwindSafe(async move { resume(input).await })
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(update)) => TaskOutcome::Updated(update),
                    Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
                    Err(panic) => TaskOutcome::Failed(panic_message(panic)),
                }
            }
            None => {
                let run = Arc::clone(kind.run_fn());
                match AssertUnwindSafe(async move { run(view).await })
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(NodeOutput::Update(update))) => TaskOutcome::Updated(update),
                    Ok(Ok(NodeOutput::Suspend(suspension))) => {
                        if kind.resume_fn().is_some() {
                            TaskOutcome::Suspended(suspension)
                        } else {
                            TaskOutcome::Failed(format!(
                                "node '{}' suspended but is not interruptible",
                                task.node
                            ))
                        }
                    }
                    Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
                    Err(panic) => TaskOutcome::Failed(panic_message(panic)),
                }
            }
        };

        if let TaskOutcome::Failed(error) = &outcome {
            tracing::warn!(node = %task.node, error = %error, "Node failed");
        }
        outcome
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("node panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("node panicked: {}", msg)
    } else {
        "node panicked".to_string()
    }
}
