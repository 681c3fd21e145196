//! Node function contract
//!
//! A node receives a read-only snapshot of the state and returns a partial update.
//! Interruptible nodes may instead return [`NodeOutput::Suspend`]; the run pauses and,
//! once the caller supplies input, the node's *continuation* (a separate resume
//! function) runs with that input. The code before the suspend point is never run
//! again for that pass.

use crate::state::State;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Error type nodes may return; it becomes the state's error field
pub type NodeError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed future returned by node functions
pub type NodeFuture<T> = Pin<Box<dyn Future<Output = Result<T, NodeError>> + Send>>;

/// Node body: state snapshot in, output out
pub type NodeFn = Arc<dyn Fn(State) -> NodeFuture<NodeOutput> + Send + Sync>;

/// Continuation of an interruptible node
pub type ResumeFn = Arc<dyn Fn(ResumeInput) -> NodeFuture<State> + Send + Sync>;

/// What a node produced
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    /// Fields to change
    Update(State),
    /// Pause the run and wait for external input
    Suspend(Suspension),
}

impl From<State> for NodeOutput {
    fn from(update: State) -> Self {
        NodeOutput::Update(update)
    }
}

impl From<Suspension> for NodeOutput {
    fn from(suspension: Suspension) -> Self {
        NodeOutput::Suspend(suspension)
    }
}

/// Request to pause, with what the caller sees and what the continuation needs
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Suspension {
    /// Shown to the caller (e.g. `{"type": "waiting_for_input"}`)
    pub value: Value,
    /// Pre-suspend work handed to the continuation
    pub context: Value,
}

impl Suspension {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            context: Value::Null,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

/// Arguments of a continuation
#[derive(Debug, Clone)]
pub struct ResumeInput {
    /// Committed state at resume time (with the node's dispatch override, if any)
    pub state: State,
    /// [`Suspension::context`] saved when the node paused
    pub context: Value,
    /// Caller input injected as the result of the suspend call
    pub payload: Value,
}

/// How the scheduler runs a node
#[derive(Clone)]
pub(crate) enum NodeKind {
    Plain(NodeFn),
    Interruptible { run: NodeFn, resume: ResumeFn },
}

impl NodeKind {
    pub(crate) fn run_fn(&self) -> &NodeFn {
        match self {
            NodeKind::Plain(run) => run,
            NodeKind::Interruptible { run, .. } => run,
        }
    }

    pub(crate) fn resume_fn(&self) -> Option<&ResumeFn> {
        match self {
            NodeKind::Plain(_) => None,
            NodeKind::Interruptible { resume, .. } => Some(resume),
        }
    }
}

/// Wrap an async closure returning a partial update.
pub(crate) fn plain_node<F, Fut>(f: F) -> NodeFn
where
    F: Fn(State) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<State, NodeError>> + Send + 'static,
{
    Arc::new(move |state| {
        let fut = f(state);
        Box::pin(async move { fut.await.map(NodeOutput::Update) })
    })
}

pub(crate) fn suspendable_node<F, Fut>(f: F) -> NodeFn
where
    F: Fn(State) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<NodeOutput, NodeError>> + Send + 'static,
{
    Arc::new(move |state| Box::pin(f(state)))
}

pub(crate) fn resume_node<F, Fut>(f: F) -> ResumeFn
where
    F: Fn(ResumeInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<State, NodeError>> + Send + 'static,
{
    Arc::new(move |input| Box::pin(f(input)))
}
