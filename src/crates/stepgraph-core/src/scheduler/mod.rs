//! Superstep scheduler
//!
//! Each superstep runs the whole frontier, merges the partial updates in frontier
//! order through the reducer registry, evaluates the outgoing edges of every node that
//! completed, and saves a checkpoint whose pending nodes are the next frontier.
//!
//! ```text
//!   frontier ──► execute (bounded, concurrent) ──► merge ──► route ──► save
//!       ▲                                                              │
//!       └──────────────────── next frontier (non-empty) ◄──────────────┘
//! ```
//!
//! A node that fails contributes `{error: message}` instead of its update and its
//! edges do not fire. A node that suspends is recorded as a pending node carrying an
//! interrupt token; the superstep is still committed for its siblings and the call
//! returns.

mod executor;
mod loop_impl;
mod types;

pub(crate) use loop_impl::{RunReport, Scheduler};
pub(crate) use types::Task;
pub use types::Termination;
