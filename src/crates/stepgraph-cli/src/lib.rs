//! # stepgraph-cli
//!
//! The palette-recoloring conversation workflow on top of `stepgraph-core`, with the
//! layered configuration used by the `stepgraph` binary.

pub mod config;
pub mod palette;
pub mod workflow;

use anyhow::{Context, Result};
use config::StepgraphConfig;
use std::path::Path;
use std::sync::Arc;
use stepgraph_checkpoint::FileCheckpointStore;
use stepgraph_core::Engine;

/// Build the workflow engine over a file store rooted at `store_dir`.
pub async fn open_engine(config: &StepgraphConfig, store_dir: &Path) -> Result<Engine> {
    let graph = workflow::build(config.workflow.max_chat_iterations)
        .context("Failed to build workflow graph")?;
    let store = FileCheckpointStore::open(store_dir)
        .await
        .with_context(|| format!("Failed to open session store {}", store_dir.display()))?;
    let engine = Engine::new(Arc::new(graph), Arc::new(store), config.engine.clone())?;
    Ok(engine)
}
