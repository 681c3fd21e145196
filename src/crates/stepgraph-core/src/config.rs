//! Engine configuration

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};

/// Default backstop on supersteps per call
pub const DEFAULT_MAX_SUPERSTEPS: usize = 64;

/// What `submit` does with a session whose previous run already terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Keep the session's state, reset the iteration counter, fold the new input in
    #[default]
    ReuseState,
    /// Start over from the graph's initial state plus the new input
    Fresh,
}

/// Runtime knobs for [`Engine`](crate::Engine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool bound per superstep (`None` = whole frontier at once)
    pub max_workers: Option<usize>,

    /// Hard limit on supersteps in one call. Not the iteration guard: hitting it is
    /// an execution error.
    pub max_supersteps: usize,

    pub restart: RestartPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            max_supersteps: DEFAULT_MAX_SUPERSTEPS,
            restart: RestartPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    pub fn with_max_supersteps(mut self, max_supersteps: usize) -> Self {
        self.max_supersteps = max_supersteps;
        self
    }

    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == Some(0) {
            return Err(GraphError::Configuration(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.max_supersteps == 0 {
            return Err(GraphError::Configuration(
                "max_supersteps must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
