//! Layered configuration
//!
//! Sources, later ones overriding earlier ones field by field:
//! 1. Default values
//! 2. User-level config: ~/.stepgraph/stepgraph.toml
//! 3. Project-level config: ./.stepgraph/stepgraph.toml
//! 4. An explicit `--config` file (must exist)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stepgraph_core::EngineConfig;
use tokio::fs;
use tracing::debug;

const CONFIG_DIR: &str = ".stepgraph";
const CONFIG_FILE: &str = "stepgraph.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepgraphConfig {
    pub engine: EngineConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Checkpoint directory
    pub dir: PathBuf,
    /// Sessions idle longer than this are removed by `sweep`
    pub ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(CONFIG_DIR).join("sessions"),
            ttl_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Chat turns before the conversation is closed with `iteration_limit`
    pub max_chat_iterations: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_chat_iterations: 10,
        }
    }
}

/// Finds and merges config files
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
    project_config_path: PathBuf,
    explicit_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            user_config_path: dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE)),
            project_config_path: PathBuf::from(CONFIG_DIR).join(CONFIG_FILE),
            explicit_path: None,
        }
    }

    /// Loader reading only the given layers; used by tests and embedding callers
    pub fn with_paths(user: Option<PathBuf>, project: PathBuf) -> Self {
        Self {
            user_config_path: user,
            project_config_path: project,
            explicit_path: None,
        }
    }

    pub fn with_explicit(mut self, path: Option<PathBuf>) -> Self {
        self.explicit_path = path;
        self
    }

    pub fn user_config_path(&self) -> Option<&Path> {
        self.user_config_path.as_deref()
    }

    pub fn project_config_path(&self) -> &Path {
        &self.project_config_path
    }

    /// Merge every present layer over the defaults.
    pub async fn load(&self) -> Result<StepgraphConfig> {
        let mut merged = toml::Table::new();

        for path in self.user_config_path.iter().chain([&self.project_config_path]) {
            match read_table(path).await? {
                Some(layer) => {
                    debug!(path = %path.display(), "Loaded config layer");
                    merge_tables(&mut merged, layer);
                }
                None => debug!(path = %path.display(), "Config layer not found"),
            }
        }

        if let Some(path) = &self.explicit_path {
            let Some(layer) = read_table(path).await? else {
                bail!("Config file not found: {}", path.display());
            };
            debug!(path = %path.display(), "Loaded explicit config");
            merge_tables(&mut merged, layer);
        }

        let config: StepgraphConfig = toml::Value::Table(merged)
            .try_into()
            .context("Invalid configuration")?;
        config
            .engine
            .validate()
            .context("Invalid [engine] configuration")?;
        if config.workflow.max_chat_iterations == 0 {
            bail!("workflow.max_chat_iterations must be at least 1");
        }
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_table(path: &Path) -> Result<Option<toml::Table>> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let table = toml::from_str::<toml::Table>(&content)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    Ok(Some(table))
}

/// Recursively overlay `layer` onto `base`; nested tables merge, other values replace.
fn merge_tables(base: &mut toml::Table, layer: toml::Table) {
    for (key, value) in layer {
        if let toml::Value::Table(incoming) = value {
            if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                merge_tables(existing, incoming);
                continue;
            }
            base.insert(key, toml::Value::Table(incoming));
        } else {
            base.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepgraph_core::RestartPolicy;
    use tempfile::TempDir;

    async fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_defaults_when_no_files() {
        let dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_paths(None, dir.path().join("missing.toml"));
        let config = loader.load().await.unwrap();

        assert_eq!(config, StepgraphConfig::default());
        assert_eq!(config.workflow.max_chat_iterations, 10);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[tokio::test]
    async fn test_project_overrides_user_field_by_field() {
        let dir = TempDir::new().unwrap();
        let user = write(
            &dir,
            "user.toml",
            "[engine]\nmax_workers = 4\nmax_supersteps = 20\n\n[logging]\nlevel = \"debug\"\n",
        )
        .await;
        let project = write(&dir, "project.toml", "[engine]\nmax_supersteps = 50\n").await;

        let config = ConfigLoader::with_paths(Some(user), project).load().await.unwrap();
        assert_eq!(config.engine.max_workers, Some(4));
        assert_eq!(config.engine.max_supersteps, 50);
        assert_eq!(config.logging.level, "debug");
    }

    #[tokio::test]
    async fn test_explicit_file_wins_and_must_exist() {
        let dir = TempDir::new().unwrap();
        let project = write(&dir, "project.toml", "[workflow]\nmax_chat_iterations = 3\n").await;
        let explicit = write(
            &dir,
            "explicit.toml",
            "[workflow]\nmax_chat_iterations = 5\n\n[engine]\nrestart = \"fresh\"\n",
        )
        .await;

        let config = ConfigLoader::with_paths(None, project.clone())
            .with_explicit(Some(explicit))
            .load()
            .await
            .unwrap();
        assert_eq!(config.workflow.max_chat_iterations, 5);
        assert_eq!(config.engine.restart, RestartPolicy::Fresh);

        let missing = ConfigLoader::with_paths(None, project)
            .with_explicit(Some(dir.path().join("nope.toml")));
        assert!(missing.load().await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let zero_workers = write(&dir, "a.toml", "[engine]\nmax_workers = 0\n").await;
        assert!(ConfigLoader::with_paths(None, zero_workers).load().await.is_err());

        let bad_type = write(&dir, "b.toml", "[store]\nttl_secs = \"soon\"\n").await;
        assert!(ConfigLoader::with_paths(None, bad_type).load().await.is_err());
    }

    #[test]
    fn test_merge_tables_keeps_untouched_keys() {
        let mut base: toml::Table = toml::from_str("[a]\nx = 1\ny = 2\n").unwrap();
        let layer: toml::Table = toml::from_str("[a]\ny = 3\n[b]\nz = true\n").unwrap();
        merge_tables(&mut base, layer);

        assert_eq!(base["a"]["x"].as_integer(), Some(1));
        assert_eq!(base["a"]["y"].as_integer(), Some(3));
        assert_eq!(base["b"]["z"].as_bool(), Some(true));
    }
}
