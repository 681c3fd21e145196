//! File-backed checkpoint storage
//!
//! One document per session under a directory, named `<session_id>.<ext>`. Saves
//! write a temporary sibling and rename it over the target, so a reader never sees a
//! half-written checkpoint and a crash leaves the previous version in place.

use crate::{
    checkpoint::{validate_session_id, Checkpoint, SessionSummary},
    error::Result,
    serializer::{JsonSerializer, SerializerProtocol},
    traits::{check_key, expiry_cutoff, CheckpointStore},
};
use async_trait::async_trait;
use futures::future::join_all;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Checkpoint store persisting sessions as files in a directory
#[derive(Debug, Clone)]
pub struct FileCheckpointStore<S: SerializerProtocol = JsonSerializer> {
    dir: PathBuf,
    serializer: S,
}

impl FileCheckpointStore<JsonSerializer> {
    /// Open (and create if needed) a JSON store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_serializer(dir, JsonSerializer::pretty()).await
    }
}

impl<S: SerializerProtocol> FileCheckpointStore<S> {
    pub async fn with_serializer(dir: impl Into<PathBuf>, serializer: S) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), format = serializer.extension(), "Opened file checkpoint store");
        Ok(Self { dir, serializer })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", session_id, self.serializer.extension()))
    }

    async fn read_path(&self, path: &Path) -> Result<Option<Checkpoint>> {
        match fs::read(path).await {
            Ok(bytes) => {
                let checkpoint: Checkpoint = self.serializer.loads(&bytes)?;
                checkpoint.validate()?;
                Ok(Some(checkpoint))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Paths of every document with this store's extension
    async fn document_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(self.serializer.extension()) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// Every readable document. Unreadable ones are skipped with a warning so one
    /// corrupt file does not block listing or sweeping the rest.
    async fn load_all(&self) -> Result<Vec<(PathBuf, Checkpoint)>> {
        let paths = self.document_paths().await?;
        let loaded = join_all(paths.iter().map(|p| self.read_path(p))).await;
        Ok(paths
            .into_iter()
            .zip(loaded)
            .filter_map(|(path, loaded)| match loaded {
                Ok(cp) => cp.map(|cp| (path, cp)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint");
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl<S: SerializerProtocol + 'static> CheckpointStore for FileCheckpointStore<S> {
    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        validate_session_id(session_id)?;
        self.read_path(&self.path_for(session_id)).await
    }

    async fn save(&self, session_id: &str, checkpoint: Checkpoint) -> Result<()> {
        validate_session_id(session_id)?;
        check_key(session_id, &checkpoint)?;

        let bytes = self.serializer.dumps(&checkpoint)?;
        let target = self.path_for(session_id);
        let tmp = self.dir.join(format!(".{}.{}.tmp", session_id, Uuid::new_v4()));

        fs::write(&tmp, &bytes).await?;
        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(
            session_id = %session_id,
            version = checkpoint.version,
            bytes = bytes.len(),
            "Saved checkpoint"
        );
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        validate_session_id(session_id)?;
        match fs::remove_file(self.path_for(session_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut sessions: Vec<SessionSummary> = self
            .load_all()
            .await?
            .iter()
            .map(|(_, cp)| cp.summary())
            .collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(sessions)
    }

    async fn sweep_expired(&self, ttl: Duration) -> Result<usize> {
        let cutoff = expiry_cutoff(ttl);
        let mut removed = 0;
        for (path, checkpoint) in self.load_all().await? {
            if checkpoint.updated_at >= cutoff {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove expired session");
                    return Err(e.into());
                }
            }
        }
        if removed > 0 {
            info!(removed, dir = %self.dir.display(), "Swept expired sessions");
        }
        Ok(removed)
    }
}
