//! Single-file snapshot cache.
//!
//! The whole document is replaced on every write (temp file + rename), so a
//! concurrent reader sees either the previous snapshot or the new one.

use crate::domain::snapshot::Snapshot;
use anyhow::Context;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The stored snapshot is newer than the one offered; nothing was written.
    SkippedStale,
}

#[derive(Debug)]
pub struct SnapshotCache {
    path: PathBuf,
    // Serializes writers within this process so the newer-wins check and the rename
    // happen as one step.
    write_lock: tokio::sync::Mutex<()>,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored snapshot, or `None` when there is nothing usable on disk.
    pub async fn read(&self) -> Option<Snapshot> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no cached snapshot");
                return None;
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "cache read failed; treating as miss");
                return None;
            }
        };

        match serde_json::from_slice::<Snapshot>(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "cached snapshot is malformed; treating as miss");
                None
            }
        }
    }

    pub async fn write(&self, snapshot: &Snapshot) -> anyhow::Result<WriteOutcome> {
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.read().await {
            if existing.last_updated > snapshot.last_updated {
                tracing::info!(
                    stored = %existing.last_updated,
                    offered = %snapshot.last_updated,
                    "cached snapshot is newer; skipping write"
                );
                return Ok(WriteOutcome::SkippedStale);
            }
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create cache dir {}", parent.display()))?;
        }

        let json = serde_json::to_vec_pretty(snapshot).context("failed to serialize snapshot")?;

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;

        if let Err(err) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err).with_context(|| {
                format!("failed to move snapshot into place at {}", self.path.display())
            });
        }

        Ok(WriteOutcome::Written)
    }

    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".to_string());
        self.path
            .with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
    }
}
