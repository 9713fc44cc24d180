use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::error::{Result, SyncError};
use crate::track::TrackInfo;

const FILE_NAME: &str = "last-track.json";

/// Remembers the last track that played successfully, for instant resume.
#[derive(Debug, Clone)]
pub struct LastTrackCache {
    path: PathBuf,
}

impl LastTrackCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<platform cache dir>/syncify/last-track.json`
    pub fn in_default_location() -> Result<Self> {
        let dirs = ProjectDirs::from("", "", "syncify")
            .ok_or_else(|| SyncError::Cache("no home directory".into()))?;
        Ok(Self::new(dirs.cache_dir().join(FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when nothing has been cached yet. A corrupt file is treated
    /// the same way.
    pub async fn load(&self) -> Result<Option<TrackInfo>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SyncError::Cache(format!("{}: {}", self.path.display(), e))),
        };
        match serde_json::from_slice(&raw) {
            Ok(track) => Ok(Some(track)),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring unreadable track cache");
                Ok(None)
            }
        }
    }

    pub async fn store(&self, track: &TrackInfo) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| SyncError::Cache(format!("{}: {}", dir.display(), e)))?;
        }
        let raw = serde_json::to_vec_pretty(track)?;
        tokio::fs::write(&self.path, raw)
            .await
            .map_err(|e| SyncError::Cache(format!("{}: {}", self.path.display(), e)))
    }
}
