//! Snapshot archival to timestamped JSON files

use log::{error, info};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::error::ArchiveError;
use crate::models::Reading;
use crate::store::Snapshot;
use crate::utils::{file_stamp, now_local};

/// Writes store snapshots next to a configured base file name.
///
/// Every archive gets its own file, `<stem>_<local time><ext>`, so repeated
/// archives never overwrite each other. Existing files are never replaced.
#[derive(Debug, Clone)]
pub struct Archiver {
    base_path: PathBuf,
}

impl Archiver {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        let base_path = match std::path::absolute(&base_path) {
            Ok(full) => full,
            Err(e) => {
                error!(
                    "Couldn't get absolute file path for the archive file: fname={} error={}",
                    base_path.display(),
                    e
                );
                base_path
            }
        };
        Archiver { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// File name for an archive taken at `at`
    pub fn archive_path(&self, at: &OffsetDateTime) -> PathBuf {
        let stem = self
            .base_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        let ext = self
            .base_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let name = format!("{}_{}{}", stem, file_stamp(at), ext);
        match self.base_path.parent() {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    /// Serialize the snapshot as an indented JSON array and write it to a new
    /// file. Returns the path written.
    pub async fn write(&self, snapshot: &Snapshot) -> Result<PathBuf, ArchiveError> {
        info!("Writing archive file with {} measurements", snapshot.len());

        let json = serde_json::to_vec_pretty(snapshot).map_err(ArchiveError::Serialize)?;
        let path = self.archive_path(&now_local());

        let write_err = |source: std::io::Error| ArchiveError::Write {
            path: path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(write_err)?;
        file.write_all(&json).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)?;

        info!("Wrote archive file: fname={}", path.display());
        Ok(path)
    }

    /// Read an archive file back into readings
    pub async fn load(path: &Path) -> Result<Vec<Reading>, ArchiveError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ArchiveError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        serde_json::from_slice(&bytes).map_err(|source| ArchiveError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
