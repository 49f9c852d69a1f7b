//! Atomic JSON state files with a one-generation backup.
//!
//! Writes go to `<file>.tmp`, the current file is copied to `<file>.bak`, and
//! the temp file is renamed over the original. A reader therefore sees either
//! the old or the new content, never a partial write.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tracing::{info, warn};

use crate::error::StoreError;

/// A value loaded from disk together with the exact text it came from.
#[derive(Debug)]
pub struct Loaded<T> {
    pub value: T,
    pub raw: String,
}

/// One JSON file on disk.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.sibling(".bak")
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    /// Load the primary file, falling back to the backup when the primary is
    /// missing or unreadable. A recovered backup is written back as primary.
    ///
    /// Returns `Ok(None)` when neither file holds valid JSON.
    pub async fn load<T: DeserializeOwned>(&self) -> Result<Option<Loaded<T>>, StoreError> {
        match read_json::<T>(&self.path).await {
            Ok(Some(loaded)) => return Ok(Some(loaded)),
            Ok(None) => {}
            Err(e) => warn!(path = %self.path.display(), "State file unreadable: {e}"),
        }

        let backup = self.backup_path();
        match read_json::<T>(&backup).await {
            Ok(Some(loaded)) => {
                info!(path = %backup.display(), "Recovered state from backup");
                if let Err(e) = self.write_raw(&loaded.raw, false).await {
                    warn!(path = %self.path.display(), "Failed to restore primary from backup: {e}");
                }
                Ok(Some(loaded))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(path = %backup.display(), "Backup state file unreadable: {e}");
                Ok(None)
            }
        }
    }

    /// Load the primary file only. A missing file is `Ok(None)`; an
    /// unreadable one is an error and the backup is left alone.
    pub async fn load_primary<T: DeserializeOwned>(&self) -> Result<Option<Loaded<T>>, StoreError> {
        read_json(&self.path).await
    }

    /// Serialize and atomically replace the file. Returns the written text.
    pub async fn save<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, StoreError> {
        let raw = serde_json::to_string_pretty(value)?;
        self.write_raw(&raw, true).await?;
        Ok(raw)
    }

    async fn write_raw(&self, raw: &str, keep_backup: bool) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(|e| io_err(parent, e))?;
        }

        let temp = self.temp_path();
        fs::write(&temp, raw).await.map_err(|e| io_err(&temp, e))?;

        if keep_backup
            && fs::try_exists(&self.path).await.unwrap_or(false)
            && let Err(e) = fs::copy(&self.path, self.backup_path()).await
        {
            warn!(path = %self.path.display(), "Failed to back up state file: {e}");
        }

        if let Err(e) = fs::rename(&temp, &self.path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(io_err(&self.path, e));
        }
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<Loaded<T>>, StoreError> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path, e)),
    };
    let value = serde_json::from_str(&raw)?;
    Ok(Some(Loaded { value, raw }))
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}
