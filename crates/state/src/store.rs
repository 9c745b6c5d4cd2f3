//! Crash-safe JSON persistence.
//!
//! Writes go to a `.tmp` sibling, are fsync'd, then renamed over the target —
//! a reader observes either the prior committed content or the new content,
//! never a torn file.  Concurrent sessions in the same project serialize
//! through an advisory lock file in the state directory; last writer wins.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error at {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io { path: path.to_path_buf(), source }
}

/// Read a JSON document.  `Ok(None)` when the file does not exist;
/// `Err` on unreadable or unparsable content — the caller decides whether to
/// rebuild or propagate.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let value = serde_json::from_str(&raw)
        .map_err(|e| StoreError::Serde { path: path.to_path_buf(), source: e })?;
    Ok(Some(value))
}

/// Atomically replace `path` with the JSON form of `value`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(path, e))?;
    }

    let tmp_path = {
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "state.json".to_string());
        path.with_file_name(format!("{filename}.tmp"))
    };

    let write_result: Result<(), StoreError> = (|| {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| io_err(&tmp_path, e))?;
        let raw = serde_json::to_vec_pretty(value)
            .map_err(|e| StoreError::Serde { path: path.to_path_buf(), source: e })?;
        file.write_all(&raw).map_err(|e| io_err(&tmp_path, e))?;
        file.flush().map_err(|e| io_err(&tmp_path, e))?;
        file.sync_all().map_err(|e| io_err(&tmp_path, e))?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_err(path, err));
    }
    Ok(())
}

/// Exclusive advisory lock over a state directory, held for the duration of a
/// load-mutate-save cycle.  Released on drop.
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    pub fn acquire(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        let path = dir.join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        file.lock_exclusive().map_err(|e| io_err(&path, e))?;
        Ok(Self { file, path })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(err) = fs2::FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %err, "failed to release state lock");
        }
    }
}
