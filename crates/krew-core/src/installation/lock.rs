//! Per-plugin advisory lock
//!
//! Serialises install/remove/upgrade of the same plugin across processes.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{KrewError, Result};
use crate::KrewPaths;

/// Exclusive lock on `locks/<name>.lock`, released on drop
#[derive(Debug)]
pub struct PluginLock {
    file: File,
    path: PathBuf,
}

impl PluginLock {
    /// Block until the lock for `name` is held
    pub fn acquire(paths: &KrewPaths, name: &str) -> Result<Self> {
        let path = paths.plugin_lock_path(name);
        let file = open_lock_file(&path)?;
        debug!("Waiting for lock {}", path.display());
        file.lock_exclusive()
            .map_err(|e| KrewError::fs("lock", &path, e))?;
        Ok(Self { file, path })
    }

    /// Take the lock for `name` if no other holder exists
    #[cfg(test)]
    pub(crate) fn try_acquire(paths: &KrewPaths, name: &str) -> Result<Option<Self>> {
        let path = paths.plugin_lock_path(name);
        let file = open_lock_file(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(KrewError::fs("lock", &path, e)),
        }
    }

    #[cfg(test)]
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PluginLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!("Released lock {}", self.path.display());
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| KrewError::fs("create directory", parent, e))?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| KrewError::fs("open lock file", path, e))
}
