// src/pipeline/workdir.rs

//! Per-run Working Directories
//!
//! Every run gets a fresh directory under the work root holding the
//! fetched tree and build intermediates. The run keeps an exclusive
//! `flock` on a lock file inside it for its whole lifetime. A directory
//! whose lock file exists but is not locked belongs to a run that died
//! without cleaning up, and [`sweep_stale`] removes it. Kept directories
//! have their lock file removed, so they are never swept.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Name of the per-run lock file
pub const RUN_LOCK_FILE: &str = ".run.lock";

/// Ephemeral directory owned by exactly one run
pub struct WorkingDirectory {
    lock: Option<File>,
    dir: Option<TempDir>,
    path: PathBuf,
    source_dir: PathBuf,
}

impl WorkingDirectory {
    /// Create a locked Working Directory for `name` under `work_root`
    pub fn create(work_root: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(work_root).map_err(|e| {
            Error::IoError(format!(
                "Failed to create work root {}: {}",
                work_root.display(),
                e
            ))
        })?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", name))
            .tempdir_in(work_root)
            .map_err(|e| Error::IoError(format!("Failed to create working directory: {}", e)))?;

        // Lock before the file gets its final name, so a sweeper never sees
        // an unlocked lock file for a live run.
        let pending = tempfile::NamedTempFile::new_in(dir.path())?;
        pending
            .as_file()
            .try_lock_exclusive()
            .map_err(|e| Error::LockError(format!("Failed to lock working directory: {}", e)))?;
        let lock = pending
            .persist(dir.path().join(RUN_LOCK_FILE))
            .map_err(|e| Error::IoError(format!("Failed to create run lock: {}", e.error)))?;

        let source_dir = dir.path().join("source");
        fs::create_dir(&source_dir)?;

        let path = dir.path().to_path_buf();
        debug!("Working directory: {}", path.display());

        Ok(Self {
            lock: Some(lock),
            dir: Some(dir),
            path,
            source_dir,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Empty directory the source is fetched into
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// End the run, removing the directory unless `keep` is set
    ///
    /// Returns the path when the directory was kept.
    pub fn finish(mut self, keep: bool) -> Result<Option<PathBuf>> {
        // Unlink while still locked, so no sweeper can claim the directory.
        let _ = fs::remove_file(self.path.join(RUN_LOCK_FILE));
        if let Some(lock) = self.lock.take() {
            let _ = lock.unlock();
        }

        let Some(dir) = self.dir.take() else {
            return Ok(None);
        };

        if keep {
            let kept = dir.keep();
            info!("Keeping working directory {}", kept.display());
            Ok(Some(kept))
        } else {
            dir.close().map_err(|e| {
                Error::IoError(format!(
                    "Failed to remove working directory {}: {}",
                    self.path.display(),
                    e
                ))
            })?;
            Ok(None)
        }
    }
}

/// Remove Working Directories left behind by runs that died
///
/// A directory is stale when its lock file exists, nobody holds the lock,
/// and the lock file is older than `grace`. Returns how many were removed.
pub fn sweep_stale(work_root: &Path, grace: Duration) -> Result<usize> {
    let entries = match fs::read_dir(work_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let dir = entry.path();
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }

        let lock_path = dir.join(RUN_LOCK_FILE);
        let Ok(lock) = File::open(&lock_path) else {
            continue;
        };
        if lock.try_lock_exclusive().is_err() {
            debug!("Working directory {} is in use", dir.display());
            continue;
        }

        let age = lock
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or_default();
        if age < grace {
            let _ = lock.unlock();
            continue;
        }

        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!("Removed stale working directory {}", dir.display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove stale working directory {}: {}", dir.display(), e),
        }
    }

    Ok(removed)
}
