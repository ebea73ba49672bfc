// src/lock.rs

//! Per-formula install lock
//!
//! `install` holds an exclusive `flock` on `<state_dir>/locks/<name>.lock`
//! for the whole run, so two installs of the same formula never overlap.
//! Different formulas use different lock files and run independently.
//!
//! ```ignore
//! let lock = FormulaLock::try_acquire(&state_dir, "skaffold")?
//!     .ok_or_else(|| anyhow!("skaffold is already being installed"))?;
//! // ... run the pipeline ...
//! // Lock released on drop
//! ```

use crate::Result;
use crate::filesystem::path::sanitize_filename;
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Exclusive lock on one formula name
pub struct FormulaLock {
    /// Kept open to hold the lock
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl FormulaLock {
    /// Lock file path for `name` under `state_dir`
    pub fn lock_path(state_dir: &Path, name: &str) -> Result<PathBuf> {
        let name = sanitize_filename(name)?;
        Ok(state_dir.join("locks").join(format!("{}.lock", name)))
    }

    /// Try to acquire the lock without blocking
    ///
    /// Returns `Ok(None)` when another process or thread holds it.
    pub fn try_acquire(state_dir: &Path, name: &str) -> Result<Option<Self>> {
        let path = Self::lock_path(state_dir, name)?;
        let file = Self::open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                info!("Acquired lock for {}", name);
                Ok(Some(Self { file, path }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!("Lock for {} already held at {}", name, path.display());
                Ok(None)
            }
            Err(e) => Err(crate::Error::LockError(format!(
                "Failed to try-lock {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(path: &Path) -> Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(File::create(path)?)
    }
}

impl Drop for FormulaLock {
    fn drop(&mut self) {
        // Released when the file closes
        debug!("Released lock {}", self.path.display());
    }
}
