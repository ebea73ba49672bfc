// src/receipt.rs

//! Install receipts
//!
//! After a run that left artifacts in the prefix (`Success` or
//! `TestError`), a JSON receipt is written to
//! `<state_dir>/receipts/<name>.json`. Receipts live outside the Install
//! Prefix and are what `list` reports.

use crate::Result;
use crate::filesystem::path::sanitize_filename;
use crate::formula::{Channel, Formula};
use crate::pipeline::{ExecutionResult, PipelineError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Outcome of the post-install test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verification {
    Passed,
    Failed,
    Skipped,
}

/// Record of one install
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub channel: Channel,
    #[serde(default)]
    pub source: Option<String>,
    pub prefix: PathBuf,
    pub installed: Vec<PathBuf>,
    #[serde(default)]
    pub runtime_dependencies: Vec<String>,
    pub verification: Verification,
    pub installed_at: DateTime<Utc>,
}

impl InstallReceipt {
    /// Build a receipt, or `None` if the run did not install anything
    pub fn from_result(formula: &Formula, prefix: &Path, result: &ExecutionResult) -> Option<Self> {
        if !result.install_succeeded() {
            return None;
        }

        let verification = match (&result.outcome, result.tested) {
            (Err(PipelineError::Test { .. }), _) => Verification::Failed,
            (_, true) => Verification::Passed,
            (_, false) => Verification::Skipped,
        };

        Some(Self {
            name: formula.package.name.clone(),
            version: formula.package.version.clone(),
            channel: result.channel,
            source: result.locator.clone(),
            prefix: prefix.to_path_buf(),
            installed: result.installed.clone(),
            runtime_dependencies: formula
                .runtime_dependencies()
                .into_iter()
                .map(str::to_string)
                .collect(),
            verification,
            installed_at: Utc::now(),
        })
    }

    fn receipts_dir(state_dir: &Path) -> PathBuf {
        state_dir.join("receipts")
    }

    /// Receipt path for `name`
    pub fn path_for(state_dir: &Path, name: &str) -> Result<PathBuf> {
        let name = sanitize_filename(name)?;
        Ok(Self::receipts_dir(state_dir).join(format!("{}.json", name)))
    }

    /// Write the receipt atomically (temp file, then rename)
    pub fn write(&self, state_dir: &Path) -> Result<PathBuf> {
        let path = Self::path_for(state_dir, &self.name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&temp_path, &path)?;

        debug!("Wrote receipt {}", path.display());
        Ok(path)
    }

    /// Load the receipt for `name`, if one exists
    pub fn load(state_dir: &Path, name: &str) -> Result<Option<Self>> {
        let path = Self::path_for(state_dir, name)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every readable receipt, sorted by name
    ///
    /// Unreadable receipts are logged and skipped.
    pub fn read_all(state_dir: &Path) -> Result<Vec<Self>> {
        let dir = Self::receipts_dir(state_dir);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut receipts = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match fs::read(&path)
                .map_err(crate::Error::from)
                .and_then(|bytes| serde_json::from_slice::<Self>(&bytes).map_err(Into::into))
            {
                Ok(receipt) => receipts.push(receipt),
                Err(e) => warn!("Skipping unreadable receipt {}: {}", path.display(), e),
            }
        }

        receipts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(receipts)
    }
}
