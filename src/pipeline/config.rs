// src/pipeline/config.rs

//! Configuration for a pipeline run

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default Install Prefix
pub const DEFAULT_PREFIX: &str = "/usr/local";

/// Configuration for the pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Install Prefix artifacts are copied into
    pub prefix: PathBuf,
    /// Parent directory for per-run Working Directories
    pub work_root: PathBuf,
    /// Keep the Working Directory after the run (for debugging)
    pub keep_workdir: bool,
    /// Upper bound for a single build, install or test command
    pub step_timeout: Duration,
    /// Timeout for archive downloads
    pub fetch_timeout: Duration,
    /// Minimum age before an unlocked Working Directory is swept
    pub stale_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prefix: PathBuf::from(DEFAULT_PREFIX),
            work_root: std::env::temp_dir().join("formulary"),
            keep_workdir: false,
            step_timeout: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(300),
            stale_grace: Duration::from_secs(60),
        }
    }
}

impl PipelineConfig {
    /// Configuration installing into `prefix` with default everything else
    pub fn for_prefix(prefix: impl AsRef<Path>) -> Self {
        Self {
            prefix: prefix.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Fully isolated configuration, used by tests and throwaway installs
    pub fn isolated(prefix: impl AsRef<Path>, work_root: impl AsRef<Path>) -> Self {
        Self {
            prefix: prefix.as_ref().to_path_buf(),
            work_root: work_root.as_ref().to_path_buf(),
            step_timeout: Duration::from_secs(120),
            stale_grace: Duration::ZERO,
            ..Default::default()
        }
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn with_keep_workdir(mut self, keep: bool) -> Self {
        self.keep_workdir = keep;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.prefix, PathBuf::from("/usr/local"));
        assert!(!config.keep_workdir);
        assert_eq!(config.step_timeout, Duration::from_secs(3600));
    }

    #[test]
    fn test_isolated_config() {
        let config = PipelineConfig::isolated("/tmp/p", "/tmp/w")
            .with_keep_workdir(true);
        assert_eq!(config.prefix, PathBuf::from("/tmp/p"));
        assert_eq!(config.work_root, PathBuf::from("/tmp/w"));
        assert_eq!(config.stale_grace, Duration::ZERO);
        assert!(config.keep_workdir);
    }
}
