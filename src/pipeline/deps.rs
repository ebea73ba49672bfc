// src/pipeline/deps.rs

//! Build dependency checks
//!
//! The pipeline never installs dependencies itself. It only asks a
//! [`DependencyResolver`] which of the formula's build-stage dependencies
//! are missing, and stops with a dependency failure if any are.

use crate::error::Result;
use tracing::debug;

/// Answers whether build dependencies are available
pub trait DependencyResolver: Send + Sync {
    /// Return the names from `deps` that are not available
    fn check_missing(&self, deps: &[&str]) -> Result<Vec<String>>;
}

/// Looks each dependency up as an executable on `PATH`
pub struct HostToolResolver;

impl DependencyResolver for HostToolResolver {
    fn check_missing(&self, deps: &[&str]) -> Result<Vec<String>> {
        Ok(deps
            .iter()
            .filter(|dep| match which::which(dep) {
                Ok(path) => {
                    debug!("Found build dependency {} at {}", dep, path.display());
                    false
                }
                Err(_) => true,
            })
            .map(|dep| dep.to_string())
            .collect())
    }
}

/// Assumes every dependency is satisfied
///
/// Use this when the caller has already provisioned the build host.
pub struct NoopResolver;

impl DependencyResolver for NoopResolver {
    fn check_missing(&self, _deps: &[&str]) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
