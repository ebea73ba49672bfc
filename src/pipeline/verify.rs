// src/pipeline/verify.rs

//! Verifier: post-install smoke test
//!
//! Test steps run in a fresh scratch directory with `HOME` pointing at it
//! and `<prefix>/bin` in front of `PATH`. The staged build variables are
//! not passed on, so a test only passes if the installed artifact works on
//! its own.

use super::command::{RunLog, StepFailure};
use super::executor::{StepContext, run_steps};
use super::result::PipelineError;
use crate::formula::{CommandSpec, Substitutions};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Run the test steps against an installed prefix
pub fn verify(
    steps: &[CommandSpec],
    prefix: &Path,
    subs: &Substitutions,
    timeout: Duration,
    log: &mut RunLog,
) -> Result<(), PipelineError> {
    let scratch = tempfile::Builder::new()
        .prefix("formulary-test-")
        .tempdir()
        .map_err(|e| PipelineError::Test {
            step: "create scratch directory".to_string(),
            reason: StepFailure::Spawn(e.to_string()),
            output: Default::default(),
        })?;

    let env = test_environment(prefix, scratch.path());
    let ctx = StepContext {
        phase: "test",
        subs,
        cwd: scratch.path(),
        env: &env,
        timeout,
    };

    let count = run_steps(&ctx, steps, log, |step, err| PipelineError::Test {
        step,
        reason: err.reason,
        output: err.output,
    })?;

    info!("Verification passed ({} steps)", count);
    Ok(())
}

fn test_environment(prefix: &Path, scratch: &Path) -> Vec<(String, String)> {
    let bin = prefix.join("bin");
    let path = match std::env::var_os("PATH") {
        Some(existing) if !existing.is_empty() => {
            let mut paths = vec![bin];
            paths.extend(std::env::split_paths(&existing));
            std::env::join_paths(paths)
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|_| prefix.join("bin").to_string_lossy().to_string())
        }
        _ => bin.to_string_lossy().to_string(),
    };

    vec![
        ("PATH".to_string(), path),
        ("HOME".to_string(), scratch.to_string_lossy().to_string()),
    ]
}
