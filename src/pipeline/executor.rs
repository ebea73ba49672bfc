// src/pipeline/executor.rs

//! Build Executor
//!
//! Runs the install procedure's build steps in order inside the staged
//! environment. The first failing step ends the build; later steps never
//! run and nothing is installed.

use super::command::{CommandOutput, RunLog, StepError, StepFailure, run_command};
use super::result::PipelineError;
use crate::formula::{CommandSpec, Substitutions};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Shared context for running a list of steps
pub(crate) struct StepContext<'a> {
    pub phase: &'a str,
    pub subs: &'a Substitutions,
    pub cwd: &'a Path,
    pub env: &'a [(String, String)],
    pub timeout: Duration,
}

/// Run `steps` in order, stopping at the first failure
///
/// Each step is substituted before it runs and its output is appended to
/// `log`. `on_failure` turns the failing step into the stage's error.
pub(crate) fn run_steps(
    ctx: &StepContext<'_>,
    steps: &[CommandSpec],
    log: &mut RunLog,
    on_failure: impl Fn(String, StepError) -> PipelineError,
) -> Result<usize, PipelineError> {
    let total = steps.len();

    for (index, step) in steps.iter().enumerate() {
        let step = step.substitute(ctx.subs);
        info!("Running {} step {}/{}: {}", ctx.phase, index + 1, total, step);

        match run_command(&step, ctx.cwd, ctx.env, ctx.timeout) {
            Ok(output) => log.record(ctx.phase, &step, &output),
            Err(err) => {
                log.record(ctx.phase, &step, &err.output);
                log.line(&format!("{} step failed: {}", ctx.phase, err.reason));
                return Err(on_failure(step.to_string(), err));
            }
        }
    }

    Ok(total)
}

/// Run the build steps
pub fn run_build(
    steps: &[CommandSpec],
    subs: &Substitutions,
    cwd: &Path,
    env: &[(String, String)],
    timeout: Duration,
    log: &mut RunLog,
) -> Result<(), PipelineError> {
    if !cwd.is_dir() {
        return Err(PipelineError::Build {
            step: format!("cd {}", cwd.display()),
            reason: StepFailure::Spawn("build directory does not exist".to_string()),
            output: CommandOutput::default(),
        });
    }

    let ctx = StepContext {
        phase: "build",
        subs,
        cwd,
        env,
        timeout,
    };

    let count = run_steps(&ctx, steps, log, |step, err| PipelineError::Build {
        step,
        reason: err.reason,
        output: err.output,
    })?;

    info!("Build finished ({} steps)", count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shell(script: &str) -> CommandSpec {
        CommandSpec::Shell(script.to_string())
    }

    #[test]
    fn test_run_build_all_steps() {
        let dir = TempDir::new().unwrap();
        let subs = Substitutions::default().with("name", "pkg");
        let steps = vec![shell("mkdir out"), shell("echo %(name)s > out/pkg")];
        let mut log = RunLog::new();

        run_build(&steps, &subs, dir.path(), &[], Duration::from_secs(10), &mut log).unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("out/pkg")).unwrap(),
            "pkg\n"
        );
        assert!(log.as_str().contains("=== build: mkdir out ==="));
    }

    #[test]
    fn test_run_build_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        let steps = vec![
            shell("echo compiling; echo 'error: bad' >&2; exit 1"),
            shell("touch should-not-exist"),
        ];
        let mut log = RunLog::new();

        let err = run_build(
            &steps,
            &Substitutions::default(),
            dir.path(),
            &[],
            Duration::from_secs(10),
            &mut log,
        )
        .unwrap_err();

        match err {
            PipelineError::Build {
                reason, output, ..
            } => {
                assert_eq!(reason, StepFailure::Exit(1));
                assert_eq!(output.stdout, "compiling\n");
                assert_eq!(output.stderr, "error: bad\n");
            }
            other => panic!("expected build error, got {:?}", other),
        }
        assert!(!dir.path().join("should-not-exist").exists());
    }

    #[test]
    fn test_run_build_uses_staged_env() {
        let dir = TempDir::new().unwrap();
        let env = vec![("GOPATH".to_string(), "/go/path".to_string())];
        let steps = vec![shell("test \"$GOPATH\" = /go/path")];
        let mut log = RunLog::new();

        run_build(
            &steps,
            &Substitutions::default(),
            dir.path(),
            &env,
            Duration::from_secs(10),
            &mut log,
        )
        .unwrap();
    }

    #[test]
    fn test_run_build_missing_cwd() {
        let dir = TempDir::new().unwrap();
        let mut log = RunLog::new();
        let err = run_build(
            &[shell("true")],
            &Substitutions::default(),
            &dir.path().join("missing"),
            &[],
            Duration::from_secs(10),
            &mut log,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Build { .. }));
    }
}
