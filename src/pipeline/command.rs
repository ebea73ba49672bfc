// src/pipeline/command.rs

//! Bounded execution of formula commands
//!
//! Build, install and test steps are external commands. Only the exit
//! status and the captured output are interpreted. Each command runs in
//! its own process group with stdin closed, and is killed together with
//! its children when it exceeds the step timeout.

use crate::formula::CommandSpec;
use std::fmt;
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Captured stdout and stderr of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

/// How a command failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepFailure {
    /// Non-zero exit status
    Exit(i32),
    /// Killed by a signal it did not handle
    Signal,
    /// Exceeded the step timeout and was killed
    TimedOut(Duration),
    /// Could not be spawned at all
    Spawn(String),
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exit(code) => write!(f, "exited with status {}", code),
            Self::Signal => write!(f, "was terminated by a signal"),
            Self::TimedOut(timeout) => write!(f, "timed out after {:?}", timeout),
            Self::Spawn(message) => write!(f, "could not be started: {}", message),
        }
    }
}

/// A failed command with whatever it printed before failing
#[derive(Debug, Clone)]
pub struct StepError {
    pub reason: StepFailure,
    pub output: CommandOutput,
}

/// Accumulated output of every command in a run
#[derive(Debug, Default)]
pub struct RunLog {
    text: String,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
    }

    /// Append one command's output under a `=== phase: command ===` header
    pub fn record(&mut self, phase: &str, spec: &CommandSpec, output: &CommandOutput) {
        self.line(&format!("=== {}: {} ===", phase, spec));
        for stream in [&output.stdout, &output.stderr] {
            if !stream.is_empty() {
                self.text.push_str(stream);
                if !stream.ends_with('\n') {
                    self.text.push('\n');
                }
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

/// How long to keep collecting output once the command itself is gone
const OUTPUT_GRACE: Duration = Duration::from_secs(2);

/// Run one command to completion
///
/// `env` is added on top of the interpreter's environment for this child
/// only.
pub fn run_command(
    spec: &CommandSpec,
    cwd: &Path,
    env: &[(String, String)],
    timeout: Duration,
) -> Result<CommandOutput, StepError> {
    let mut command = match spec {
        CommandSpec::Argv(argv) => {
            let Some((program, args)) = argv.split_first() else {
                return Err(StepError {
                    reason: StepFailure::Spawn("empty command".to_string()),
                    output: CommandOutput::default(),
                });
            };
            let mut command = Command::new(program);
            command.args(args);
            command
        }
        CommandSpec::Shell(script) => {
            let mut command = Command::new("sh");
            command.arg("-c").arg(script);
            command
        }
    };

    debug!("Command: {} (in {})", spec, cwd.display());

    command
        .current_dir(cwd)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let mut child = command.spawn().map_err(|e| StepError {
        reason: StepFailure::Spawn(format!("{}: {}", spec.program(), e)),
        output: CommandOutput::default(),
    })?;

    // Drain both pipes concurrently so a chatty command cannot block on a
    // full pipe while we wait for it.
    let stdout = Capture::start(child.stdout.take());
    let stderr = Capture::start(child.stderr.take());

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => {
            // Background jobs left behind still hold the pipes open.
            signal_group(&child);
            Ok(status)
        }
        Ok(None) => {
            warn!("Command timed out after {:?}: {}", timeout, spec);
            kill_group(&mut child);
            Err(StepFailure::TimedOut(timeout))
        }
        Err(e) => {
            kill_group(&mut child);
            Err(StepFailure::Spawn(format!("wait failed: {}", e)))
        }
    };

    let deadline = Instant::now() + OUTPUT_GRACE;
    let output = CommandOutput {
        stdout: stdout.finish(deadline),
        stderr: stderr.finish(deadline),
    };

    match status {
        Ok(status) if status.success() => Ok(output),
        Ok(status) => {
            let reason = match status.code() {
                Some(code) => StepFailure::Exit(code),
                None => StepFailure::Signal,
            };
            Err(StepError { reason, output })
        }
        Err(reason) => Err(StepError { reason, output }),
    }
}

/// Output of one pipe, read on a background thread
///
/// The buffer is shared so whatever arrived before the deadline is kept
/// even when a grandchild that escaped the process group never closes
/// its end of the pipe.
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    done: Option<Receiver<()>>,
}

impl Capture {
    fn start<R: Read + Send + 'static>(pipe: Option<R>) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let done = pipe.map(|mut pipe| {
            let (tx, rx) = mpsc::channel();
            let sink = Arc::clone(&buf);
            thread::spawn(move || {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => match sink.lock() {
                            Ok(mut sink) => sink.extend_from_slice(&chunk[..n]),
                            Err(_) => break,
                        },
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
                let _ = tx.send(());
            });
            rx
        });
        Self { buf, done }
    }

    /// Wait for end of stream until `deadline`, then take what was read
    fn finish(self, deadline: Instant) -> String {
        if let Some(done) = &self.done {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if done.recv_timeout(remaining).is_err() {
                debug!("Output pipe still open after the command exited; keeping partial output");
            }
        }
        match self.buf.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }
}

/// Send SIGKILL to the command's process group
fn signal_group(child: &Child) {
    if let Ok(pid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: signalling a process group we created; no memory is shared.
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
}

/// Kill the command and everything it spawned, then reap it
fn kill_group(child: &mut Child) {
    signal_group(child);
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    fn argv(parts: &[&str]) -> CommandSpec {
        CommandSpec::Argv(parts.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_run_command_captures_output() {
        let dir = TempDir::new().unwrap();
        let spec = CommandSpec::Shell("echo out; echo err >&2".to_string());

        let output = run_command(&spec, dir.path(), &[], Duration::from_secs(10)).unwrap();
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[test]
    fn test_run_command_env_and_cwd() {
        let dir = TempDir::new().unwrap();
        let spec = CommandSpec::Shell("echo \"$GREETING\" > greeting.txt".to_string());
        let env = vec![("GREETING".to_string(), "hello".to_string())];

        run_command(&spec, dir.path(), &env, Duration::from_secs(10)).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("greeting.txt")).unwrap(),
            "hello\n"
        );
        assert!(std::env::var("GREETING").is_err());
    }

    #[test]
    fn test_run_command_nonzero_exit() {
        let dir = TempDir::new().unwrap();
        let spec = CommandSpec::Shell("echo broken >&2; exit 3".to_string());

        let err = run_command(&spec, dir.path(), &[], Duration::from_secs(10)).unwrap_err();
        assert_eq!(err.reason, StepFailure::Exit(3));
        assert_eq!(err.output.stderr, "broken\n");
    }

    #[test]
    fn test_run_command_missing_program() {
        let dir = TempDir::new().unwrap();
        let spec = argv(&["definitely-not-a-real-program-xyz"]);

        let err = run_command(&spec, dir.path(), &[], Duration::from_secs(10)).unwrap_err();
        assert!(matches!(err.reason, StepFailure::Spawn(_)));
    }

    #[test]
    fn test_run_log_record() {
        let mut log = RunLog::new();
        let output = CommandOutput {
            stdout: "built".to_string(),
            stderr: String::new(),
        };
        log.record("build", &argv(&["make", "all"]), &output);
        assert_eq!(log.as_str(), "=== build: make all ===\nbuilt\n");
    }

    #[test]
    fn test_run_command_timeout_kills_group() {
        let dir = TempDir::new().unwrap();
        let spec = CommandSpec::Shell("sleep 30 & sleep 30".to_string());

        let started = Instant::now();
        let err = run_command(&spec, dir.path(), &[], Duration::from_millis(200)).unwrap_err();
        assert_eq!(err.reason, StepFailure::TimedOut(Duration::from_millis(200)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_run_command_background_job_does_not_outlive_step() {
        let dir = TempDir::new().unwrap();
        let spec = CommandSpec::Shell("sleep 30 & echo started".to_string());

        let started = Instant::now();
        let output = run_command(&spec, dir.path(), &[], Duration::from_secs(60)).unwrap();
        assert_eq!(output.stdout, "started\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_run_command_background_job_with_short_timeout() {
        let dir = TempDir::new().unwrap();
        let spec = CommandSpec::Shell("sleep 30 & echo started".to_string());

        let started = Instant::now();
        let output = run_command(&spec, dir.path(), &[], Duration::from_millis(500)).unwrap();
        assert_eq!(output.stdout, "started\n");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_timeout_display_keeps_subsecond_precision() {
        assert_eq!(
            StepFailure::TimedOut(Duration::from_millis(300)).to_string(),
            "timed out after 300ms"
        );
        assert_eq!(
            StepFailure::TimedOut(Duration::from_secs(5)).to_string(),
            "timed out after 5s"
        );
    }
}
