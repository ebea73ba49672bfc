// src/pipeline/result.rs

//! Terminal outcomes of a pipeline run

use super::command::{CommandOutput, StepFailure};
use crate::formula::Channel;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ResolveSource,
    StageEnvironment,
    Build,
    Install,
    Verify,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolveSource => "resolve-source",
            Self::StageEnvironment => "stage-environment",
            Self::Build => "build",
            Self::Install => "install",
            Self::Verify => "verify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The terminal state a run ends in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalState {
    Success,
    DependencyError,
    FetchError,
    BuildError,
    InstallError,
    TestError,
}

impl TerminalState {
    /// Process exit code the CLI reports for this state
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::DependencyError => 2,
            Self::FetchError => 3,
            Self::BuildError => 4,
            Self::InstallError => 5,
            Self::TestError => 6,
        }
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "Success",
            Self::DependencyError => "DependencyError",
            Self::FetchError => "FetchError",
            Self::BuildError => "BuildError",
            Self::InstallError => "InstallError",
            Self::TestError => "TestError",
        };
        f.write_str(name)
    }
}

/// Why a run stopped
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("missing build dependencies: {}", missing.join(", "))]
    Dependency { missing: Vec<String> },

    #[error("failed to fetch {locator}: {message}")]
    Fetch { locator: String, message: String },

    /// Staging directories, links or variables could not be set up
    #[error("failed to stage build environment: {message}")]
    Environment { message: String },

    #[error("build step `{step}` {reason}")]
    Build {
        step: String,
        reason: StepFailure,
        output: CommandOutput,
    },

    #[error("install failed: {message}")]
    Install {
        message: String,
        output: CommandOutput,
    },

    #[error("test step `{step}` {reason}")]
    Test {
        step: String,
        reason: StepFailure,
        output: CommandOutput,
    },
}

impl PipelineError {
    pub(crate) fn install(message: impl Into<String>) -> Self {
        Self::Install {
            message: message.into(),
            output: CommandOutput::default(),
        }
    }

    /// Stage that failed
    pub fn stage(&self) -> Stage {
        match self {
            Self::Dependency { .. } | Self::Environment { .. } => Stage::StageEnvironment,
            Self::Fetch { .. } => Stage::ResolveSource,
            Self::Build { .. } => Stage::Build,
            Self::Install { .. } => Stage::Install,
            Self::Test { .. } => Stage::Verify,
        }
    }

    /// Terminal state this failure maps to
    pub fn state(&self) -> TerminalState {
        match self {
            Self::Dependency { .. } => TerminalState::DependencyError,
            Self::Fetch { .. } => TerminalState::FetchError,
            Self::Environment { .. } | Self::Build { .. } => TerminalState::BuildError,
            Self::Install { .. } => TerminalState::InstallError,
            Self::Test { .. } => TerminalState::TestError,
        }
    }

    /// Captured output of the failing command, if any
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            Self::Build { output, .. } | Self::Install { output, .. } | Self::Test { output, .. }
                if !output.is_empty() =>
            {
                Some(output)
            }
            _ => None,
        }
    }
}

/// Everything a caller learns about a finished run
#[derive(Debug)]
pub struct ExecutionResult {
    /// Formula name
    pub formula: String,
    /// Channel the source came from
    pub channel: Channel,
    /// Resolved source locator, when one was selected
    pub locator: Option<String>,
    /// `Ok` on success, otherwise the first failure
    pub outcome: std::result::Result<(), PipelineError>,
    /// Paths written into the Install Prefix
    pub installed: Vec<PathBuf>,
    /// Whether the test procedure ran
    pub tested: bool,
    /// Working Directory, only set when it was kept
    pub workdir: Option<PathBuf>,
    /// Accumulated command output for the whole run
    pub log: String,
    /// Number of times the environment scope was torn down
    pub teardowns: usize,
}

impl ExecutionResult {
    pub fn state(&self) -> TerminalState {
        match &self.outcome {
            Ok(()) => TerminalState::Success,
            Err(e) => e.state(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// True when the artifacts are in the prefix, even if the test failed
    pub fn install_succeeded(&self) -> bool {
        matches!(self.outcome, Ok(()) | Err(PipelineError::Test { .. }))
    }

    pub fn error(&self) -> Option<&PipelineError> {
        self.outcome.as_ref().err()
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        self.error().map(PipelineError::stage)
    }

    pub fn exit_code(&self) -> i32 {
        self.state().exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn result_with(outcome: std::result::Result<(), PipelineError>) -> ExecutionResult {
        ExecutionResult {
            formula: "pkg".to_string(),
            channel: Channel::Stable,
            locator: None,
            outcome,
            installed: Vec::new(),
            tested: false,
            workdir: None,
            log: String::new(),
            teardowns: 1,
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(TerminalState::Success.exit_code(), 0);
        assert_eq!(TerminalState::DependencyError.exit_code(), 2);
        assert_eq!(TerminalState::FetchError.exit_code(), 3);
        assert_eq!(TerminalState::BuildError.exit_code(), 4);
        assert_eq!(TerminalState::InstallError.exit_code(), 5);
        assert_eq!(TerminalState::TestError.exit_code(), 6);
    }

    #[test]
    fn test_environment_failure_is_build_error() {
        let err = PipelineError::Environment {
            message: "cannot create src".to_string(),
        };
        assert_eq!(err.state(), TerminalState::BuildError);
        assert_eq!(err.stage(), Stage::StageEnvironment);
    }

    #[test]
    fn test_test_error_keeps_install() {
        let result = result_with(Err(PipelineError::Test {
            step: "pkg --version".to_string(),
            reason: StepFailure::Exit(1),
            output: CommandOutput::default(),
        }));
        assert_eq!(result.state(), TerminalState::TestError);
        assert!(result.install_succeeded());
        assert!(!result.is_success());
        assert_eq!(result.failed_stage(), Some(Stage::Verify));
    }

    #[test]
    fn test_build_error_message() {
        let err = PipelineError::Build {
            step: "make".to_string(),
            reason: StepFailure::TimedOut(Duration::from_secs(5)),
            output: CommandOutput::default(),
        };
        assert_eq!(err.to_string(), "build step `make` timed out after 5s");
        assert!(err.output().is_none());

        let result = result_with(Err(err));
        assert!(!result.install_succeeded());
        assert_eq!(result.exit_code(), 4);
    }
}
