// src/pipeline/mod.rs

//! The formula pipeline
//!
//! One fixed, strictly sequential pass per formula:
//!
//! ```text
//! ResolveSource -> StageEnvironment -> Build -> Install -> Verify -> Success
//! ```
//!
//! Each stage fails straight into its terminal state; nothing is retried.
//! Every path, including early failures, goes through environment teardown
//! exactly once before the run ends. The Install Prefix is only written by
//! the Installer, and a failed install leaves it as it was.

pub mod command;
pub mod config;
pub mod deps;
pub mod environment;
pub mod executor;
pub mod install;
pub mod result;
pub mod source;
pub mod verify;
pub mod workdir;

pub use command::{CommandOutput, RunLog, StepFailure};
pub use config::PipelineConfig;
pub use deps::{DependencyResolver, HostToolResolver, NoopResolver};
pub use environment::EnvironmentScope;
pub use result::{ExecutionResult, PipelineError, Stage, TerminalState};
pub use source::{NetworkFetcher, SourceFetcher, SourceLocator};
pub use workdir::{WorkingDirectory, sweep_stale};

use crate::filesystem::path::safe_join;
use crate::formula::{Channel, Formula, Substitutions};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs formulas through the pipeline
pub struct Pipeline {
    config: PipelineConfig,
    fetcher: Arc<dyn SourceFetcher>,
    resolver: Arc<dyn DependencyResolver>,
}

/// Mutable state threaded through the stages of one run
struct RunState {
    scope: EnvironmentScope,
    workdir: Option<WorkingDirectory>,
    log: RunLog,
    installed: Vec<PathBuf>,
}

impl Pipeline {
    /// Pipeline with the network fetcher and `PATH`-based dependency checks
    pub fn new(config: PipelineConfig) -> Self {
        let fetcher = Arc::new(NetworkFetcher::new(config.fetch_timeout));
        Self {
            config,
            fetcher,
            resolver: Arc::new(HostToolResolver),
        }
    }

    /// Replace the source fetcher
    pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Replace the dependency resolver
    pub fn with_resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run `formula` from `channel` to a terminal state
    pub fn run(&self, formula: &Formula, channel: Channel) -> ExecutionResult {
        let name = formula.package.name.clone();
        info!("Running formula {} ({} channel)", name, channel);

        let mut state = RunState {
            scope: EnvironmentScope::new(),
            workdir: None,
            log: RunLog::new(),
            installed: Vec::new(),
        };

        let locator = formula.locator(channel);
        let built = self.build_and_install(formula, channel, &mut state);

        // Build variables, links and directories go away before verification
        state.scope.teardown();

        let mut tested = false;
        let outcome = built.and_then(|()| {
            if !formula.has_test() {
                debug!("No test procedure for {}", name);
                return Ok(());
            }
            tested = true;
            info!("Stage: {}", Stage::Verify);
            self.run_test(formula, &mut state.log)
        });

        let workdir = match state.workdir.take() {
            Some(workdir) => workdir.finish(self.config.keep_workdir).unwrap_or_else(|e| {
                warn!("{}", e);
                None
            }),
            None => None,
        };

        match &outcome {
            Ok(()) => info!("Formula {} finished: {}", name, TerminalState::Success),
            Err(e) => warn!("Formula {} finished: {} ({})", name, e.state(), e),
        }

        ExecutionResult {
            formula: name,
            channel,
            locator,
            outcome,
            installed: state.installed,
            tested,
            workdir,
            log: state.log.into_string(),
            teardowns: state.scope.teardowns(),
        }
    }

    /// ResolveSource, StageEnvironment, Build and Install
    fn build_and_install(
        &self,
        formula: &Formula,
        channel: Channel,
        state: &mut RunState,
    ) -> Result<(), PipelineError> {
        info!("Stage: {}", Stage::ResolveSource);
        let (locator, raw) = self.parse_locator(formula, channel)?;

        match sweep_stale(&self.config.work_root, self.config.stale_grace) {
            Ok(0) => {}
            Ok(n) => info!("Swept {} stale working directories", n),
            Err(e) => warn!("Failed to sweep stale working directories: {}", e),
        }

        let workdir = WorkingDirectory::create(&self.config.work_root, &formula.package.name)
            .map_err(|e| PipelineError::Fetch {
                locator: raw.clone(),
                message: e.to_string(),
            })?;
        let source_dir = workdir.source_dir().to_path_buf();
        state.workdir = Some(workdir);

        let tree_root = self.resolve(&locator, &raw, &source_dir)?;
        state.log.line(&format!("fetched {} into {}", locator, tree_root.display()));

        info!("Stage: {}", Stage::StageEnvironment);
        let subs = Substitutions::for_formula(formula)
            .with_buildpath(&tree_root)
            .with_prefix(&self.config.prefix);
        environment::stage_environment(
            formula,
            &subs,
            &tree_root,
            self.resolver.as_ref(),
            &mut state.scope,
        )?;

        let build_dir = match &formula.install.workdir {
            Some(dir) => safe_join(&tree_root, subs.apply(dir)).map_err(|e| {
                PipelineError::Environment {
                    message: format!("invalid workdir {}: {}", dir, e),
                }
            })?,
            None => tree_root.clone(),
        };

        info!("Stage: {}", Stage::Build);
        executor::run_build(
            &formula.install.steps,
            &subs,
            &build_dir,
            state.scope.env(),
            self.config.step_timeout,
            &mut state.log,
        )?;

        info!("Stage: {}", Stage::Install);
        let plan = install::InstallPlan {
            prefix: &self.config.prefix,
            build_dir: &build_dir,
            artifacts: &formula.install.artifacts,
            commands: &formula.install.commands,
            subs: &subs,
            env: state.scope.env(),
            timeout: self.config.step_timeout,
        };
        state.installed = install::install(&plan, &mut state.log)?;

        Ok(())
    }

    fn parse_locator(
        &self,
        formula: &Formula,
        channel: Channel,
    ) -> Result<(SourceLocator, String), PipelineError> {
        let raw = formula.locator(channel).ok_or_else(|| PipelineError::Fetch {
            locator: String::new(),
            message: format!("formula {} has no {} source", formula.package.name, channel),
        })?;

        let revision = match channel {
            Channel::Head => formula.source.revision.as_deref(),
            Channel::Stable => None,
        };
        let locator = SourceLocator::parse(&raw, formula.source.checksum.as_deref(), revision)
            .map_err(|e| PipelineError::Fetch {
                locator: raw.clone(),
                message: e.to_string(),
            })?;

        debug!("Source locator: {:?}", locator);
        Ok((locator, raw))
    }

    /// Fetch into `dest` and check the tree is usable
    fn resolve(
        &self,
        locator: &SourceLocator,
        raw: &str,
        dest: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let fetch_error = |e: crate::Error| PipelineError::Fetch {
            locator: raw.to_string(),
            message: e.to_string(),
        };

        let root = self.fetcher.fetch(locator, dest).map_err(fetch_error)?;
        source::ensure_populated(&root).map_err(fetch_error)?;
        Ok(root)
    }

    /// Run only the Source Resolver, fetching into `dest`
    ///
    /// `dest` must not exist or be an empty directory. Returns the tree root.
    pub fn fetch_only(
        &self,
        formula: &Formula,
        channel: Channel,
        dest: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let (locator, raw) = self.parse_locator(formula, channel)?;

        let occupied = fs::read_dir(dest)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if occupied {
            return Err(PipelineError::Fetch {
                locator: raw,
                message: format!("destination {} is not empty", dest.display()),
            });
        }
        fs::create_dir_all(dest).map_err(|e| PipelineError::Fetch {
            locator: raw.clone(),
            message: format!("cannot create {}: {}", dest.display(), e),
        })?;

        self.resolve(&locator, &raw, dest)
    }

    fn run_test(&self, formula: &Formula, log: &mut RunLog) -> Result<(), PipelineError> {
        let steps = formula.test.as_ref().map_or(&[][..], |t| t.steps.as_slice());
        let subs = Substitutions::for_formula(formula).with_prefix(&self.config.prefix);
        verify::verify(
            steps,
            &self.config.prefix,
            &subs,
            self.config.step_timeout,
            log,
        )
    }

    /// Run only the Verifier against the configured prefix
    pub fn verify_only(&self, formula: &Formula) -> ExecutionResult {
        let mut log = RunLog::new();
        let mut tested = false;

        let outcome = if formula.has_test() {
            tested = true;
            self.run_test(formula, &mut log)
        } else {
            warn!("Formula {} has no test procedure", formula.package.name);
            Ok(())
        };

        ExecutionResult {
            formula: formula.package.name.clone(),
            channel: Channel::default(),
            locator: None,
            outcome,
            installed: Vec::new(),
            tested,
            workdir: None,
            log: log.into_string(),
            teardowns: 0,
        }
    }
}
