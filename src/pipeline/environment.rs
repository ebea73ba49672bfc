// src/pipeline/environment.rs

//! Environment Stager
//!
//! Builds the variables, directories and symbolic links a formula's build
//! expects, records every mutation in an [`EnvironmentScope`], and undoes
//! them on teardown. Variables are handed to child processes only; the
//! interpreter's own environment is never modified, so concurrent runs in
//! one process cannot see each other's build settings.

use super::deps::DependencyResolver;
use super::result::PipelineError;
use crate::filesystem::path::safe_join;
use crate::formula::{Formula, Substitutions};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Everything the stager created for one run
///
/// Teardown is idempotent. If the owner never calls [`teardown`], the
/// scope tears itself down when dropped.
///
/// [`teardown`]: EnvironmentScope::teardown
#[derive(Debug, Default)]
pub struct EnvironmentScope {
    vars: Vec<(String, String)>,
    created_dirs: Vec<PathBuf>,
    created_links: Vec<PathBuf>,
    teardowns: usize,
    torn_down: bool,
}

impl EnvironmentScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variables for Build Executor and Installer children
    pub fn env(&self) -> &[(String, String)] {
        &self.vars
    }

    /// Links created so far
    pub fn links(&self) -> &[PathBuf] {
        &self.created_links
    }

    /// Directories created so far (outermost created ancestor of each)
    pub fn directories(&self) -> &[PathBuf] {
        &self.created_dirs
    }

    /// How many times teardown actually ran (0 or 1)
    pub fn teardowns(&self) -> usize {
        self.teardowns
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    fn set_var(&mut self, key: &str, value: String) {
        self.vars.retain(|(k, _)| k != key);
        self.vars.push((key.to_string(), value));
    }

    /// Create `path` and any missing parents, remembering what was new
    fn create_dir(&mut self, path: &Path) -> std::io::Result<()> {
        let mut outermost_new = None;
        for ancestor in path.ancestors() {
            if ancestor.exists() {
                break;
            }
            outermost_new = Some(ancestor.to_path_buf());
        }

        fs::create_dir_all(path)?;

        if let Some(dir) = outermost_new {
            debug!("Created directory {}", dir.display());
            self.created_dirs.push(dir);
        }
        Ok(())
    }

    fn create_link(&mut self, link: &Path, target: &Path) -> std::io::Result<()> {
        symlink(target, link)?;
        debug!("Linked {} -> {}", link.display(), target.display());
        self.created_links.push(link.to_path_buf());
        Ok(())
    }

    /// Undo every recorded mutation
    ///
    /// Links go first, then directories, each in reverse creation order.
    /// Removal failures are logged and do not stop the rest of teardown.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.teardowns += 1;

        for link in self.created_links.drain(..).rev() {
            match fs::remove_file(&link) {
                Ok(()) => debug!("Removed link {}", link.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove link {}: {}", link.display(), e),
            }
        }

        for dir in self.created_dirs.drain(..).rev() {
            match fs::remove_dir_all(&dir) {
                Ok(()) => debug!("Removed directory {}", dir.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove directory {}: {}", dir.display(), e),
            }
        }

        self.vars.clear();
        debug!("Environment torn down");
    }
}

impl Drop for EnvironmentScope {
    fn drop(&mut self) {
        if !self.torn_down {
            self.teardown();
        }
    }
}

/// Stage the build environment for `formula` rooted at `build_root`
///
/// Build-stage dependencies are checked before anything is created, so a
/// missing dependency leaves no trace.
pub fn stage_environment(
    formula: &Formula,
    subs: &Substitutions,
    build_root: &Path,
    resolver: &dyn DependencyResolver,
    scope: &mut EnvironmentScope,
) -> std::result::Result<(), PipelineError> {
    let build_deps = formula.build_dependencies();
    if !build_deps.is_empty() {
        info!("Checking build dependencies: {}", build_deps.join(", "));
        let missing = resolver
            .check_missing(&build_deps)
            .map_err(|e| PipelineError::Environment {
                message: format!("dependency check failed: {}", e),
            })?;
        if !missing.is_empty() {
            return Err(PipelineError::Dependency { missing });
        }
    }

    let install = &formula.install;

    // Resolve every path before creating anything
    let dirs = install
        .directories
        .iter()
        .map(|dir| safe_join(build_root, subs.apply(dir)))
        .collect::<crate::Result<Vec<_>>>()
        .map_err(environment_error)?;
    let links = install
        .links
        .iter()
        .map(|spec| {
            safe_join(build_root, subs.apply(&spec.link))
                .map(|link| (link, PathBuf::from(subs.apply(&spec.target))))
        })
        .collect::<crate::Result<Vec<_>>>()
        .map_err(environment_error)?;

    for (key, value) in &install.environment {
        scope.set_var(key, subs.apply(value));
    }

    for dir in &dirs {
        scope.create_dir(dir).map_err(|e| PipelineError::Environment {
            message: format!("cannot create directory {}: {}", dir.display(), e),
        })?;
    }

    for (link, target) in &links {
        if fs::symlink_metadata(link).is_ok() {
            return Err(PipelineError::Environment {
                message: format!("link path {} already exists", link.display()),
            });
        }
        if let Some(parent) = link.parent() {
            scope.create_dir(parent).map_err(|e| PipelineError::Environment {
                message: format!("cannot create directory {}: {}", parent.display(), e),
            })?;
        }
        scope
            .create_link(link, target)
            .map_err(|e| PipelineError::Environment {
                message: format!("cannot create link {}: {}", link.display(), e),
            })?;
    }

    info!(
        "Staged environment: {} variables, {} directories, {} links",
        scope.env().len(),
        scope.directories().len(),
        scope.links().len()
    );

    Ok(())
}

fn environment_error(e: crate::Error) -> PipelineError {
    PipelineError::Environment {
        message: e.to_string(),
    }
}
