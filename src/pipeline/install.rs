// src/pipeline/install.rs

//! Installer
//!
//! Copies declared build outputs into the Install Prefix without ever
//! leaving it half-written:
//!
//! 1. every declared artifact is checked before the prefix is touched
//! 2. artifacts are copied into a staging directory inside the prefix, so
//!    the final moves are same-filesystem renames
//! 3. install commands run with `DESTDIR` pointing at the staging area
//! 4. staged files are renamed into place; anything they replace is moved
//!    aside first and restored if a later move fails

use super::command::RunLog;
use super::executor::{StepContext, run_steps};
use super::result::PipelineError;
use crate::filesystem::path::{copy_tree, move_file_atomic, safe_join, sanitize_path};
use crate::formula::{ArtifactSpec, CommandSpec, Substitutions};
use std::fs;
use std::io;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Everything the Installer needs from the rest of the run
pub struct InstallPlan<'a> {
    pub prefix: &'a Path,
    /// Directory artifact sources are relative to
    pub build_dir: &'a Path,
    pub artifacts: &'a [ArtifactSpec],
    pub commands: &'a [CommandSpec],
    pub subs: &'a Substitutions,
    /// Staged environment variables
    pub env: &'a [(String, String)],
    pub timeout: Duration,
}

/// A declared artifact after substitution and validation
#[derive(Debug)]
struct ResolvedArtifact {
    source: PathBuf,
    destination: PathBuf,
    /// Absolute target when the artifact is a link leaving the build directory
    link_target: Option<PathBuf>,
}

/// Install the build outputs into the prefix
///
/// Returns the absolute paths written into the prefix.
pub fn install(plan: &InstallPlan<'_>, log: &mut RunLog) -> Result<Vec<PathBuf>, PipelineError> {
    let artifacts = resolve_artifacts(plan)?;

    let created_prefix = !plan.prefix.exists();
    fs::create_dir_all(plan.prefix).map_err(|e| {
        PipelineError::install(format!(
            "cannot create install prefix {}: {}",
            plan.prefix.display(),
            e
        ))
    })?;

    let result = stage_and_commit(plan, &artifacts, log);

    if result.is_err() && created_prefix {
        let _ = fs::remove_dir(plan.prefix);
    }
    result
}

/// Substitute and validate every declared artifact up front
fn resolve_artifacts(plan: &InstallPlan<'_>) -> Result<Vec<ResolvedArtifact>, PipelineError> {
    let mut resolved = Vec::with_capacity(plan.artifacts.len());

    for artifact in plan.artifacts {
        let spec = ArtifactSpec {
            source: plan.subs.apply(&artifact.source),
            destination: plan.subs.apply(&artifact.destination),
        };

        let source = safe_join(plan.build_dir, &spec.source)
            .map_err(|e| PipelineError::install(format!("artifact {}: {}", spec.source, e)))?;
        let Ok(metadata) = fs::symlink_metadata(&source) else {
            return Err(PipelineError::install(format!(
                "declared artifact {} was not produced by the build",
                spec.source
            )));
        };
        let (source, link_target) = if metadata.file_type().is_symlink() {
            resolve_link(plan.build_dir, source, &spec.source)?
        } else {
            (source, None)
        };

        let destination = sanitize_path(spec.resolved_destination()).map_err(|e| {
            PipelineError::install(format!("artifact destination {}: {}", spec.destination, e))
        })?;

        resolved.push(ResolvedArtifact {
            source,
            destination,
            link_target,
        });
    }

    Ok(resolved)
}

/// Follow an artifact that is a symlink
///
/// Links into the build directory are replaced by what they point at,
/// since the build directory is gone once the run ends. Links that leave
/// it are installed as links to their absolute target.
fn resolve_link(
    build_dir: &Path,
    source: PathBuf,
    declared: &str,
) -> Result<(PathBuf, Option<PathBuf>), PipelineError> {
    let target = fs::canonicalize(&source).map_err(|e| {
        PipelineError::install(format!("artifact {} is a dangling link: {}", declared, e))
    })?;
    let build_dir = fs::canonicalize(build_dir).map_err(|e| {
        PipelineError::install(format!("build directory {}: {}", build_dir.display(), e))
    })?;

    if target.starts_with(&build_dir) {
        debug!("Dereferencing artifact {} -> {}", declared, target.display());
        Ok((target, None))
    } else {
        Ok((source, Some(target)))
    }
}

fn stage_and_commit(
    plan: &InstallPlan<'_>,
    artifacts: &[ResolvedArtifact],
    log: &mut RunLog,
) -> Result<Vec<PathBuf>, PipelineError> {
    let staging = create_staging(plan.prefix).map_err(|e| {
        PipelineError::install(format!(
            "install prefix {} is not writable: {}",
            plan.prefix.display(),
            e
        ))
    })?;

    for artifact in artifacts {
        stage_artifact(artifact, staging.path()).map_err(|e| {
            PipelineError::install(format!(
                "failed to stage {} as {}: {}",
                artifact.source.display(),
                artifact.destination.display(),
                e
            ))
        })?;
        log.line(&format!(
            "staged {} -> {}",
            artifact.source.display(),
            artifact.destination.display()
        ));
    }

    if !plan.commands.is_empty() {
        let destdir = staging.path().to_string_lossy().to_string();
        let subs = plan.subs.clone().with("destdir", &destdir);
        let mut env = plan.env.to_vec();
        env.push(("DESTDIR".to_string(), destdir));

        let ctx = StepContext {
            phase: "install",
            subs: &subs,
            cwd: plan.build_dir,
            env: &env,
            timeout: plan.timeout,
        };
        run_steps(&ctx, plan.commands, log, |step, err| PipelineError::Install {
            message: format!("install command `{}` {}", step, err.reason),
            output: err.output,
        })?;
    }

    let staged = collect_staged(staging.path()).map_err(|e| {
        PipelineError::install(format!("failed to read staging area: {}", e))
    })?;
    if staged.is_empty() {
        return Err(PipelineError::install("nothing was staged for installation"));
    }

    preflight(plan.prefix, &staged)?;

    let backup = tempfile::Builder::new()
        .prefix(".formulary-backup-")
        .tempdir_in(plan.prefix)
        .map_err(|e| PipelineError::install(format!("cannot create backup area: {}", e)))?;

    let installed = commit(staging.path(), plan.prefix, backup.path(), &staged)
        .map_err(|e| PipelineError::install(format!("failed to install into prefix: {}", e)))?;

    for path in &installed {
        log.line(&format!("installed {}", path.display()));
    }
    info!("Installed {} files into {}", installed.len(), plan.prefix.display());

    Ok(installed)
}

/// Create the staging directory inside `prefix`
///
/// A concurrent run that created an empty prefix removes it again when it
/// fails, so the prefix is recreated if it vanished in between.
fn create_staging(prefix: &Path) -> io::Result<TempDir> {
    let mut attempts = 0;
    loop {
        let result = tempfile::Builder::new()
            .prefix(".formulary-staging-")
            .tempdir_in(prefix);
        match result {
            Err(e) if e.kind() == io::ErrorKind::NotFound && attempts < 3 => {
                attempts += 1;
                debug!("Install prefix {} disappeared, recreating", prefix.display());
                fs::create_dir_all(prefix)?;
            }
            other => return other,
        }
    }
}

/// Copy one artifact into the staging area
fn stage_artifact(artifact: &ResolvedArtifact, staging: &Path) -> io::Result<()> {
    let target = staging.join(&artifact.destination);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    if let Some(link_target) = &artifact.link_target {
        symlink(link_target, &target)?;
        return Ok(());
    }

    let metadata = fs::metadata(&artifact.source)?;
    if metadata.is_dir() {
        copy_tree(&artifact.source, &target).map_err(|e| io::Error::other(e.to_string()))?;
    } else {
        fs::copy(&artifact.source, &target)?;
    }

    if is_executable_destination(&artifact.destination) {
        make_executable(&target)?;
    }

    Ok(())
}

fn is_executable_destination(destination: &Path) -> bool {
    destination
        .components()
        .next()
        .is_some_and(|c| c.as_os_str() == "bin" || c.as_os_str() == "sbin")
}

/// Add execute bits to a file, or to every regular file under a directory
fn make_executable(path: &Path) -> io::Result<()> {
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() {
            let mut perms = entry.metadata().map_err(io::Error::other)?.permissions();
            perms.set_mode(perms.mode() | 0o755);
            fs::set_permissions(entry.path(), perms)?;
        }
    }
    Ok(())
}

/// Relative paths of every non-directory entry in the staging area
fn collect_staged(staging: &Path) -> io::Result<Vec<PathBuf>> {
    let mut staged = Vec::new();
    for entry in WalkDir::new(staging).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_dir() {
            let relative = entry
                .path()
                .strip_prefix(staging)
                .map_err(io::Error::other)?
                .to_path_buf();
            staged.push(relative);
        }
    }
    Ok(staged)
}

/// Refuse to replace directories with files or to nest files under files
fn preflight(prefix: &Path, staged: &[PathBuf]) -> Result<(), PipelineError> {
    for relative in staged {
        let dest = prefix.join(relative);
        if let Ok(meta) = fs::symlink_metadata(&dest)
            && meta.is_dir()
        {
            return Err(PipelineError::install(format!(
                "{} already exists as a directory",
                dest.display()
            )));
        }

        let mut ancestor = relative.parent();
        while let Some(dir) = ancestor.filter(|d| !d.as_os_str().is_empty()) {
            let path = prefix.join(dir);
            if let Ok(meta) = fs::metadata(&path)
                && !meta.is_dir()
            {
                return Err(PipelineError::install(format!(
                    "{} is in the way of {}",
                    path.display(),
                    dest.display()
                )));
            }
            ancestor = dir.parent();
        }
    }
    Ok(())
}

/// One completed move, kept so it can be undone
struct Committed {
    dest: PathBuf,
    backup: Option<PathBuf>,
}

/// Rename staged files into the prefix, rolling back on the first failure
fn commit(
    staging: &Path,
    prefix: &Path,
    backup_root: &Path,
    staged: &[PathBuf],
) -> io::Result<Vec<PathBuf>> {
    let mut committed: Vec<Committed> = Vec::new();
    let mut created_dirs: Vec<PathBuf> = Vec::new();

    for relative in staged {
        let src = staging.join(relative);
        let dest = prefix.join(relative);

        let backup = backup_root.join(relative);
        if let Err(e) = commit_one(&src, &dest, &backup, &mut committed, &mut created_dirs) {
            warn!("Install of {} failed, rolling back: {}", dest.display(), e);
            rollback(committed, created_dirs);
            return Err(e);
        }
    }

    Ok(committed.into_iter().map(|c| c.dest).collect())
}

fn commit_one(
    src: &Path,
    dest: &Path,
    backup: &Path,
    committed: &mut Vec<Committed>,
    created_dirs: &mut Vec<PathBuf>,
) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        let mut missing: Vec<PathBuf> = parent
            .ancestors()
            .take_while(|a| !a.exists())
            .map(Path::to_path_buf)
            .collect();
        fs::create_dir_all(parent)?;
        missing.reverse();
        created_dirs.extend(missing);
    }

    let moved_aside = if fs::symlink_metadata(dest).is_ok() {
        if let Some(parent) = backup.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(dest, backup)?;
        debug!("Moved aside {}", dest.display());
        Some(backup.to_path_buf())
    } else {
        None
    };

    if let Err(e) = move_file_atomic(src, dest) {
        if let Some(backup) = &moved_aside {
            let _ = fs::rename(backup, dest);
        }
        return Err(e);
    }

    committed.push(Committed {
        dest: dest.to_path_buf(),
        backup: moved_aside,
    });
    Ok(())
}

fn rollback(committed: Vec<Committed>, created_dirs: Vec<PathBuf>) {
    for entry in committed.into_iter().rev() {
        if let Err(e) = fs::remove_file(&entry.dest) {
            warn!("Rollback: failed to remove {}: {}", entry.dest.display(), e);
        }
        if let Some(backup) = entry.backup
            && let Err(e) = fs::rename(&backup, &entry.dest)
        {
            warn!("Rollback: failed to restore {}: {}", entry.dest.display(), e);
        }
    }
    // Deepest first; a directory someone else wrote into meanwhile stays.
    for dir in created_dirs.into_iter().rev() {
        match fs::remove_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!("Rollback: keeping {}: {}", dir.display(), e),
        }
    }
}
