// src/filesystem/path.rs

//! Path sanitization and tree copying
//!
//! Formula files are untrusted input: artifact destinations, staged
//! directories and link names all pass through [`sanitize_path`] or
//! [`safe_join`] before they touch the filesystem, so a formula cannot
//! write outside the Working Directory or the Install Prefix.

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Sanitize a relative path taken from a formula
///
/// Rejects `..` components, drops `.` components and strips leading
/// slashes. An empty result is an error.
///
/// ```
/// use formulary::filesystem::path::sanitize_path;
/// use std::path::PathBuf;
///
/// assert_eq!(sanitize_path("bin/pkg").unwrap(), PathBuf::from("bin/pkg"));
/// assert_eq!(sanitize_path("/bin/pkg").unwrap(), PathBuf::from("bin/pkg"));
/// assert!(sanitize_path("../etc/passwd").is_err());
/// ```
pub fn sanitize_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let path_str = path.to_string_lossy();
    let relative = path_str.trim_start_matches('/');

    let mut normalized = PathBuf::new();

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::PathTraversal(path_str.to_string()));
            }
            Component::Prefix(_) | Component::RootDir => {}
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Error::InvalidPath(format!(
            "Empty path after sanitization: '{}'",
            path_str
        )));
    }

    Ok(normalized)
}

/// Join an untrusted relative path onto `root`
///
/// When both sides already exist they are canonicalized and compared, which
/// catches a symlink inside `root` pointing back out of it.
pub fn safe_join(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<PathBuf> {
    let root = root.as_ref();
    let sanitized = sanitize_path(path.as_ref())?;
    let joined = root.join(&sanitized);

    if let (Ok(canonical_root), Ok(canonical_joined)) =
        (root.canonicalize(), joined.canonicalize())
        && !canonical_joined.starts_with(&canonical_root)
    {
        return Err(Error::PathTraversal(format!(
            "Path {} escapes root {}",
            joined.display(),
            root.display()
        )));
    }

    Ok(joined)
}

/// Sanitize a single file name (no separators allowed)
pub fn sanitize_filename(name: &str) -> Result<String> {
    if name.contains('/') || name.contains('\\') {
        return Err(Error::PathTraversal(format!(
            "Filename contains path separator: {}",
            name
        )));
    }
    if name == ".." || name == "." {
        return Err(Error::PathTraversal(format!("Invalid filename: {}", name)));
    }
    if name.is_empty() {
        return Err(Error::InvalidPath("Empty filename".to_string()));
    }

    Ok(name.to_string())
}

/// Recursively copy `src` into `dst`
///
/// Regular files keep their permission bits, symlinks are recreated as
/// symlinks and directories are created as needed. Returns the number of
/// non-directory entries copied.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<usize> {
    let mut copied = 0;

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            Error::IoError(format!("Failed to walk {}: {}", src.display(), e))
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::InvalidPath(e.to_string()))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link_target = fs::read_link(entry.path())?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            symlink(&link_target, &target)?;
            copied += 1;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    debug!("Copied {} entries from {} to {}", copied, src.display(), dst.display());
    Ok(copied)
}

/// Move a file, falling back to copy and delete across filesystems
///
/// A plain rename is atomic on the same filesystem. On `EXDEV` the content
/// is copied, synced to disk and only then is the source removed.
pub fn move_file_atomic(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            debug!(
                "Cross-filesystem move ({} -> {}), using copy fallback",
                src.display(),
                dst.display()
            );

            fs::copy(src, dst)?;
            File::open(dst)?.sync_all()?;

            if let Some(parent) = dst.parent()
                && let Ok(dir) = File::open(parent)
            {
                // Not every filesystem supports directory fsync
                let _ = dir.sync_all();
            }

            fs::remove_file(src)
        }
        Err(e) => Err(e),
    }
}
