// src/pipeline/source.rs

//! Source Resolver: turn a source locator into a populated tree
//!
//! Locators are parsed up front, before any network or filesystem
//! activity, so a malformed locator fails the run without side effects.
//! The transfer itself sits behind [`SourceFetcher`]; [`NetworkFetcher`]
//! is the default implementation using `git`, `reqwest` and `tar`.

use super::command::{StepFailure, run_command};
use crate::error::{Error, Result};
use crate::filesystem::path::copy_tree;
use crate::formula::CommandSpec;
use crate::hash::{Checksum, verify_file};
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;
use walkdir::WalkDir;

/// Archive formats `tar` can unpack for us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    TarXz,
    TarBz2,
    TarZst,
    Tar,
}

impl ArchiveFormat {
    /// Detect the format from a file name or URL path
    pub fn detect(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            Some(Self::TarBz2)
        } else if name.ends_with(".tar.zst") {
            Some(Self::TarZst)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }

    fn tar_flags(&self) -> &'static [&'static str] {
        match self {
            Self::TarGz => &["-xzf"],
            Self::TarXz => &["-xJf"],
            Self::TarBz2 => &["-xjf"],
            Self::TarZst => &["--zstd", "-xf"],
            Self::Tar => &["-xf"],
        }
    }
}

/// A parsed source locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// Version-controlled source, cloned with `git`
    Git { url: String, revision: Option<String> },
    /// Remote tarball, verified against its checksum before unpacking
    Archive {
        url: Url,
        format: ArchiveFormat,
        checksum: Checksum,
    },
    /// Local directory (copied) or local tarball (unpacked)
    Local {
        path: PathBuf,
        checksum: Option<Checksum>,
    },
}

impl SourceLocator {
    /// Parse a locator string
    ///
    /// Pure: performs no I/O. `checksum` is required for remote archives
    /// and `revision` selects a branch or tag for VCS sources.
    pub fn parse(raw: &str, checksum: Option<&str>, revision: Option<&str>) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidLocator("empty source locator".to_string()));
        }
        let revision = revision.map(str::to_string);

        // scp-style git address: git@host:owner/repo.git
        if let Some(rest) = raw.strip_prefix("git@") {
            return match rest.split_once(':') {
                Some((host, path)) if !host.is_empty() && !path.is_empty() && !host.contains('/') => {
                    Ok(Self::Git {
                        url: raw.to_string(),
                        revision,
                    })
                }
                _ => Err(Error::InvalidLocator(format!("malformed git address: {}", raw))),
            };
        }

        if let Some(inner) = raw.strip_prefix("git+") {
            let url = parse_url(inner)?;
            return match url.scheme() {
                "http" | "https" | "ssh" | "git" | "file" => Ok(Self::Git {
                    url: url.to_string(),
                    revision,
                }),
                other => Err(Error::InvalidLocator(format!(
                    "unsupported git transport '{}': {}",
                    other, raw
                ))),
            };
        }

        if raw.starts_with('/') {
            return Self::local(PathBuf::from(raw), checksum);
        }

        let url = parse_url(raw)?;
        match url.scheme() {
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| Error::InvalidLocator(format!("invalid file URL: {}", raw)))?;
                Self::local(path, checksum)
            }
            "git" | "ssh" => Ok(Self::Git {
                url: url.to_string(),
                revision,
            }),
            "http" | "https" => {
                if url.host_str().is_none_or(str::is_empty) {
                    return Err(Error::InvalidLocator(format!("URL has no host: {}", raw)));
                }
                if url.path().ends_with(".git") {
                    return Ok(Self::Git {
                        url: url.to_string(),
                        revision,
                    });
                }
                let format = ArchiveFormat::detect(url.path()).ok_or_else(|| {
                    Error::InvalidLocator(format!(
                        "cannot tell source type of {} (expected .git or a tar archive)",
                        raw
                    ))
                })?;
                let checksum = checksum.ok_or_else(|| {
                    Error::InvalidLocator(format!("archive source {} requires a checksum", raw))
                })?;
                let checksum = Checksum::parse(checksum)
                    .map_err(|e| Error::InvalidLocator(e.to_string()))?;
                Ok(Self::Archive {
                    url,
                    format,
                    checksum,
                })
            }
            other => Err(Error::InvalidLocator(format!(
                "unsupported scheme '{}': {}",
                other, raw
            ))),
        }
    }

    fn local(path: PathBuf, checksum: Option<&str>) -> Result<Self> {
        let checksum = checksum
            .map(Checksum::parse)
            .transpose()
            .map_err(|e| Error::InvalidLocator(e.to_string()))?;
        Ok(Self::Local { path, checksum })
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::InvalidLocator(format!("{}: {}", raw, e)))
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Git { url, revision: Some(rev) } => write!(f, "{}#{}", url, rev),
            Self::Git { url, revision: None } => f.write_str(url),
            Self::Archive { url, .. } => f.write_str(url.as_str()),
            Self::Local { path, .. } => write!(f, "{}", path.display()),
        }
    }
}

/// Transfers a source into a directory
///
/// `dest` is an empty directory inside the Working Directory. The returned
/// path is the tree root, which may be a subdirectory of `dest` when an
/// archive unpacks into a single top-level directory.
pub trait SourceFetcher: Send + Sync {
    fn fetch(&self, locator: &SourceLocator, dest: &Path) -> Result<PathBuf>;
}

/// Fetches over the network with `git` and `reqwest`
pub struct NetworkFetcher {
    timeout: Duration,
}

impl NetworkFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn clone_repo(&self, url: &str, revision: Option<&str>, dest: &Path) -> Result<PathBuf> {
        info!("Cloning {}", url);

        let mut argv: Vec<String> = ["git", "clone", "--depth", "1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        if let Some(rev) = revision {
            argv.push("--branch".to_string());
            argv.push(rev.to_string());
        }
        argv.push(url.to_string());
        argv.push(dest.to_string_lossy().to_string());

        let cwd = dest.parent().unwrap_or(dest);
        run_command(&CommandSpec::Argv(argv), cwd, &[], self.timeout).map_err(|e| {
            Error::DownloadError(format!(
                "git clone {} {}: {}",
                url,
                e.reason,
                e.output.stderr.trim()
            ))
        })?;

        Ok(dest.to_path_buf())
    }

    fn download(&self, url: &Url, dest: &Path) -> Result<()> {
        info!("Downloading {}", url);

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::DownloadError(format!("Failed to create HTTP client: {}", e)))?;

        let mut response = client
            .get(url.clone())
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::DownloadError(format!("Failed to download {}: {}", url, e)))?;

        let mut file = File::create(dest)?;
        response
            .copy_to(&mut file)
            .map_err(|e| Error::DownloadError(format!("Failed to read body of {}: {}", url, e)))?;
        file.sync_all()?;

        Ok(())
    }

    fn unpack(&self, archive: &Path, format: ArchiveFormat, dest: &Path) -> Result<PathBuf> {
        let mut argv: Vec<String> = vec!["tar".to_string()];
        argv.extend(format.tar_flags().iter().map(|s| s.to_string()));
        argv.push(archive.to_string_lossy().to_string());
        argv.push("-C".to_string());
        argv.push(dest.to_string_lossy().to_string());

        run_command(&CommandSpec::Argv(argv), dest, &[], self.timeout).map_err(|e| {
            let detail = match e.reason {
                StepFailure::Spawn(msg) => msg,
                other => format!("{}: {}", other, e.output.stderr.trim()),
            };
            Error::IoError(format!("Failed to extract {}: {}", archive.display(), detail))
        })?;

        single_top_level_dir(dest)
    }
}

impl Default for NetworkFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl SourceFetcher for NetworkFetcher {
    fn fetch(&self, locator: &SourceLocator, dest: &Path) -> Result<PathBuf> {
        match locator {
            SourceLocator::Git { url, revision } => self.clone_repo(url, revision.as_deref(), dest),
            SourceLocator::Archive {
                url,
                format,
                checksum,
            } => {
                let parent = dest.parent().unwrap_or(dest);
                let download = tempfile::Builder::new()
                    .prefix(".download-")
                    .tempfile_in(parent)?;

                self.download(url, download.path())?;
                verify_file(download.path(), checksum)?;
                debug!("Checksum verified: {}", checksum);

                self.unpack(download.path(), *format, dest)
            }
            SourceLocator::Local { path, checksum } => {
                let metadata = fs::metadata(path).map_err(|e| {
                    Error::NotFound(format!("Local source {}: {}", path.display(), e))
                })?;

                if metadata.is_dir() {
                    info!("Copying local source {}", path.display());
                    copy_tree(path, dest)?;
                    return Ok(dest.to_path_buf());
                }

                let name = path.to_string_lossy();
                let format = ArchiveFormat::detect(&name).ok_or_else(|| {
                    Error::InvalidLocator(format!(
                        "{} is neither a directory nor a tar archive",
                        name
                    ))
                })?;
                if let Some(checksum) = checksum {
                    verify_file(path, checksum)?;
                }
                self.unpack(path, format, dest)
            }
        }
    }
}

/// Descend into an archive's single top-level directory, if it has one
fn single_top_level_dir(dest: &Path) -> Result<PathBuf> {
    let entries: Vec<_> = fs::read_dir(dest)?.filter_map(|e| e.ok()).collect();

    if entries.len() == 1 && entries[0].file_type().map(|t| t.is_dir()).unwrap_or(false) {
        let root = entries[0].path();
        debug!("Source directory: {}", root.display());
        return Ok(root);
    }

    Ok(dest.to_path_buf())
}

/// Check that a fetched tree exists, is readable and holds at least one file
///
/// VCS metadata does not count as content.
pub fn ensure_populated(root: &Path) -> Result<()> {
    let metadata = fs::metadata(root)
        .map_err(|e| Error::NotFound(format!("Source tree {}: {}", root.display(), e)))?;
    if !metadata.is_dir() {
        return Err(Error::InvalidPath(format!(
            "Source tree {} is not a directory",
            root.display()
        )));
    }

    let has_file = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(|e| e.ok())
        .any(|e| !e.file_type().is_dir());

    if !has_file {
        return Err(Error::NotFound(format!(
            "Source tree {} is empty",
            root.display()
        )));
    }

    Ok(())
}
