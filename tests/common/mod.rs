// tests/common/mod.rs

//! Shared fixtures for pipeline integration tests.
//!
//! Runs never touch the network: [`FixtureFetcher`] stands in for the
//! Source Resolver's transport and copies a prepared tree instead.

#![allow(dead_code)]

use formulary::filesystem::copy_tree;
use formulary::pipeline::{DependencyResolver, NoopResolver, SourceFetcher, SourceLocator};
use formulary::{Formula, Pipeline, PipelineConfig, parse_formula};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use walkdir::WalkDir;

/// How the fixture's `build.sh` behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildBehavior {
    /// Writes an `out/pkg` that answers `--version`
    Succeeds,
    /// Exits 1 without producing anything
    Fails,
    /// Exits 0 without producing `out/pkg`
    NoArtifact,
    /// Writes an `out/pkg` whose `--version` exits 1
    BrokenBinary,
}

/// Isolated filesystem for one test: source tree, prefix, work root, state
pub struct Sandbox {
    root: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("tree")).unwrap();
        Self { root }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Prepared source tree the fetcher hands out
    pub fn tree(&self) -> PathBuf {
        self.root.path().join("tree")
    }

    /// Install Prefix (not created up front)
    pub fn prefix(&self) -> PathBuf {
        self.root.path().join("prefix")
    }

    pub fn work_root(&self) -> PathBuf {
        self.root.path().join("work")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.path().join("state")
    }

    pub fn config(&self) -> PipelineConfig {
        PipelineConfig::isolated(self.prefix(), self.work_root())
    }

    /// Write `build.sh` into the source tree
    pub fn write_build_script(&self, behavior: BuildBehavior) {
        let script = match behavior {
            BuildBehavior::Succeeds => {
                "#!/bin/sh\nmkdir -p out\nprintf '#!/bin/sh\\necho \"pkg 1.0\"\\n' > out/pkg\n"
            }
            BuildBehavior::Fails => "#!/bin/sh\necho 'compile error' >&2\nexit 1\n",
            BuildBehavior::NoArtifact => "#!/bin/sh\nmkdir -p out\necho built\n",
            BuildBehavior::BrokenBinary => {
                "#!/bin/sh\nmkdir -p out\nprintf '#!/bin/sh\\necho broken >&2\\nexit 1\\n' > out/pkg\n"
            }
        };
        write_executable(&self.tree().join("build.sh"), script);
    }

    /// Pipeline with a fixture fetcher over this sandbox's tree
    pub fn pipeline(&self) -> (Pipeline, Arc<FixtureFetcher>) {
        self.pipeline_with(self.config(), Arc::new(NoopResolver))
    }

    pub fn pipeline_with(
        &self,
        config: PipelineConfig,
        resolver: Arc<dyn DependencyResolver>,
    ) -> (Pipeline, Arc<FixtureFetcher>) {
        self.pipeline_over(self.tree(), config, resolver)
    }

    /// An additional source tree next to the default one
    pub fn extra_tree(&self, name: &str) -> PathBuf {
        let tree = self.root.path().join(format!("tree-{}", name));
        fs::create_dir_all(&tree).unwrap();
        tree
    }

    /// Pipeline whose fetcher hands out `tree`
    pub fn pipeline_over(
        &self,
        tree: PathBuf,
        config: PipelineConfig,
        resolver: Arc<dyn DependencyResolver>,
    ) -> (Pipeline, Arc<FixtureFetcher>) {
        let fetcher = Arc::new(FixtureFetcher::new(tree));
        let pipeline = Pipeline::new(config)
            .with_fetcher(fetcher.clone())
            .with_resolver(resolver);
        (pipeline, fetcher)
    }
}

pub fn write_executable(path: &Path, contents: &str) {
    fs::write(path, contents).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Fetcher that copies a local tree, whatever the locator says
pub struct FixtureFetcher {
    tree: PathBuf,
    calls: AtomicUsize,
}

impl FixtureFetcher {
    pub fn new(tree: PathBuf) -> Self {
        Self {
            tree,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SourceFetcher for FixtureFetcher {
    fn fetch(&self, _locator: &SourceLocator, dest: &Path) -> formulary::Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        copy_tree(&self.tree, dest)?;
        Ok(dest.to_path_buf())
    }
}

/// Resolver that reports a fixed set of tools as missing
pub struct MissingTools(pub Vec<String>);

impl DependencyResolver for MissingTools {
    fn check_missing(&self, deps: &[&str]) -> formulary::Result<Vec<String>> {
        Ok(deps
            .iter()
            .filter(|d| self.0.iter().any(|m| m == *d))
            .map(|d| d.to_string())
            .collect())
    }
}

/// The reference formula: `sh build.sh`, install `out/pkg` to `bin/pkg`,
/// test with `pkg --version`
pub const PKG_FORMULA: &str = r#"
[package]
name = "pkg"
version = "1.0"
description = "Test package"
license = "MIT"

[source]
stable = "https://example.com/pkg.git"

[install]
steps = [["sh", "build.sh"]]
artifacts = [{ source = "out/pkg", destination = "bin/pkg" }]

[test]
steps = ["pkg --version"]
"#;

pub fn pkg_formula() -> Formula {
    parse_formula(PKG_FORMULA).unwrap()
}

/// Every regular file and symlink under `root`, with contents
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    if !root.exists() {
        return BTreeMap::new();
    }
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_type().is_dir())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            let contents = if e.file_type().is_symlink() {
                fs::read_link(e.path())
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
                    .into_bytes()
            } else {
                fs::read(e.path()).unwrap()
            };
            (rel, contents)
        })
        .collect()
}

/// Entries directly under `dir`, empty when it does not exist
pub fn entries(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(read) => read.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}
