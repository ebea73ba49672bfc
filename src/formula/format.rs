// src/formula/format.rs

//! Formula file format definitions
//!
//! A formula is a TOML file describing how to fetch, build, install and
//! smoke-test one package from source. Formulas are plain data: every
//! formula runs through the same pipeline, and all per-package behavior
//! lives in the fields below.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// A complete formula
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    /// Package metadata
    pub package: PackageSection,

    /// Source channels
    pub source: SourceSection,

    /// Declared dependencies
    #[serde(default)]
    pub dependencies: Vec<Dependency>,

    /// The install procedure: staged environment, build steps, artifacts
    pub install: InstallSection,

    /// Post-install smoke test (optional)
    #[serde(default)]
    pub test: Option<TestSection>,

    /// Variables for substitution (optional)
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl Formula {
    /// Version string, empty when the formula does not declare one
    pub fn version(&self) -> &str {
        self.package.version.as_deref().unwrap_or("")
    }

    /// Raw locator for a channel, with `%(name)s`/`%(version)s` expanded
    pub fn locator(&self, channel: Channel) -> Option<String> {
        let raw = match channel {
            Channel::Stable => self.source.stable.as_deref(),
            Channel::Head => self.source.head.as_deref(),
        }?;
        Some(Substitutions::for_formula(self).apply(raw))
    }

    /// Channels this formula can be built from
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels = Vec::new();
        if self.source.stable.is_some() {
            channels.push(Channel::Stable);
        }
        if self.source.head.is_some() {
            channels.push(Channel::Head);
        }
        channels
    }

    /// Dependencies that must be present before the build runs
    pub fn build_dependencies(&self) -> Vec<&str> {
        self.dependencies_for(DependencyStage::Build)
    }

    /// Dependencies recorded for the installed package
    pub fn runtime_dependencies(&self) -> Vec<&str> {
        self.dependencies_for(DependencyStage::Runtime)
    }

    fn dependencies_for(&self, stage: DependencyStage) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter(|d| d.stage == stage)
            .map(|d| d.name.as_str())
            .collect()
    }

    /// Whether a post-install test procedure is declared
    pub fn has_test(&self) -> bool {
        self.test.as_ref().is_some_and(|t| !t.steps.is_empty())
    }
}

/// Package metadata section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSection {
    /// Formula name, unique within a formula set
    pub name: String,

    /// Package version
    #[serde(default)]
    pub version: Option<String>,

    /// One-line description
    #[serde(default)]
    pub description: Option<String>,

    /// Homepage URL
    #[serde(default)]
    pub homepage: Option<String>,

    /// License identifier (SPDX)
    #[serde(default)]
    pub license: Option<String>,
}

/// Source channels
///
/// At least one of `stable` and `head` must be set. `url` is accepted as
/// an alias for `stable`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSection {
    /// Released source (archive, VCS URL or local path)
    #[serde(default, alias = "url")]
    pub stable: Option<String>,

    /// Development source, usually a VCS URL
    #[serde(default)]
    pub head: Option<String>,

    /// Checksum for archive sources (`sha256:<hex>`)
    #[serde(default)]
    pub checksum: Option<String>,

    /// Branch or tag to check out for VCS sources
    #[serde(default)]
    pub revision: Option<String>,
}

/// Which source channel a run builds from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Stable,
    Head,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Head => "head",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,

    #[serde(default)]
    pub stage: DependencyStage,
}

/// When a dependency is needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyStage {
    /// Needed before the build runs; never bundled into the install
    Build,
    /// Needed by the installed package
    #[default]
    Runtime,
}

/// The install procedure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallSection {
    /// Variables exported to build and install commands
    ///
    /// Supports `%(variable)s` substitution.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Directories to create, relative to the Working Directory
    #[serde(default)]
    pub directories: Vec<String>,

    /// Symbolic links to create inside the Working Directory
    #[serde(default)]
    pub links: Vec<LinkSpec>,

    /// Subdirectory of the source tree the build steps run in
    #[serde(default)]
    pub workdir: Option<String>,

    /// Build steps, run in order; the first failure stops the build
    #[serde(default)]
    pub steps: Vec<CommandSpec>,

    /// Install commands, run with `DESTDIR` pointing at the staging area
    #[serde(default)]
    pub commands: Vec<CommandSpec>,

    /// Build outputs to copy into the Install Prefix
    #[serde(default)]
    pub artifacts: Vec<ArtifactSpec>,
}

/// A symbolic link staged for the build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    /// Link path, relative to the Working Directory
    pub link: String,
    /// What the link points at (substituted, may be absolute)
    pub target: String,
}

/// A declared build output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Path relative to the build directory
    pub source: String,
    /// Path relative to the Install Prefix; a trailing `/` keeps the
    /// source file name
    pub destination: String,
}

impl ArtifactSpec {
    /// Destination with directory-style destinations resolved
    pub fn resolved_destination(&self) -> String {
        if self.destination.ends_with('/') {
            let file_name = Path::new(&self.source)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            format!("{}{}", self.destination, file_name)
        } else {
            self.destination.clone()
        }
    }
}

/// Post-install smoke test
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestSection {
    #[serde(default)]
    pub steps: Vec<CommandSpec>,
}

/// A single external command
///
/// An array is executed directly; a string goes through `sh -c`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Argv(Vec<String>),
    Shell(String),
}

impl CommandSpec {
    /// Expand `%(name)s` placeholders in every part of the command
    pub fn substitute(&self, subs: &Substitutions) -> Self {
        match self {
            Self::Argv(argv) => Self::Argv(argv.iter().map(|a| subs.apply(a)).collect()),
            Self::Shell(script) => Self::Shell(subs.apply(script)),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Argv(argv) => argv.first().is_none_or(|p| p.trim().is_empty()),
            Self::Shell(script) => script.trim().is_empty(),
        }
    }

    /// Program name used in log lines and error messages
    pub fn program(&self) -> &str {
        match self {
            Self::Argv(argv) => argv.first().map(String::as_str).unwrap_or(""),
            Self::Shell(_) => "sh",
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argv(argv) => f.write_str(&argv.join(" ")),
            Self::Shell(script) => f.write_str(script),
        }
    }
}

/// `%(name)s` substitution table
///
/// Built-in variables are replaced first, then the formula's own
/// `[variables]`. Custom values may themselves reference built-ins.
#[derive(Debug, Clone, Default)]
pub struct Substitutions {
    builtins: Vec<(String, String)>,
    custom: BTreeMap<String, String>,
}

impl Substitutions {
    /// Table holding `name`, `version` and the formula's variables
    pub fn for_formula(formula: &Formula) -> Self {
        let mut subs = Self {
            builtins: Vec::new(),
            custom: formula.variables.clone(),
        };
        subs.set("name", &formula.package.name);
        subs.set("version", formula.version());
        subs
    }

    /// Set a built-in variable, replacing any previous value
    pub fn set(&mut self, key: &str, value: &str) {
        match self.builtins.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.builtins.push((key.to_string(), value.to_string())),
        }
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    /// Add `buildpath`
    pub fn with_buildpath(self, buildpath: &Path) -> Self {
        self.with("buildpath", &buildpath.to_string_lossy())
    }

    /// Add `prefix` and the standard prefix subdirectories
    pub fn with_prefix(mut self, prefix: &Path) -> Self {
        self.set("prefix", &prefix.to_string_lossy());
        for dir in ["bin", "sbin", "lib", "libexec", "share", "include", "etc"] {
            self.set(dir, &prefix.join(dir).to_string_lossy());
        }
        self
    }

    /// Replace every known placeholder in `template`
    pub fn apply(&self, template: &str) -> String {
        let mut result = self.apply_builtins(template);
        for (key, value) in &self.custom {
            result = result.replace(&format!("%({})s", key), &self.apply_builtins(value));
        }
        result
    }

    fn apply_builtins(&self, template: &str) -> String {
        let mut result = template.to_string();
        for (key, value) in &self.builtins {
            result = result.replace(&format!("%({})s", key), value);
        }
        result
    }
}
