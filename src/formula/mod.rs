// src/formula/mod.rs

//! Formula loading
//!
//! Formulas are TOML files describing how to fetch, build, install and
//! smoke-test a package from source. See [`format`] for the structure and
//! [`parser`] for loading and validation.

pub mod format;
pub mod parser;

pub use format::{
    ArtifactSpec, Channel, CommandSpec, Dependency, DependencyStage, Formula, InstallSection,
    LinkSpec, PackageSection, SourceSection, Substitutions, TestSection,
};
pub use parser::{parse_formula, parse_formula_file, validate_formula};
