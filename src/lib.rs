// src/lib.rs

//! Formulary: a formula interpreter
//!
//! Fetches, builds, installs and smoke-tests one package from source,
//! driven by a declarative TOML formula.
//!
//! # Architecture
//!
//! - Formulas are plain data; every formula runs through the same pipeline
//! - Strictly sequential stages: resolve source, stage environment, build,
//!   install, verify
//! - The staged build environment is scoped to child processes and torn
//!   down on every exit path
//! - Installs are staged inside the prefix and renamed into place, so a
//!   failed run leaves the prefix untouched

mod error;
pub mod filesystem;
pub mod formula;
pub mod hash;
pub mod lock;
pub mod pipeline;
pub mod receipt;

pub use error::{Error, Result};
pub use formula::{Channel, Formula, parse_formula, parse_formula_file, validate_formula};
pub use lock::FormulaLock;
pub use pipeline::{ExecutionResult, Pipeline, PipelineConfig, PipelineError, Stage, TerminalState};
pub use receipt::{InstallReceipt, Verification};
