// src/commands/mod.rs
//! Command handlers for the formulary CLI
//!
//! Every handler returns the process exit code: 0 on success, the
//! terminal state's code for pipeline failures. Interpreter-level
//! problems (unreadable formula, lock contention) surface as errors and
//! exit with 1.

mod check;
mod fetch;
mod install;
mod list;

pub use check::cmd_check;
pub use fetch::cmd_fetch;
pub use install::{InstallOptions, cmd_install};
pub use list::cmd_list;
pub use test::cmd_test;

use anyhow::{Context, Result};
use formulary::{ExecutionResult, Formula, PipelineError, parse_formula_file, validate_formula};
use std::path::Path;

/// Parse and validate a formula file, printing any warnings
pub(crate) fn load_formula(path: &str) -> Result<(Formula, Vec<String>)> {
    let path = Path::new(path);
    let formula = parse_formula_file(path)
        .with_context(|| format!("Failed to parse formula: {}", path.display()))?;

    let warnings = validate_formula(&formula)
        .with_context(|| format!("Formula validation failed: {}", path.display()))?;

    Ok((formula, warnings))
}

pub(crate) fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        println!("Warning: {}", warning);
    }
}

/// Print a failed run's error and the tail of the failing command's output
pub(crate) fn print_failure(error: &PipelineError) {
    println!("\n[FAILED] {} during {}: {}", error.state(), error.stage(), error);

    if let Some(output) = error.output() {
        for (label, stream) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
            if stream.is_empty() {
                continue;
            }
            println!("--- {} ---", label);
            let lines: Vec<&str> = stream.lines().collect();
            let start = lines.len().saturating_sub(40);
            if start > 0 {
                println!("... ({} earlier lines omitted)", start);
            }
            for line in &lines[start..] {
                println!("{}", line);
            }
        }
    }
}

/// Print the outcome of a run and return its exit code
pub(crate) fn report(result: &ExecutionResult) -> i32 {
    if let Some(error) = result.error() {
        print_failure(error);
    }
    if let Some(workdir) = &result.workdir {
        println!("Working directory kept at {}", workdir.display());
    }
    result.exit_code()
}
