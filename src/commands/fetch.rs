// src/commands/fetch.rs

//! Fetch command - resolve a formula's source into a directory

use super::{load_formula, print_failure, print_warnings};
use anyhow::Result;
use formulary::{Channel, Pipeline, PipelineConfig};
use std::path::PathBuf;

/// Fetch and unpack a formula's source without building it
pub fn cmd_fetch(formula_path: &str, head: bool, dest: Option<&str>) -> Result<i32> {
    let (formula, warnings) = load_formula(formula_path)?;
    print_warnings(&warnings);

    let channel = if head { Channel::Head } else { Channel::Stable };
    let dest = dest
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("{}-src", formula.package.name)));

    println!(
        "Fetching {} ({} channel) into {}",
        formula.package.name,
        channel,
        dest.display()
    );

    let pipeline = Pipeline::new(PipelineConfig::default());
    match pipeline.fetch_only(&formula, channel, &dest) {
        Ok(root) => {
            println!("[OK] Source tree at {}", root.display());
            Ok(0)
        }
        Err(e) => {
            print_failure(&e);
            Ok(e.state().exit_code())
        }
    }
}
