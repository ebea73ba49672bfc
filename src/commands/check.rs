// src/commands/check.rs

//! Check command - parse and validate a formula without running it

use super::{load_formula, print_warnings};
use anyhow::Result;

pub fn cmd_check(formula_path: &str) -> Result<i32> {
    let (formula, warnings) = load_formula(formula_path)?;

    println!("Formula: {} {}", formula.package.name, formula.version());
    if let Some(desc) = &formula.package.description {
        println!("  {}", desc);
    }

    for channel in formula.channels() {
        if let Some(locator) = formula.locator(channel) {
            println!("  {:<8} {}", channel.as_str(), locator);
        }
    }

    let build = formula.build_dependencies();
    if !build.is_empty() {
        println!("  Build dependencies: {}", build.join(", "));
    }
    let runtime = formula.runtime_dependencies();
    if !runtime.is_empty() {
        println!("  Runtime dependencies: {}", runtime.join(", "));
    }

    println!(
        "  {} build step(s), {} artifact(s), {} install command(s)",
        formula.install.steps.len(),
        formula.install.artifacts.len(),
        formula.install.commands.len()
    );

    print_warnings(&warnings);
    println!("[OK] Formula is valid");
    Ok(0)
}
