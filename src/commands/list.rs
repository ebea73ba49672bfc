// src/commands/list.rs

//! List command - show installed formulas from their receipts

use anyhow::{Context, Result};
use formulary::{InstallReceipt, Verification};
use std::path::Path;

pub fn cmd_list(state_dir: &str, files: bool) -> Result<i32> {
    let receipts = InstallReceipt::read_all(Path::new(state_dir))
        .with_context(|| format!("Failed to read receipts from {}", state_dir))?;

    if receipts.is_empty() {
        println!("No formulas installed.");
        return Ok(0);
    }

    println!("Installed formulas:");
    for receipt in &receipts {
        let verification = match receipt.verification {
            Verification::Passed => "",
            Verification::Failed => " [test failed]",
            Verification::Skipped => " [untested]",
        };
        println!(
            "  {} {} ({}) in {} at {}{}",
            receipt.name,
            receipt.version.as_deref().unwrap_or("-"),
            receipt.channel,
            receipt.prefix.display(),
            receipt.installed_at.format("%Y-%m-%d %H:%M:%S"),
            verification
        );
        if files {
            for path in &receipt.installed {
                println!("    {}", path.display());
            }
        }
    }

    println!("\nTotal: {} formula(s)", receipts.len());
    Ok(0)
}
