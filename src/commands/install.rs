// src/commands/install.rs

//! Install command - run a formula through the full pipeline

use super::{load_formula, print_warnings, report};
use anyhow::{Result, anyhow};
use formulary::{Channel, FormulaLock, InstallReceipt, Pipeline, PipelineConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Flags for `formulary install`
pub struct InstallOptions<'a> {
    pub formula_path: &'a str,
    pub prefix: &'a str,
    pub head: bool,
    pub keep_workdir: bool,
    pub work_root: Option<&'a str>,
    pub state_dir: &'a str,
    pub timeout_secs: u64,
}

/// Build and install a formula
pub fn cmd_install(opts: InstallOptions<'_>) -> Result<i32> {
    println!("Reading formula: {}", opts.formula_path);
    let (formula, warnings) = load_formula(opts.formula_path)?;
    print_warnings(&warnings);

    let channel = if opts.head { Channel::Head } else { Channel::Stable };
    let state_dir = Path::new(opts.state_dir);

    let _lock = FormulaLock::try_acquire(state_dir, &formula.package.name)?.ok_or_else(|| {
        anyhow!(
            "{} is already being installed by another process",
            formula.package.name
        )
    })?;

    let mut config = PipelineConfig::for_prefix(opts.prefix)
        .with_keep_workdir(opts.keep_workdir)
        .with_step_timeout(Duration::from_secs(opts.timeout_secs));
    if let Some(work_root) = opts.work_root {
        config.work_root = PathBuf::from(work_root);
    }

    match InstallReceipt::load(state_dir, &formula.package.name) {
        Ok(Some(previous)) => println!(
            "Replacing {} {} installed at {}",
            previous.name,
            previous.version.as_deref().unwrap_or("(head)"),
            previous.installed_at
        ),
        Ok(None) => {}
        Err(e) => warn!("Ignoring unreadable install receipt: {}", e),
    }

    println!(
        "Installing {} {} ({} channel) into {}",
        formula.package.name,
        formula.version(),
        channel,
        config.prefix.display()
    );

    let pipeline = Pipeline::new(config);
    let result = pipeline.run(&formula, channel);

    let prefix = &pipeline.config().prefix;
    if let Some(receipt) = InstallReceipt::from_result(&formula, prefix, &result) {
        match receipt.write(state_dir) {
            Ok(path) => info!("Recorded install receipt {}", path.display()),
            Err(e) => warn!("Failed to write install receipt: {}", e),
        }
    }

    if result.install_succeeded() {
        println!("\nInstalled {} file(s):", result.installed.len());
        for path in &result.installed {
            println!("  - {}", path.display());
        }
    }

    if result.is_success() {
        if result.tested {
            println!("\n[COMPLETE] {} installed and verified", formula.package.name);
        } else {
            println!("\n[COMPLETE] {} installed (not verified)", formula.package.name);
        }
    } else if result.install_succeeded() {
        println!(
            "\n[WARNING] {} was installed but its test failed",
            formula.package.name
        );
    }

    Ok(report(&result))
}
