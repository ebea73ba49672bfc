// src/cli/mod.rs
//! CLI definitions for formulary
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations live in the `commands` module.

use clap::{Parser, Subcommand};

/// Default directory for locks and install receipts
pub const DEFAULT_STATE_DIR: &str = "/var/lib/formulary";

#[derive(Parser)]
#[command(name = "formulary")]
#[command(author = "Formulary Contributors")]
#[command(version)]
#[command(about = "Fetch, build, install and smoke-test packages from source formulas", long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build and install a formula into the prefix
    Install {
        /// Path to the formula file
        formula: String,

        /// Install prefix
        #[arg(short, long, default_value = "/usr/local")]
        prefix: String,

        /// Build from the head (development) source instead of stable
        #[arg(long)]
        head: bool,

        /// Keep the working directory after the run
        #[arg(long)]
        keep_workdir: bool,

        /// Parent directory for working directories (default: system temp dir)
        #[arg(long)]
        work_root: Option<String>,

        /// Directory for locks and install receipts
        #[arg(long, default_value = DEFAULT_STATE_DIR)]
        state_dir: String,

        /// Timeout for each build, install and test command, in seconds
        #[arg(long, default_value = "3600")]
        timeout: u64,
    },

    /// Fetch a formula's source without building it
    Fetch {
        /// Path to the formula file
        formula: String,

        /// Fetch the head (development) source instead of stable
        #[arg(long)]
        head: bool,

        /// Destination directory (default: ./<name>-src)
        #[arg(short, long)]
        dest: Option<String>,
    },

    /// Parse and validate a formula
    Check {
        /// Path to the formula file
        formula: String,
    },

    /// Run a formula's test procedure against an existing install
    Test {
        /// Path to the formula file
        formula: String,

        /// Install prefix
        #[arg(short, long, default_value = "/usr/local")]
        prefix: String,

        /// Timeout for each test command, in seconds
        #[arg(long, default_value = "600")]
        timeout: u64,
    },

    /// List installed formulas
    List {
        /// Directory holding install receipts
        #[arg(long, default_value = DEFAULT_STATE_DIR)]
        state_dir: String,

        /// Show installed files
        #[arg(short, long)]
        files: bool,
    },
}
