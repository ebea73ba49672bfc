// src/main.rs

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match dispatch(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };

    std::process::exit(code);
}

fn dispatch(command: Commands) -> anyhow::Result<i32> {
    match command {
        Commands::Install {
            formula,
            prefix,
            head,
            keep_workdir,
            work_root,
            state_dir,
            timeout,
        } => commands::cmd_install(commands::InstallOptions {
            formula_path: &formula,
            prefix: &prefix,
            head,
            keep_workdir,
            work_root: work_root.as_deref(),
            state_dir: &state_dir,
            timeout_secs: timeout,
        }),
        Commands::Fetch {
            formula,
            head,
            dest,
        } => commands::cmd_fetch(&formula, head, dest.as_deref()),
        Commands::Check { formula } => commands::cmd_check(&formula),
        Commands::Test {
            formula,
            prefix,
            timeout,
        } => commands::cmd_test(&formula, &prefix, timeout),
        Commands::List { state_dir, files } => commands::cmd_list(&state_dir, files),
    }
}
