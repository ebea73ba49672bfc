// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

const DEFAULT_STATE_DIR: &str = "/var/lib/formulary";

/// Common argument: formula file
fn formula_arg() -> Arg {
    Arg::new("formula").required(true).help("Path to the formula file")
}

/// Common argument: install prefix
fn prefix_arg() -> Arg {
    Arg::new("prefix")
        .short('p')
        .long("prefix")
        .default_value("/usr/local")
        .help("Install prefix")
}

/// Common argument: state directory for locks and receipts
fn state_dir_arg() -> Arg {
    Arg::new("state_dir")
        .long("state-dir")
        .value_name("PATH")
        .default_value(DEFAULT_STATE_DIR)
        .help("Directory for locks and install receipts")
}

fn head_arg(verb: &str) -> Arg {
    Arg::new("head")
        .long("head")
        .action(ArgAction::SetTrue)
        .help(format!("{} the head (development) source instead of stable", verb))
}

fn build_cli() -> Command {
    Command::new("formulary")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Formulary Contributors")
        .about("Fetch, build, install and smoke-test packages from source formulas")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Enable debug logging"),
        )
        .subcommand(
            Command::new("install")
                .about("Build and install a formula into the prefix")
                .arg(formula_arg())
                .arg(prefix_arg())
                .arg(head_arg("Build from"))
                .arg(
                    Arg::new("keep_workdir")
                        .long("keep-workdir")
                        .action(ArgAction::SetTrue)
                        .help("Keep the working directory after the run"),
                )
                .arg(
                    Arg::new("work_root")
                        .long("work-root")
                        .value_name("PATH")
                        .help("Parent directory for working directories"),
                )
                .arg(state_dir_arg())
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .default_value("3600")
                        .help("Timeout for each build, install and test command, in seconds"),
                ),
        )
        .subcommand(
            Command::new("fetch")
                .about("Fetch a formula's source without building it")
                .arg(formula_arg())
                .arg(head_arg("Fetch"))
                .arg(
                    Arg::new("dest")
                        .short('d')
                        .long("dest")
                        .help("Destination directory (default: ./<name>-src)"),
                ),
        )
        .subcommand(
            Command::new("check")
                .about("Parse and validate a formula")
                .arg(formula_arg()),
        )
        .subcommand(
            Command::new("test")
                .about("Run a formula's test procedure against an existing install")
                .arg(formula_arg())
                .arg(prefix_arg())
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .default_value("600")
                        .help("Timeout for each test command, in seconds"),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List installed formulas")
                .arg(state_dir_arg())
                .arg(
                    Arg::new("files")
                        .short('f')
                        .long("files")
                        .action(ArgAction::SetTrue)
                        .help("Show installed files"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("formulary.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
