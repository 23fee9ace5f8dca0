//! Testdeck CLI - endpoint installer
//!
//! Copies the interception endpoint runtime script into an application's
//! static assets so the page can register it. The script speaks the same
//! channel protocol version as the bridge crates built from this workspace.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

/// Interception endpoint runtime, embedded at build time
const WORKER_SCRIPT: &str = include_str!("../assets/interceptor.js");

/// Filename the endpoint script is installed under
const WORKER_FILENAME: &str = "testdeck-interceptor.js";

#[derive(Parser)]
#[command(name = "testdeck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the interception endpoint script into a target directory
    Install {
        /// Directory served as static assets by the application
        dir: PathBuf,

        /// Print registration instructions after installing
        #[arg(long)]
        instructions: bool,
    },
}

fn main() {
    testdeck_common::logging::init();

    // Missing or invalid arguments exit with 1; runtime failures with 2
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(2);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Install { dir, instructions } => {
            let installed = install_worker(&dir)?;
            info!("installed endpoint script at {}", installed.display());
            println!("Installed {}", installed.display());
            if instructions {
                print_instructions();
            }
            Ok(())
        }
    }
}

/// Copy the endpoint script into `dir`, which must already exist
fn install_worker(dir: &Path) -> Result<PathBuf> {
    if !dir.is_dir() {
        bail!("target directory {} does not exist", dir.display());
    }

    let target = dir.join(WORKER_FILENAME);
    std::fs::write(&target, WORKER_SCRIPT)
        .with_context(|| format!("failed to write {}", target.display()))?;
    Ok(target)
}

fn print_instructions() {
    println!();
    println!("Register the endpoint from your application entry point:");
    println!();
    println!("    navigator.serviceWorker.register('/{}');", WORKER_FILENAME);
    println!();
    println!("Then initialize mocking before your tests run. Reinstall after");
    println!("upgrading Testdeck so the protocol versions stay in sync.");
}
