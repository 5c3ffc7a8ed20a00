//! unlocker CLI - installs and removes the unlocker patch on a VMware installation.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{debug, error, info};

use unlocker::assets::ToolsAssets;
use unlocker::platform::HostPlatform;
use unlocker::product::{Product, DEFAULT_INSTALL_DIR};
use unlocker::Unlocker;

/// Unlocker for VMware Workstation/Player.
#[derive(Parser)]
#[command(name = "unlocker")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// VMware installation directory
    #[arg(long, env = "UNLOCK_INSTALL_DIR", default_value = DEFAULT_INSTALL_DIR, global = true)]
    install_dir: PathBuf,

    /// Directory for the backups and hash manifest
    #[arg(long, env = "UNLOCK_BACKUP_DIR", default_value = "backup", global = true)]
    backup_dir: PathBuf,

    /// Directory holding the VMware Tools images to install
    #[arg(long, env = "UNLOCK_ISO_DIR", default_value = "iso", global = true)]
    iso_dir: PathBuf,

    /// Exit without waiting for a key press
    #[arg(short, long, env = "UNLOCK_QUIET", global = true)]
    quiet: bool,

    /// Log every record and file operation
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Operation to run
    #[command(subcommand)]
    command: Commands,
}

/// Operations
#[derive(Subcommand)]
enum Commands {
    /// Install patches
    Install,
    /// Uninstall patches
    Uninstall,
    /// Show the patch status of every file
    Status,
}

/// Waits for the operator unless running quietly
fn wait_exit(quiet: bool) {
    if quiet {
        return;
    }
    print!("\nPress Enter to continue...");
    if let Err(e) = io::stdout().flush() {
        debug!("failed to flush stdout: {e}");
    }
    if let Err(e) = io::stdin().lock().read_line(&mut String::new()) {
        debug!("failed to read stdin: {e}");
    }
}

/// Runs the selected operation
fn run(cli: &Cli) -> anyhow::Result<()> {
    let product = Product::discover(&cli.install_dir, &cli.backup_dir)
        .context("failed to locate the VMware installation")?;
    info!("VMware is installed at: {}", product.install_dir.display());

    // write access to the first target is what patching needs
    let probe = product
        .targets
        .first()
        .map(|t| t.path.clone())
        .unwrap_or_else(|| product.install_dir.clone());
    let platform = HostPlatform::new(probe);
    let unlocker = Unlocker::new(&product, &platform)
        .with_assets(ToolsAssets::new(&cli.iso_dir, &product.install_dir));

    match cli.command {
        Commands::Install => {
            unlocker.install().context("aborting install")?;
            info!("Unlocker installed");
        }
        Commands::Uninstall => {
            unlocker.uninstall().context("aborting uninstall")?;
            info!("Unlocker uninstalled");
        }
        Commands::Status => {
            let report = unlocker.status()?;
            for (target, result) in &report.files {
                info!(
                    "{}: {} records, {} patched, {} unpatched",
                    target.path.display(),
                    result.total,
                    result.patched,
                    result.unpatched
                );
            }
            info!("Status: {:?}", report.status);
        }
    }
    Ok(())
}

/// Parses arguments, sets up logging and runs the operation
fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_target(false)
        .format_timestamp(None)
        .init();

    info!("Unlocker {} for VMware Workstation/Player", env!("CARGO_PKG_VERSION"));

    let code = match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    };
    wait_exit(cli.quiet);
    code
}
