//! Deployment Backup - Main entry point
//!
//! Offline tooling for backup bundles. Backup, restore and cleanup need a
//! deployment manager and are driven through the library.

use anyhow::Result;
use clap::{Parser, Subcommand};
use deployment_backup::bundle::{BackupManager, DirectoryBackupManager};
use deployment_backup::utils::{self, process_error, RunErrors};
use deployment_backup::Config;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check every artifact in a bundle against its recorded checksum
    Validate {
        #[arg(value_name = "BUNDLE")]
        bundle: PathBuf,
    },
    /// Print the metadata of a bundle
    Inspect {
        #[arg(value_name = "BUNDLE")]
        bundle: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = if let Some(config_path) = args.config {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting deployment-backup v{}", env!("CARGO_PKG_VERSION"));

    let manager = DirectoryBackupManager::new(&config.bundle.root_dir);

    let errors = match args.command {
        Command::Validate { bundle } => validate(&manager, &bundle).await,
        Command::Inspect { bundle } => inspect(&manager, &bundle).await,
    };

    let (exit_code, message, trace) = process_error(&errors);
    if exit_code != 0 {
        tracing::debug!("{}", trace);
        eprint!("{}", message);
        std::process::exit(exit_code);
    }

    Ok(())
}

async fn validate(manager: &DirectoryBackupManager, path: &Path) -> RunErrors {
    let backup = match manager.open(path).await {
        Ok(backup) => backup,
        Err(e) => return RunErrors::generic(e),
    };

    match backup.valid().await {
        Ok(true) => {
            println!("Backup at {} is valid", path.display());
            RunErrors::new()
        }
        Ok(false) => RunErrors::generic(anyhow::anyhow!("Backup is corrupted")),
        Err(e) => RunErrors::generic(e.context("Backup is corrupted")),
    }
}

async fn inspect(manager: &DirectoryBackupManager, path: &Path) -> RunErrors {
    let metadata = match manager.open_directory(path).await {
        Ok(backup) => backup.metadata().await,
        Err(e) => Err(e),
    };

    match metadata.and_then(|m| Ok(serde_json::to_string_pretty(&m)?)) {
        Ok(rendered) => {
            println!("{}", rendered);
            RunErrors::new()
        }
        Err(e) => RunErrors::generic(e),
    }
}
