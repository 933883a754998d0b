use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use keymaker_vault::cli::{self, create::CreateArgs, delete::DeleteArgs, restore::RestoreArgs};
use keymaker_vault::{EmergencyVault, VaultConfig};

#[derive(Parser)]
#[command(name = "keymaker-vault")]
#[command(version)]
#[command(about = "Emergency backups for SSH keys", long_about = None)]
struct Cli {
    /// Vault directory (overrides config and KEYMAKER_VAULT_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up SSH keys
    Create(CreateArgs),

    /// List backups
    List,

    /// Restore keys from a backup
    Restore(RestoreArgs),

    /// Delete a backup, or all of them
    Delete(DeleteArgs),

    /// Show vault health
    Status,

    /// Show the result of importing legacy backups
    Migrate,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = VaultConfig::load().context("could not load configuration")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    let vault = EmergencyVault::open(&config)
        .await
        .with_context(|| format!("could not open vault at {}", config.data_dir.display()))?;

    match cli.command {
        Commands::Create(args) => cli::create::run(&vault, args).await?,
        Commands::List => cli::list::run(&vault).await?,
        Commands::Restore(args) => cli::restore::run(&vault, args).await?,
        Commands::Delete(args) => cli::delete::run(&vault, args).await?,
        Commands::Status => cli::status::run(&vault).await?,
        Commands::Migrate => cli::migrate::run(&vault).await?,
    }
    Ok(())
}
