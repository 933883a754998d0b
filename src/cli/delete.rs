//! Delete one or all backups

use clap::Args;
use colored::Colorize;

use crate::error::{format_remaining, Result, VaultError};
use crate::vault::EmergencyVault;

use super::{confirm, parse_id};

#[derive(Debug, Args)]
pub struct DeleteArgs {
    /// Backup id
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub id: Option<String>,

    /// Delete every backup that can be deleted
    #[arg(long)]
    pub all: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

pub async fn run(vault: &EmergencyVault, args: DeleteArgs) -> Result<()> {
    match args.id {
        Some(id) if !args.all => delete_one(vault, &id, args.yes).await,
        _ => delete_all(vault, args.yes).await,
    }
}

async fn delete_one(vault: &EmergencyVault, id: &str, yes: bool) -> Result<()> {
    let id = parse_id(id)?;
    let record = vault.get_backup(id).await?.ok_or(VaultError::NotFound(id))?;

    if !yes && !confirm(&format!("Delete backup '{}'?", record.name)) {
        println!("Cancelled.");
        return Ok(());
    }

    let outcome = vault.delete_backup(id).await?;
    println!("{} Backup '{}' deleted", "Success:".green().bold(), record.name);
    if let Some(residue) = outcome.metadata_residue {
        println!("{} {}", "Warning:".yellow().bold(), residue);
    }
    Ok(())
}

async fn delete_all(vault: &EmergencyVault, yes: bool) -> Result<()> {
    if !yes && !confirm("Delete ALL backups? Time-locked backups that are still locked are kept.") {
        println!("Cancelled.");
        return Ok(());
    }

    let report = vault.delete_all().await?;
    println!("{} {} backups deleted", "Done:".green().bold(), report.succeeded);

    for (id, error) in &report.failed {
        let reason = match error {
            VaultError::StillLocked { remaining } => format!("still locked for {}", format_remaining(remaining)),
            other => other.to_string(),
        };
        println!("  {} {}: {}", "kept".yellow(), id, reason);
    }
    Ok(())
}
