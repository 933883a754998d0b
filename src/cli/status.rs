//! Vault health summary

use colored::Colorize;

use crate::error::Result;
use crate::vault::EmergencyVault;

use super::colored_status;

pub async fn run(vault: &EmergencyVault) -> Result<()> {
    let health = vault.health().await?;

    println!("{} {}", "Vault status:".bold(), colored_status(health.status));
    println!("  backups:          {}", health.total);
    if health.expired > 0 {
        println!("  expired:          {}", health.expired.to_string().yellow());
    }
    if health.missing_payload > 0 {
        println!("  missing payload:  {}", health.missing_payload.to_string().red());
    }
    if health.corrupted > 0 {
        println!("  checksum failure: {}", health.corrupted.to_string().red().bold());
    }
    if health.unreadable > 0 {
        println!("  unreadable:       {}", health.unreadable.to_string().red().bold());
    }
    if health.total == 0 {
        println!("  {}", "No backups exist. Create one so your keys can be recovered.".yellow());
    }
    Ok(())
}
