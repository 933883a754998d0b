//! Import the legacy backup list

use colored::Colorize;

use crate::error::Result;
use crate::vault::EmergencyVault;

pub async fn run(vault: &EmergencyVault) -> Result<()> {
    let report = match vault.startup_migration() {
        Some(report) => report.clone(),
        None => vault.migrate_legacy().await?,
    };

    if report.already_migrated {
        println!("Legacy backups were already migrated.");
        return Ok(());
    }

    println!(
        "{} {} regular and {} emergency backups imported",
        "Done:".green().bold(),
        report.regular,
        report.emergency
    );
    if report.already_present > 0 {
        println!("  {} were imported by an earlier run", report.already_present);
    }
    for skipped in &report.skipped {
        println!(
            "  {} {}#{}: {}",
            "skipped".yellow(),
            skipped.fingerprint,
            skipped.index,
            skipped.reason
        );
    }
    Ok(())
}
