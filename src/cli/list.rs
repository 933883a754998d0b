//! List stored backups

use chrono::Utc;
use colored::Colorize;

use crate::error::Result;
use crate::vault::{EmergencyVault, Partition};

use super::{expiry_note, local_time};

pub async fn run(vault: &EmergencyVault) -> Result<()> {
    let records = vault.list_backups().await?;

    if records.is_empty() {
        println!("{}", "No backups yet.".yellow());
        println!("Create one with: {}", "keymaker-vault create".cyan());
        return Ok(());
    }

    let now = Utc::now();
    for partition in [Partition::Regular, Partition::Emergency] {
        let section: Vec<_> = records.iter().filter(|r| r.partition() == partition).collect();
        if section.is_empty() {
            continue;
        }

        let title = match partition {
            Partition::Regular => "=== Regular backups ===",
            Partition::Emergency => "=== Emergency backups ===",
        };
        println!("{}", title.cyan().bold());
        println!();

        for record in section {
            let lock = if record.is_encrypted { " [encrypted]" } else { "" };
            println!("  {} {}{}", record.name.bold(), record.scheme.label().dimmed(), lock.dimmed());
            println!("    id:      {}", record.id);
            println!("    created: {}", local_time(record.created_at));
            println!("    keys:    {}", record.key_fingerprints.join(", "));
            if let Some(params) = record.shamir {
                println!("    shares:  {} of {}", params.threshold, params.total_shares);
            }
            if let Some(note) = expiry_note(record, now) {
                println!("    {}", note.yellow());
            }
            if let Some(description) = &record.description {
                println!("    {}", description.dimmed());
            }
            println!();
        }
    }

    Ok(())
}
