//! Command line front end for the emergency vault

pub mod create;
pub mod delete;
pub mod list;
pub mod migrate;
pub mod restore;
pub mod status;

use std::io::{self, Write};

use chrono::{DateTime, Local, Utc};
use colored::{ColoredString, Colorize};
use secrecy::SecretString;

use crate::error::{format_remaining, Result, VaultError};
use crate::vault::{BackupRecord, RecordId, VaultStatus};

/// Minimum passphrase length for new backups
pub const MIN_PASSPHRASE_LEN: usize = 8;

/// Prompt for a new passphrase with confirmation
pub fn prompt_new_passphrase() -> Result<SecretString> {
    println!("Choose a passphrase for this backup (at least {} characters).", MIN_PASSPHRASE_LEN);

    loop {
        let passphrase = rpassword::prompt_password("Passphrase: ")?;

        if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
            println!(
                "{} Passphrase must be at least {} characters",
                "Error:".red(),
                MIN_PASSPHRASE_LEN
            );
            continue;
        }

        let confirm = rpassword::prompt_password("Confirm passphrase: ")?;
        if passphrase != confirm {
            println!("{} Passphrases do not match", "Error:".red());
            continue;
        }

        return Ok(SecretString::new(passphrase));
    }
}

/// Prompt for an existing passphrase
pub fn prompt_passphrase() -> Result<SecretString> {
    let passphrase = rpassword::prompt_password("Backup passphrase: ")?;
    Ok(SecretString::new(passphrase))
}

/// Ask a yes/no question, defaulting to no
pub fn confirm(prompt: &str) -> bool {
    print!("{} [y/N] ", prompt);
    io::stdout().flush().ok();

    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return false;
    }

    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Print `label` without a newline so a status word can follow
pub(crate) fn step(label: &str) -> Result<()> {
    print!("{}", format!("{}... ", label).cyan());
    io::stdout().flush()?;
    Ok(())
}

pub(crate) fn parse_id(value: &str) -> Result<RecordId> {
    value
        .parse()
        .map_err(|_| VaultError::Validation(format!("'{}' is not a backup id", value)))
}

pub(crate) fn colored_status(status: VaultStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        VaultStatus::Healthy => label.green().bold(),
        VaultStatus::Warning => label.yellow().bold(),
        VaultStatus::Critical => label.red().bold(),
        VaultStatus::Corrupted => label.on_red().white().bold(),
    }
}

pub(crate) fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// One-line expiry description relative to `now`
pub(crate) fn expiry_note(record: &BackupRecord, now: DateTime<Utc>) -> Option<String> {
    let expires_at = record.expires_at?;
    Some(match record.lock_remaining(now) {
        Some(remaining) => format!("unlocks in {}", format_remaining(&remaining)),
        None if record.is_expired(now) => format!("expired {}", local_time(expires_at)),
        None => format!("expires {}", local_time(expires_at)),
    })
}
