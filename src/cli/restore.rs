//! Restore keys from a backup into a directory

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::Args;
use colored::Colorize;

use crate::codec::Credential;
use crate::error::{format_remaining, Result, VaultError};
use crate::keys::KeyMaterial;
use crate::vault::{write_atomic, BackupRecord, BackupScheme, EmergencyVault};

use super::{parse_id, prompt_passphrase, step};

#[derive(Debug, Args)]
pub struct RestoreArgs {
    /// Backup id
    pub id: String,

    /// Directory to write the restored key files to
    #[arg(short, long, default_value = ".")]
    pub out_dir: PathBuf,

    /// A Shamir share (repeat for each share)
    #[arg(long = "share")]
    pub shares: Vec<String>,

    /// Text scanned from a QR backup
    #[arg(long)]
    pub qr_text: Option<String>,
}

pub async fn run(vault: &EmergencyVault, args: RestoreArgs) -> Result<()> {
    let id = parse_id(&args.id)?;
    let record = vault
        .get_backup(id)
        .await?
        .ok_or(VaultError::NotFound(id))?;

    println!("{}", format!("=== Restore '{}' ===", record.name).cyan().bold());
    println!();

    if let Some(remaining) = record.lock_remaining(Utc::now()) {
        println!("{} This backup unlocks in {}.", "Locked:".yellow().bold(), format_remaining(&remaining));
        return Ok(());
    }

    let keys = loop {
        let credential = credential_for(&record, &args)?;
        match vault.restore_backup(id, credential).await {
            Ok(keys) => break keys,
            Err(VaultError::AuthenticationFailed { attempts_left })
                if attempts_left > 0 && !credentials_from_args(&record, &args) =>
            {
                println!("{} Credentials rejected, {} attempts left", "Error:".red(), attempts_left);
            }
            Err(VaultError::StillLocked { remaining }) => {
                println!(
                    "{} This backup unlocks in {}.",
                    "Locked:".yellow().bold(),
                    format_remaining(&remaining)
                );
                vault.end_restore_session(id);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    };

    step("Writing key files")?;
    let written = write_keys(&args.out_dir, &keys).await?;
    println!("{}", "done".green());

    println!();
    for path in written {
        println!("  {}", path.display().to_string().cyan());
    }
    Ok(())
}

fn credential_for(record: &BackupRecord, args: &RestoreArgs) -> Result<Credential> {
    Ok(match record.scheme {
        BackupScheme::ShamirSecretSharing if !args.shares.is_empty() => Credential::Shares(args.shares.clone()),
        BackupScheme::ShamirSecretSharing => Credential::Shares(read_shares()?),
        BackupScheme::QrCode => match &args.qr_text {
            Some(text) => Credential::Scanned {
                text: text.clone(),
                passphrase: if record.is_encrypted { Some(prompt_passphrase()?) } else { None },
            },
            None if record.is_encrypted => Credential::Passphrase(prompt_passphrase()?),
            None => Credential::None,
        },
        BackupScheme::EncryptedArchive if !record.is_encrypted => Credential::None,
        BackupScheme::EncryptedArchive | BackupScheme::TimeLocked => Credential::Passphrase(prompt_passphrase()?),
    })
}

/// Whether [`credential_for`] answers from the command line without prompting.
/// Retrying such credentials would only burn attempts.
fn credentials_from_args(record: &BackupRecord, args: &RestoreArgs) -> bool {
    match record.scheme {
        BackupScheme::ShamirSecretSharing => !args.shares.is_empty(),
        BackupScheme::QrCode | BackupScheme::EncryptedArchive => !record.is_encrypted,
        BackupScheme::TimeLocked => false,
    }
}

fn read_shares() -> Result<Vec<String>> {
    println!("Enter one share per line, then an empty line:");
    let mut shares = Vec::new();
    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            break;
        }
        shares.push(line.trim().to_string());
    }
    Ok(shares)
}

/// File stem for the `index`th restored key
fn key_file_name(key: &KeyMaterial, index: usize) -> String {
    format!("id_{}_{}", key.key_type.to_string().to_lowercase(), index + 1)
}

/// Write each key as `<name>` (0600) and `<name>.pub`, never overwriting
async fn write_keys(dir: &Path, keys: &[KeyMaterial]) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await?;

    let mut written = Vec::with_capacity(keys.len());
    for (index, key) in keys.iter().enumerate() {
        let private_path = dir.join(key_file_name(key, index));
        let public_path = private_path.with_extension("pub");
        for path in [&private_path, &public_path] {
            if tokio::fs::try_exists(path).await? {
                return Err(VaultError::Validation(format!("{} already exists", path.display())));
            }
        }

        write_atomic(&private_path, &key.private_bytes).await?;
        let mut public = key.public_bytes.clone();
        if !public.ends_with(b"\n") {
            public.push(b'\n');
        }
        write_atomic(&public_path, &public).await?;
        written.push(private_path);
    }
    Ok(written)
}
