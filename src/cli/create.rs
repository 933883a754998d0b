//! Create a new backup from OpenSSH key files

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use clap::{Args, ValueEnum};
use colored::Colorize;

use crate::codec::CredentialSpec;
use crate::error::{Result, VaultError};
use crate::keys::{KeyMaterialSource, OpenSshFileSource};
use crate::vault::{BackupScheme, BackupSpec, EmergencyVault};

use super::{local_time, prompt_new_passphrase, step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SchemeArg {
    Archive,
    Qr,
    Shamir,
    Timelock,
}

impl From<SchemeArg> for BackupScheme {
    fn from(arg: SchemeArg) -> Self {
        match arg {
            SchemeArg::Archive => BackupScheme::EncryptedArchive,
            SchemeArg::Qr => BackupScheme::QrCode,
            SchemeArg::Shamir => BackupScheme::ShamirSecretSharing,
            SchemeArg::Timelock => BackupScheme::TimeLocked,
        }
    }
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Backup name
    pub name: String,

    /// Backup scheme
    #[arg(short, long, value_enum)]
    pub scheme: SchemeArg,

    /// Private key files to include (relative to --key-dir)
    #[arg(short, long = "key", required = true)]
    pub keys: Vec<String>,

    /// Directory holding the key files [default: ~/.ssh]
    #[arg(long)]
    pub key_dir: Option<PathBuf>,

    #[arg(short, long)]
    pub description: Option<String>,

    /// Total number of Shamir shares
    #[arg(long, default_value_t = 5)]
    pub shares: u8,

    /// Shares needed to restore
    #[arg(long, default_value_t = 3)]
    pub threshold: u8,

    /// Days until a time-locked backup opens
    #[arg(long)]
    pub lock_days: Option<u32>,

    /// Unlock time for a time-locked backup (RFC 3339)
    #[arg(long, conflicts_with = "lock_days")]
    pub unlock_at: Option<String>,

    /// Store an archive or QR backup without a passphrase
    #[arg(long)]
    pub no_passphrase: bool,
}

impl CreateArgs {
    fn unlock_time(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        if let Some(days) = self.lock_days {
            return Ok(Some(now + Duration::days(i64::from(days))));
        }
        self.unlock_at
            .as_deref()
            .map(|s| {
                DateTime::parse_from_rfc3339(s)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| VaultError::Validation(format!("invalid unlock time '{}': {}", s, e)))
            })
            .transpose()
    }
}

pub async fn run(vault: &EmergencyVault, args: CreateArgs) -> Result<()> {
    let scheme = BackupScheme::from(args.scheme);
    println!("{}", format!("=== New {} backup ===", scheme.label()).cyan().bold());
    println!();

    let source = match &args.key_dir {
        Some(dir) => OpenSshFileSource::new(dir),
        None => OpenSshFileSource::user_ssh_dir()?,
    };
    let keys = source.load(&args.keys)?;
    for key in &keys {
        println!("  {} {} {}", key.key_type, key.fingerprint.dimmed(), key.comment.as_deref().unwrap_or(""));
    }
    println!();

    let mut spec = BackupSpec::new(args.name.clone(), scheme);
    if let Some(description) = &args.description {
        spec = spec.with_description(description.clone());
    }

    match scheme {
        BackupScheme::ShamirSecretSharing => spec = spec.with_shares(args.shares, args.threshold),
        BackupScheme::TimeLocked => {
            let unlock = args
                .unlock_time(Utc::now())?
                .ok_or_else(|| VaultError::validation("time-locked backups need --lock-days or --unlock-at"))?;
            spec = spec.expiring_at(unlock);
            spec.passphrase = Some(prompt_new_passphrase()?);
        }
        BackupScheme::EncryptedArchive | BackupScheme::QrCode if !args.no_passphrase => {
            spec.passphrase = Some(prompt_new_passphrase()?);
        }
        _ => {}
    }
    println!();

    step("Encoding and storing backup")?;
    let created = vault.create_backup(spec, &keys).await?;
    println!("{}", "done".green());

    println!();
    println!("{} {}", "Backup id:".bold(), created.record.id);
    if let Some(unlock) = created.record.expires_at {
        println!("{} {}", "Unlocks:".bold(), local_time(unlock));
    }

    match created.credential_spec {
        CredentialSpec::Shares(shares) => {
            println!();
            println!(
                "{} Hand out these shares now. Any {} of them restore the keys; they are not stored anywhere.",
                "Important:".yellow().bold(),
                args.threshold
            );
            println!("{}", "─".repeat(60).dimmed());
            for share in &shares {
                println!("{}", share);
            }
            println!("{}", "─".repeat(60).dimmed());
        }
        CredentialSpec::QrText(text) => {
            println!();
            println!("Render this text as a QR code:");
            println!("{}", "─".repeat(60).dimmed());
            println!("{}", text);
            println!("{}", "─".repeat(60).dimmed());
        }
        CredentialSpec::Passphrase => println!("Restoring requires the passphrase."),
        CredentialSpec::None => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> CreateArgs {
        CreateArgs {
            name: "n".into(),
            scheme: SchemeArg::Timelock,
            keys: vec!["id_ed25519".into()],
            key_dir: None,
            description: None,
            shares: 5,
            threshold: 3,
            lock_days: None,
            unlock_at: None,
            no_passphrase: false,
        }
    }

    #[test]
    fn test_unlock_time() {
        let now = Utc::now();
        assert_eq!(args().unlock_time(now).unwrap(), None);

        let mut a = args();
        a.lock_days = Some(2);
        assert_eq!(a.unlock_time(now).unwrap(), Some(now + Duration::days(2)));

        let mut a = args();
        a.unlock_at = Some("2031-05-01T12:00:00+02:00".into());
        assert_eq!(
            a.unlock_time(now).unwrap().unwrap().to_rfc3339(),
            "2031-05-01T10:00:00+00:00"
        );

        a.unlock_at = Some("next tuesday".into());
        assert!(a.unlock_time(now).is_err());
    }

    #[test]
    fn test_scheme_arg_mapping() {
        assert_eq!(BackupScheme::from(SchemeArg::Qr), BackupScheme::QrCode);
        assert_eq!(BackupScheme::from(SchemeArg::Shamir), BackupScheme::ShamirSecretSharing);
    }
}
