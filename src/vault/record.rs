//! Backup record metadata

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, VaultError};

/// Opaque record identifier, assigned at creation and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Stable id for a migrated legacy entry
    pub(crate) fn derived(name: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RecordId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| VaultError::Validation(format!("'{}' is not a backup id", s)))
    }
}

/// Backup scheme; decides codec and authentication flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupScheme {
    EncryptedArchive,
    QrCode,
    ShamirSecretSharing,
    TimeLocked,
}

impl BackupScheme {
    pub const ALL: [BackupScheme; 4] = [
        Self::EncryptedArchive,
        Self::QrCode,
        Self::ShamirSecretSharing,
        Self::TimeLocked,
    ];

    /// Archives are regular backups; everything else lives in the emergency partition
    pub fn partition(self) -> Partition {
        match self {
            Self::EncryptedArchive => Partition::Regular,
            Self::QrCode | Self::ShamirSecretSharing | Self::TimeLocked => Partition::Emergency,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::EncryptedArchive => "Encrypted archive",
            Self::QrCode => "QR code",
            Self::ShamirSecretSharing => "Shamir secret sharing",
            Self::TimeLocked => "Time-locked",
        }
    }
}

impl fmt::Display for BackupScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Storage partition of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Regular,
    Emergency,
}

impl Partition {
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Emergency => "emergency",
        }
    }
}

/// `(k, n)` threshold parameters of a Shamir backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShamirParams {
    pub total_shares: u8,
    pub threshold: u8,
}

impl ShamirParams {
    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(VaultError::validation("threshold must be at least 1"));
        }
        if self.threshold > self.total_shares {
            return Err(VaultError::Validation(format!(
                "threshold {} exceeds total shares {}",
                self.threshold, self.total_shares
            )));
        }
        Ok(())
    }
}

/// Persisted metadata describing one backup, independent of its payload bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub scheme: BackupScheme,
    pub created_at: DateTime<Utc>,
    /// Unlock time for time-locked backups, soft hint otherwise
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub key_fingerprints: Vec<String>,
    pub is_encrypted: bool,
    /// Where the payload lives; recomputed from the store root on every read
    pub payload_location: PathBuf,
    pub file_size: u64,
    pub checksum: String,
    #[serde(default)]
    pub shamir: Option<ShamirParams>,
    #[serde(default)]
    pub last_restored_at: Option<DateTime<Utc>>,
}

impl BackupRecord {
    /// Check the scheme-dependent field invariants
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(VaultError::validation("backup name must not be empty"));
        }
        if self.key_fingerprints.is_empty() {
            return Err(VaultError::validation("a backup must include at least one key"));
        }
        for (i, fp) in self.key_fingerprints.iter().enumerate() {
            if self.key_fingerprints[..i].contains(fp) {
                return Err(VaultError::Validation(format!("key {} is included twice", fp)));
            }
        }

        match (self.scheme, &self.shamir) {
            (BackupScheme::ShamirSecretSharing, Some(params)) => params.validate()?,
            (BackupScheme::ShamirSecretSharing, None) => {
                return Err(VaultError::validation("Shamir backups need share parameters"))
            }
            (_, Some(_)) => {
                return Err(VaultError::Validation(format!(
                    "{} backups cannot carry Shamir parameters",
                    self.scheme
                )))
            }
            (_, None) => {}
        }

        if self.scheme == BackupScheme::TimeLocked && self.expires_at.is_none() {
            return Err(VaultError::validation("time-locked backups need an unlock time"));
        }

        Ok(())
    }

    /// `expires_at` has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }

    /// Time left until a time-locked backup opens; `None` once open
    /// or for other schemes
    pub fn lock_remaining(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        if self.scheme != BackupScheme::TimeLocked {
            return None;
        }
        let expires_at = self.expires_at?;
        (expires_at - now).to_std().ok().filter(|d| !d.is_zero())
    }

    pub fn partition(&self) -> Partition {
        self.scheme.partition()
    }
}
