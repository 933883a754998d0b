//! Keymaker emergency vault
//!
//! Backs up SSH key material under one of four schemes and restores it
//! under integrity and rate-limit checks:
//! - Encrypted archive of any number of keys
//! - QR code text for a single key
//! - Shamir secret sharing (k-of-n shares held by people, not the vault)
//! - Time-locked archive that cannot be opened or deleted before its unlock time

pub mod checksum;
pub mod cli;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod shamir;
pub mod vault;

pub use codec::{Credential, CredentialSpec};
pub use config::VaultConfig;
pub use error::{Result, VaultError};
pub use keys::{KeyMaterial, KeyMaterialSource, KeyType};
pub use vault::{
    BackupRecord, BackupScheme, BackupSpec, BulkReport, CreatedBackup, EmergencyVault, RecordId, VaultEvent,
    VaultHealth, VaultStatus,
};
