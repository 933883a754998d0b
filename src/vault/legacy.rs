//! One-time migration of the legacy backup list
//!
//! The legacy file is a JSON map from key fingerprint to a flat list of
//! backup variants of mixed types. Each variant becomes one record in the
//! regular (archive) or emergency (everything else) partition. The legacy
//! file is only ever read; a marker file records completion.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::record::{BackupRecord, BackupScheme, Partition, RecordId, ShamirParams};
use super::store::{write_atomic, VaultStore};
use crate::checksum;
use crate::error::Result;

pub const LEGACY_FILE: &str = "legacy_backups.json";
pub const MIGRATION_MARKER: &str = ".migrated";

#[derive(Debug, Deserialize)]
struct LegacyEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    payload_path: Option<PathBuf>,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default)]
    is_encrypted: bool,
    #[serde(default)]
    shamir_total_shares: Option<u8>,
    #[serde(default)]
    shamir_threshold: Option<u8>,
}

/// A legacy entry that was not migrated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub fingerprint: String,
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Migration had already completed before this run
    pub already_migrated: bool,
    pub regular: usize,
    pub emergency: usize,
    /// Entries migrated by an earlier, interrupted run
    pub already_present: usize,
    pub skipped: Vec<SkippedEntry>,
}

impl MigrationReport {
    pub fn migrated(&self) -> usize {
        self.regular + self.emergency
    }

    fn skip(&mut self, fingerprint: &str, index: usize, reason: String) {
        tracing::warn!("legacy backup {}#{} skipped: {}", fingerprint, index, reason);
        self.skipped.push(SkippedEntry {
            fingerprint: fingerprint.to_string(),
            index,
            reason,
        });
    }
}

fn legacy_scheme(kind: &str) -> Option<BackupScheme> {
    match kind.to_ascii_lowercase().as_str() {
        "encrypted_archive" | "archive" => Some(BackupScheme::EncryptedArchive),
        "qr_code" | "qr" => Some(BackupScheme::QrCode),
        "shamir" | "shamir_secret_sharing" => Some(BackupScheme::ShamirSecretSharing),
        "time_locked" | "timelock" | "time_lock" => Some(BackupScheme::TimeLocked),
        _ => None,
    }
}

impl VaultStore {
    /// Migrate the legacy backup list once; safe to call on every start
    pub async fn migrate_legacy(&self) -> Result<MigrationReport> {
        let marker = self.root().join(MIGRATION_MARKER);
        if fs::try_exists(&marker).await? {
            return Ok(MigrationReport {
                already_migrated: true,
                ..Default::default()
            });
        }

        let data = match fs::read(self.root().join(LEGACY_FILE)).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(MigrationReport::default()),
            Err(e) => return Err(e.into()),
        };

        let legacy: BTreeMap<String, Vec<serde_json::Value>> = serde_json::from_slice(&data)?;
        let mut report = MigrationReport::default();

        for (fingerprint, variants) in legacy {
            for (index, value) in variants.into_iter().enumerate() {
                let entry: LegacyEntry = match serde_json::from_value(value) {
                    Ok(entry) => entry,
                    Err(e) => {
                        report.skip(&fingerprint, index, format!("unreadable entry: {}", e));
                        continue;
                    }
                };
                let Some(scheme) = legacy_scheme(&entry.kind) else {
                    let reason = format!("unknown backup type '{}'", entry.kind);
                    report.skip(&fingerprint, index, reason);
                    continue;
                };

                let id = RecordId::derived(&format!("{}/{}/{}", fingerprint, index, entry.kind));
                if self.get(id).await?.is_some() {
                    report.already_present += 1;
                    continue;
                }

                match self.migrate_entry(id, &fingerprint, scheme, entry).await {
                    Ok(Partition::Regular) => report.regular += 1,
                    Ok(Partition::Emergency) => report.emergency += 1,
                    Err(e) => report.skip(&fingerprint, index, e.to_string()),
                }
            }
        }

        write_atomic(&marker, &serde_json::to_vec_pretty(&report)?).await?;
        tracing::info!(
            "legacy migration: {} regular, {} emergency, {} skipped",
            report.regular,
            report.emergency,
            report.skipped.len()
        );
        Ok(report)
    }

    async fn migrate_entry(
        &self,
        id: RecordId,
        fingerprint: &str,
        scheme: BackupScheme,
        entry: LegacyEntry,
    ) -> Result<Partition> {
        let payload = match &entry.payload_path {
            Some(path) => match fs::read(path).await {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::warn!("legacy payload {} is missing", path.display());
                    None
                }
                Err(e) => return Err(e.into()),
            },
            None => None,
        };

        let checksum = match (&payload, entry.checksum) {
            (_, Some(stored)) => stored,
            (Some(bytes), None) => checksum::compute(bytes),
            (None, None) => String::new(),
        };

        let shamir = match (entry.shamir_total_shares, entry.shamir_threshold) {
            (Some(total_shares), Some(threshold)) => Some(ShamirParams { total_shares, threshold }),
            _ => None,
        };

        let mut record = BackupRecord {
            id,
            name: entry.name.unwrap_or_else(|| format!("{} backup", scheme)),
            description: entry.description,
            scheme,
            created_at: entry.created_at.unwrap_or_else(Utc::now),
            expires_at: entry.expires_at,
            key_fingerprints: vec![fingerprint.to_string()],
            is_encrypted: entry.is_encrypted,
            payload_location: PathBuf::new(),
            file_size: 0,
            checksum,
            shamir: if scheme == BackupScheme::ShamirSecretSharing { shamir } else { None },
            last_restored_at: None,
        };

        self.persist(&mut record, payload.as_deref()).await?;
        Ok(record.partition())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = r#"{
        "SHA256:aaa": [
            {"type": "encrypted_archive", "name": "nightly", "payload_path": "PAYLOAD"},
            {"type": "qr_code", "name": "wallet card"},
            {"type": "carrier_pigeon"}
        ],
        "SHA256:bbb": [
            {"type": "shamir", "shamir_total_shares": 5, "shamir_threshold": 3},
            {"type": "time_locked", "expires_at": "2030-01-01T00:00:00Z"},
            {"type": "time_locked"},
            42
        ]
    }"#;

    async fn setup() -> (tempfile::TempDir, VaultStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = VaultStore::open(dir.path().join("vault")).await.unwrap();

        let payload = dir.path().join("old.tar");
        std::fs::write(&payload, b"legacy archive").unwrap();
        let legacy = LEGACY.replace("PAYLOAD", &payload.display().to_string());
        std::fs::write(store.root().join(LEGACY_FILE), legacy).unwrap();

        (dir, store)
    }

    #[tokio::test]
    async fn test_migration_partitions_records() {
        let (_dir, store) = setup().await;

        let report = store.migrate_legacy().await.unwrap();
        assert!(!report.already_migrated);
        assert_eq!(report.regular, 1);
        assert_eq!(report.emergency, 3);
        // Unknown type, time lock without expiry, non-object entry
        assert_eq!(report.skipped.len(), 3);
        assert!(report.skipped.iter().any(|s| s.reason.contains("carrier_pigeon")));

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 4);

        let archive = records.iter().find(|r| r.scheme == BackupScheme::EncryptedArchive).unwrap();
        assert_eq!(archive.name, "nightly");
        assert_eq!(archive.partition(), Partition::Regular);
        assert_eq!(store.read_payload(archive).await.unwrap(), b"legacy archive");
        assert_eq!(archive.checksum, checksum::compute(b"legacy archive"));

        let shamir = records.iter().find(|r| r.scheme == BackupScheme::ShamirSecretSharing).unwrap();
        assert_eq!(shamir.shamir, Some(ShamirParams { total_shares: 5, threshold: 3 }));
        assert_eq!(shamir.key_fingerprints, vec!["SHA256:bbb".to_string()]);
    }

    #[tokio::test]
    async fn test_migration_is_idempotent() {
        let (_dir, store) = setup().await;

        store.migrate_legacy().await.unwrap();
        let second = store.migrate_legacy().await.unwrap();

        assert!(second.already_migrated);
        assert_eq!(second.migrated(), 0);
        assert_eq!(store.list().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_interrupted_migration_does_not_duplicate() {
        let (_dir, store) = setup().await;

        store.migrate_legacy().await.unwrap();
        std::fs::remove_file(store.root().join(MIGRATION_MARKER)).unwrap();

        let rerun = store.migrate_legacy().await.unwrap();
        assert_eq!(rerun.migrated(), 0);
        assert_eq!(rerun.already_present, 4);
        assert_eq!(store.list().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_no_legacy_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = VaultStore::open(dir.path()).await.unwrap();

        let report = store.migrate_legacy().await.unwrap();
        assert_eq!(report, MigrationReport::default());
    }

    #[test]
    fn test_legacy_type_names() {
        assert_eq!(legacy_scheme("Encrypted_Archive"), Some(BackupScheme::EncryptedArchive));
        assert_eq!(legacy_scheme("timelock"), Some(BackupScheme::TimeLocked));
        assert_eq!(legacy_scheme("paper"), None);
    }
}
