//! Vault health assessment

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::record::BackupRecord;

/// Aggregate vault status, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultStatus {
    Healthy,
    Warning,
    Critical,
    Corrupted,
}

impl fmt::Display for VaultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Healthy => "Healthy",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
            Self::Corrupted => "Corrupted",
        };
        f.write_str(label)
    }
}

/// Observations about one record at snapshot time
#[derive(Debug, Clone)]
pub struct RecordHealth {
    pub record: BackupRecord,
    pub payload_present: bool,
    /// `None` when there is no payload to check
    pub checksum_valid: Option<bool>,
}

/// Every record with its observations, taken at one instant
#[derive(Debug, Clone)]
pub struct VaultSnapshot {
    pub taken_at: DateTime<Utc>,
    pub entries: Vec<RecordHealth>,
    /// Record directories whose metadata could not be parsed
    pub unreadable: Vec<PathBuf>,
}

/// Assessment result with the counts behind it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VaultHealth {
    pub status: VaultStatus,
    pub total: usize,
    pub expired: usize,
    pub missing_payload: usize,
    pub corrupted: usize,
    pub unreadable: usize,
}

pub struct VaultHealthMonitor;

impl VaultHealthMonitor {
    /// Most severe applicable status:
    /// - Corrupted: any checksum mismatch or unreadable record
    /// - Critical: more than one record expired or missing its payload
    /// - Warning: one such record, or an empty vault
    /// - Healthy: otherwise
    pub fn assess(snapshot: &VaultSnapshot) -> VaultHealth {
        let now = snapshot.taken_at;

        let corrupted = snapshot
            .entries
            .iter()
            .filter(|e| e.checksum_valid == Some(false))
            .count();
        let missing_payload = snapshot.entries.iter().filter(|e| !e.payload_present).count();
        let expired = snapshot.entries.iter().filter(|e| e.record.is_expired(now)).count();
        let degraded = snapshot
            .entries
            .iter()
            .filter(|e| !e.payload_present || e.record.is_expired(now))
            .count();

        let unreadable = snapshot.unreadable.len();

        let status = if corrupted > 0 || unreadable > 0 {
            VaultStatus::Corrupted
        } else if degraded > 1 {
            VaultStatus::Critical
        } else if degraded == 1 || snapshot.entries.is_empty() {
            VaultStatus::Warning
        } else {
            VaultStatus::Healthy
        };

        VaultHealth {
            status,
            total: snapshot.entries.len() + unreadable,
            expired,
            missing_payload,
            corrupted,
            unreadable,
        }
    }
}
