//! On-disk record storage
//!
//! Layout:
//! <root>/regular/<id>/record.json + payload.bin
//! <root>/emergency/<id>/record.json + payload.bin
//!
//! Files are written to a temporary name, synced and renamed into place, so
//! a crash never leaves a record pointing at a partial payload. Records
//! are read back from disk on every call; nothing is cached. Payload paths
//! are always derived from the store root and record id, so the vault
//! directory can be moved and the stored `payload_location` is informational.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::health::{RecordHealth, VaultSnapshot};
use super::record::{BackupRecord, Partition, RecordId};
use crate::checksum;
use crate::error::{Result, VaultError};

pub(crate) const RECORD_FILE: &str = "record.json";
pub(crate) const PAYLOAD_FILE: &str = "payload.bin";
const TOMBSTONE_FILE: &str = ".deleted";

const PARTITIONS: [Partition; 2] = [Partition::Regular, Partition::Emergency];

/// Result of [`VaultStore::delete`]
#[derive(Debug)]
pub struct DeleteOutcome {
    pub id: RecordId,
    /// Set when the payload is gone but the metadata file could not be
    /// removed; the record is tombstoned and no longer listed.
    pub metadata_residue: Option<String>,
}

/// Durable storage of backup records and their payloads
pub struct VaultStore {
    root: PathBuf,
}

impl VaultStore {
    /// Open (and create if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for partition in PARTITIONS {
            let dir = root.join(partition.dir_name());
            fs::create_dir_all(&dir).await?;
            restrict_dir(&dir).await?;
        }
        restrict_dir(&root).await?;

        tracing::debug!("vault store opened at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_dir(&self, partition: Partition, id: RecordId) -> PathBuf {
        self.root.join(partition.dir_name()).join(id.to_string())
    }

    fn payload_path(&self, record: &BackupRecord) -> PathBuf {
        self.record_dir(record.partition(), record.id).join(PAYLOAD_FILE)
    }

    /// Persist `payload` then `record`; fills in the payload location and size
    pub async fn create(&self, record: &mut BackupRecord, payload: &[u8]) -> Result<RecordId> {
        self.persist(record, Some(payload)).await
    }

    /// Shared by [`create`](Self::create) and legacy migration, which may
    /// carry records whose payload is already lost.
    pub(crate) async fn persist(&self, record: &mut BackupRecord, payload: Option<&[u8]>) -> Result<RecordId> {
        record.validate()?;

        // A directory without committed metadata is left over from an
        // interrupted write and is replaced
        let dir = self.record_dir(record.partition(), record.id);
        let committed = match fs::metadata(dir.join(RECORD_FILE)).await {
            Ok(meta) => meta.is_file(),
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        if committed {
            return Err(VaultError::Other(format!("Backup {} already exists", record.id)));
        }

        fs::create_dir_all(&dir).await?;
        let guard = PendingRecord::new(dir.clone());
        restrict_dir(&dir).await?;

        let payload_path = dir.join(PAYLOAD_FILE);
        record.payload_location = payload_path.clone();
        if let Some(payload) = payload {
            write_atomic(&payload_path, payload).await?;
            record.file_size = payload.len() as u64;
        }

        let metadata = serde_json::to_vec_pretty(record)?;
        if let Err(e) = write_atomic(&dir.join(RECORD_FILE), &metadata).await {
            tracing::warn!("metadata write for {} failed, removing payload: {e}", record.id);
            return Err(e);
        }

        guard.commit();
        tracing::info!("stored {} backup {} ({} bytes)", record.scheme, record.id, record.file_size);
        Ok(record.id)
    }

    /// All live records, oldest first
    pub async fn list(&self) -> Result<Vec<BackupRecord>> {
        Ok(self.scan().await?.0)
    }

    /// Live records plus the record directories whose metadata cannot be read
    async fn scan(&self) -> Result<(Vec<BackupRecord>, Vec<PathBuf>)> {
        let mut records = Vec::new();
        let mut unreadable = Vec::new();

        for partition in PARTITIONS {
            let mut entries = match fs::read_dir(self.root.join(partition.dir_name())).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                match read_record_dir(&entry.path()).await {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!("unreadable record {}: {e}", entry.path().display());
                        unreadable.push(entry.path());
                    }
                }
            }
        }

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        unreadable.sort();
        Ok((records, unreadable))
    }

    /// Directory and metadata of `id`, wherever it is stored
    async fn locate(&self, id: RecordId) -> Result<Option<(PathBuf, BackupRecord)>> {
        for partition in PARTITIONS {
            let dir = self.record_dir(partition, id);
            if let Some(record) = read_record_dir(&dir).await? {
                return Ok(Some((dir, record)));
            }
        }
        Ok(None)
    }

    pub async fn get(&self, id: RecordId) -> Result<Option<BackupRecord>> {
        Ok(self.locate(id).await?.map(|(_, record)| record))
    }

    /// Like [`get`](Self::get) but a missing record is an error
    pub async fn require(&self, id: RecordId) -> Result<BackupRecord> {
        self.get(id).await?.ok_or(VaultError::NotFound(id))
    }

    pub async fn read_payload(&self, record: &BackupRecord) -> Result<Vec<u8>> {
        Ok(fs::read(self.payload_path(record)).await?)
    }

    /// Rewrite the metadata of an existing record (restore bookkeeping)
    pub async fn update(&self, record: &BackupRecord) -> Result<()> {
        record.validate()?;
        let dir = self.record_dir(record.partition(), record.id);
        if read_record_dir(&dir).await?.is_none() {
            return Err(VaultError::NotFound(record.id));
        }
        write_atomic(&dir.join(RECORD_FILE), &serde_json::to_vec_pretty(record)?).await
    }

    /// Remove payload, then metadata
    pub async fn delete(&self, id: RecordId) -> Result<DeleteOutcome> {
        let (dir, _) = self.locate(id).await?.ok_or(VaultError::NotFound(id))?;

        match fs::remove_file(dir.join(PAYLOAD_FILE)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("payload of {} was already gone", id);
            }
            Err(e) => return Err(e.into()),
        }

        let outcome = retire_metadata(&dir, id).await;
        if outcome.metadata_residue.is_none() {
            tracing::info!("deleted backup {}", id);
        }
        Ok(outcome)
    }

    /// Observe payload presence and checksum validity of every record
    pub async fn snapshot(&self, now: DateTime<Utc>) -> Result<VaultSnapshot> {
        let (records, unreadable) = self.scan().await?;
        let mut entries = Vec::new();

        for record in records {
            let health = match fs::read(self.payload_path(&record)).await {
                Ok(payload) => {
                    let (_, valid) = checksum::verify_async(payload, record.checksum.clone()).await?;
                    RecordHealth {
                        record,
                        payload_present: true,
                        checksum_valid: Some(valid),
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotFound => RecordHealth {
                    record,
                    payload_present: false,
                    checksum_valid: None,
                },
                Err(e) => return Err(e.into()),
            };
            entries.push(health);
        }

        Ok(VaultSnapshot {
            taken_at: now,
            entries,
            unreadable,
        })
    }
}

/// Metadata of a record directory; `None` if absent or tombstoned
async fn read_record_dir(dir: &Path) -> Result<Option<BackupRecord>> {
    if fs::try_exists(dir.join(TOMBSTONE_FILE)).await? {
        return Ok(None);
    }

    let data = match fs::read(dir.join(RECORD_FILE)).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut record: BackupRecord = serde_json::from_slice(&data)?;
    let expected = Path::new(record.partition().dir_name()).join(record.id.to_string());
    if !dir.ends_with(&expected) {
        return Err(VaultError::Other(format!(
            "record {} is stored under {}",
            record.id,
            dir.display()
        )));
    }
    record.payload_location = dir.join(PAYLOAD_FILE);
    Ok(Some(record))
}

/// Remove the metadata of a record whose payload is gone. On failure the
/// directory is tombstoned and the error is reported as residue.
async fn retire_metadata(dir: &Path, id: RecordId) -> DeleteOutcome {
    let mut outcome = DeleteOutcome {
        id,
        metadata_residue: None,
    };

    if let Err(e) = fs::remove_file(dir.join(RECORD_FILE)).await {
        tracing::error!("payload of {} removed but metadata remains: {e}", id);
        if let Err(t) = fs::write(dir.join(TOMBSTONE_FILE), id.to_string()).await {
            tracing::error!("could not tombstone {}: {t}", id);
        }
        outcome.metadata_residue = Some(e.to_string());
        return outcome;
    }

    if let Err(e) = fs::remove_dir_all(dir).await {
        tracing::debug!("record directory {} left behind: {e}", dir.display());
    }
    outcome
}

/// Write via temp file + fsync + rename
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let temp_path = path.with_extension(format!("tmp.{}", Uuid::new_v4()));

    let result = async {
        let mut options = fs::OpenOptions::new();
        options.create_new(true).write(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(())
}

async fn restrict_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Removes a half-written record directory unless committed, including
/// when the creating future is dropped mid-write
struct PendingRecord {
    dir: PathBuf,
    committed: bool,
}

impl PendingRecord {
    fn new(dir: PathBuf) -> Self {
        Self { dir, committed: false }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingRecord {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!("could not clean up {}: {e}", self.dir.display());
            }
        }
    }
}
