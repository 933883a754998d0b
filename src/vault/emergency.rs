//! Emergency vault facade
//!
//! Validates requests, runs codecs off the async threads, persists through
//! the single-writer [`VaultStore`] and publishes [`VaultEvent`]s. Holds no
//! UI state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tokio::sync::broadcast;

use super::auth::{AuthPolicy, AuthState, RestoreAuthenticator};
use super::events::{EventBus, VaultEvent};
use super::health::{VaultHealth, VaultHealthMonitor, VaultStatus};
use super::legacy::MigrationReport;
use super::record::{BackupRecord, BackupScheme, RecordId, ShamirParams};
use super::store::{DeleteOutcome, VaultStore};
use crate::checksum;
use crate::codec::{codec_for, Credential, CredentialSpec, DecodeContext, EncodeParams};
use crate::config::VaultConfig;
use crate::crypto::KdfParams;
use crate::error::{Result, VaultError};
use crate::keys::KeyMaterial;

/// Source of wall-clock time for expiry decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// What to create
pub struct BackupSpec {
    pub name: String,
    pub description: Option<String>,
    pub scheme: BackupScheme,
    pub passphrase: Option<SecretString>,
    pub expires_at: Option<DateTime<Utc>>,
    pub shamir: Option<ShamirParams>,
}

impl BackupSpec {
    pub fn new(name: impl Into<String>, scheme: BackupScheme) -> Self {
        Self {
            name: name.into(),
            description: None,
            scheme,
            passphrase: None,
            expires_at: None,
            shamir: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(SecretString::new(passphrase.into()));
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn with_shares(mut self, total_shares: u8, threshold: u8) -> Self {
        self.shamir = Some(ShamirParams { total_shares, threshold });
        self
    }
}

/// A new backup and the material the user must keep to restore it
#[derive(Debug)]
pub struct CreatedBackup {
    pub record: BackupRecord,
    pub credential_spec: CredentialSpec,
}

/// Partial-success report of a bulk operation
#[derive(Debug, Default)]
pub struct BulkReport {
    pub succeeded: usize,
    pub failed: Vec<(RecordId, VaultError)>,
}

pub struct EmergencyVault {
    store: tokio::sync::Mutex<VaultStore>,
    sessions: Mutex<HashMap<RecordId, Arc<RestoreAuthenticator>>>,
    events: EventBus,
    last_status: Mutex<Option<VaultStatus>>,
    clock: Arc<dyn Clock>,
    kdf: KdfParams,
    auth_policy: AuthPolicy,
    startup_migration: Option<MigrationReport>,
}

impl EmergencyVault {
    pub fn new(store: VaultStore, kdf: KdfParams, auth_policy: AuthPolicy) -> Self {
        Self {
            store: tokio::sync::Mutex::new(store),
            sessions: Mutex::new(HashMap::new()),
            events: EventBus::new(),
            last_status: Mutex::new(None),
            clock: Arc::new(SystemClock),
            kdf,
            auth_policy,
            startup_migration: None,
        }
    }

    /// Open the store named by `config` and run the legacy migration
    pub async fn open(config: &VaultConfig) -> Result<Self> {
        config.validate()?;
        let store = VaultStore::open(&config.data_dir).await?;
        let mut vault = Self::new(store, config.kdf, config.auth_policy());
        let report = vault.migrate_legacy().await?;
        vault.startup_migration = Some(report);
        Ok(vault)
    }

    /// Report of the migration run by [`open`](Self::open)
    pub fn startup_migration(&self) -> Option<&MigrationReport> {
        self.startup_migration.as_ref()
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.events.subscribe()
    }

    /// Encode, checksum and persist a new backup of `keys`
    pub async fn create_backup(&self, spec: BackupSpec, keys: &[KeyMaterial]) -> Result<CreatedBackup> {
        let now = self.clock.now();
        validate_spec(&spec, keys, now)?;

        let scheme = spec.scheme;
        let shamir = spec.shamir;
        let kdf = self.kdf;
        let passphrase = spec.passphrase;
        let owned: Vec<KeyMaterial> = keys.iter().map(KeyMaterial::duplicate).collect();

        let encoded = tokio::task::spawn_blocking(move || {
            let params = EncodeParams {
                passphrase: passphrase.as_ref(),
                shamir,
                kdf,
            };
            codec_for(scheme).encode(&owned, &params)
        })
        .await
        .map_err(|e| VaultError::Other(format!("Encoding task failed: {}", e)))??;

        let (payload, digest) = checksum::compute_async(encoded.payload).await?;

        let mut record = BackupRecord {
            id: RecordId::new(),
            name: spec.name.trim().to_string(),
            description: spec.description.filter(|d| !d.trim().is_empty()),
            scheme,
            created_at: now,
            expires_at: spec.expires_at,
            key_fingerprints: keys.iter().map(|k| k.fingerprint.clone()).collect(),
            is_encrypted: encoded.is_encrypted,
            payload_location: Default::default(),
            file_size: 0,
            checksum: digest,
            shamir: if scheme == BackupScheme::ShamirSecretSharing { shamir } else { None },
            last_restored_at: None,
        };

        self.store.lock().await.create(&mut record, &payload).await?;

        tracing::info!("created {} backup '{}' ({})", scheme, record.name, record.id);
        self.events.publish(VaultEvent::BackupCreated(record.clone()));
        self.refresh_status().await;

        Ok(CreatedBackup {
            record,
            credential_spec: encoded.credential_spec,
        })
    }

    /// Verify integrity, authenticate and decode a backup
    pub async fn restore_backup(&self, id: RecordId, credential: Credential) -> Result<Vec<KeyMaterial>> {
        let (record, payload) = {
            let store = self.store.lock().await;
            let record = store.require(id).await?;
            let payload = store.read_payload(&record).await?;
            let (payload, intact) = checksum::verify_async(payload, record.checksum.clone()).await?;
            if !intact {
                drop(store);
                tracing::error!("checksum mismatch on backup {}", id);
                self.refresh_status().await;
                return Err(VaultError::CorruptedPayload { id });
            }
            (record, payload)
        };

        let session = self.session(id);
        let now = self.clock.now();
        let decode_record = record.clone();

        let keys = session
            .attempt(|| async move {
                tokio::task::spawn_blocking(move || {
                    let ctx = DecodeContext {
                        record: &decode_record,
                        now,
                    };
                    codec_for(decode_record.scheme).decode(&payload, &credential, &ctx)
                })
                .await
                .map_err(|e| VaultError::Other(format!("Decoding task failed: {}", e)))?
            })
            .await?;

        if session.state() == AuthState::Authenticated {
            self.end_restore_session(id);
        }

        let mut record = record;
        record.last_restored_at = Some(now);
        if let Err(e) = self.store.lock().await.update(&record).await {
            tracing::warn!("could not record restore time for {}: {e}", id);
        }

        tracing::info!("restored {} keys from backup {}", keys.len(), id);
        self.events.publish(VaultEvent::BackupRestored(record));
        Ok(keys)
    }

    /// Delete a backup; unexpired time locks are refused
    pub async fn delete_backup(&self, id: RecordId) -> Result<DeleteOutcome> {
        let outcome = {
            let store = self.store.lock().await;
            let record = store.require(id).await?;
            if let Some(remaining) = record.lock_remaining(self.clock.now()) {
                return Err(VaultError::StillLocked { remaining });
            }
            store.delete(id).await?
        };

        self.end_restore_session(id);
        self.events.publish(VaultEvent::BackupDeleted(id));
        self.refresh_status().await;
        Ok(outcome)
    }

    /// Delete every backup, collecting per-record failures
    pub async fn delete_all(&self) -> Result<BulkReport> {
        let mut report = BulkReport::default();
        for record in self.list_backups().await? {
            match self.delete_backup(record.id).await {
                Ok(_) => report.succeeded += 1,
                Err(e) => {
                    tracing::warn!("could not delete backup {}: {e}", record.id);
                    report.failed.push((record.id, e));
                }
            }
        }
        Ok(report)
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        self.store.lock().await.list().await
    }

    pub async fn get_backup(&self, id: RecordId) -> Result<Option<BackupRecord>> {
        self.store.lock().await.get(id).await
    }

    /// Assess the vault now and publish a status change if there is one
    pub async fn health(&self) -> Result<VaultHealth> {
        let snapshot = self.store.lock().await.snapshot(self.clock.now()).await?;
        let health = VaultHealthMonitor::assess(&snapshot);
        self.publish_status(health.status);
        Ok(health)
    }

    pub async fn migrate_legacy(&self) -> Result<MigrationReport> {
        let report = self.store.lock().await.migrate_legacy().await?;
        if report.migrated() > 0 {
            self.refresh_status().await;
        }
        Ok(report)
    }

    /// State of the restore session for `id`, if one is open
    pub fn restore_state(&self, id: RecordId) -> Option<(AuthState, u32)> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(&id).map(|s| (s.state(), s.remaining_attempts()))
    }

    /// Tear down the restore session for `id`, cancelling any cooldown timer
    pub fn end_restore_session(&self, id: RecordId) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(&id);
    }

    fn session(&self, id: RecordId) -> Arc<RestoreAuthenticator> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(id)
            .or_insert_with(|| Arc::new(RestoreAuthenticator::new(self.auth_policy)))
            .clone()
    }

    async fn refresh_status(&self) {
        if let Err(e) = self.health().await {
            tracing::warn!("vault health check failed: {e}");
        }
    }

    fn publish_status(&self, status: VaultStatus) {
        let mut last = self.last_status.lock().unwrap_or_else(|e| e.into_inner());
        if *last != Some(status) {
            *last = Some(status);
            drop(last);
            tracing::info!("vault status: {}", status);
            self.events.publish(VaultEvent::VaultStatusChanged(status));
        }
    }
}

fn validate_spec(spec: &BackupSpec, keys: &[KeyMaterial], now: DateTime<Utc>) -> Result<()> {
    if spec.name.trim().is_empty() {
        return Err(VaultError::validation("backup name must not be empty"));
    }
    if keys.is_empty() {
        return Err(VaultError::validation("select at least one key to back up"));
    }
    if spec.scheme == BackupScheme::QrCode && keys.len() != 1 {
        return Err(VaultError::Validation(format!(
            "a QR code backup holds exactly one key, {} selected",
            keys.len()
        )));
    }
    for (i, key) in keys.iter().enumerate() {
        if key.fingerprint.trim().is_empty() {
            return Err(VaultError::validation("every key needs a fingerprint"));
        }
        if keys[..i].iter().any(|k| k.fingerprint == key.fingerprint) {
            return Err(VaultError::Validation(format!("key {} is selected twice", key.fingerprint)));
        }
    }

    match spec.scheme {
        BackupScheme::ShamirSecretSharing => spec
            .shamir
            .ok_or_else(|| VaultError::validation("Shamir backups need a share count and threshold"))?
            .validate()?,
        _ if spec.shamir.is_some() => {
            return Err(VaultError::validation("share parameters only apply to Shamir backups"));
        }
        _ => {}
    }

    if spec.scheme == BackupScheme::TimeLocked {
        let expires_at = spec
            .expires_at
            .ok_or_else(|| VaultError::validation("time-locked backups need an unlock time"))?;
        if expires_at <= now {
            return Err(VaultError::validation("unlock time must be in the future"));
        }
        if spec.passphrase.is_none() {
            return Err(VaultError::validation("time-locked backups require a passphrase"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::crypto::TEST_KDF;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn advance(&self, by: ChronoDuration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    async fn vault() -> (tempfile::TempDir, EmergencyVault, Arc<ManualClock>) {
        let dir = tempfile::tempdir().unwrap();
        let store = VaultStore::open(dir.path()).await.unwrap();
        let clock = Arc::new(ManualClock(Mutex::new(Utc::now())));
        let vault = EmergencyVault::new(store, TEST_KDF, AuthPolicy::default()).with_clock(clock.clone());
        (dir, vault, clock)
    }

    fn shares_of(created: &CreatedBackup) -> Vec<String> {
        match &created.credential_spec {
            CredentialSpec::Shares(shares) => shares.clone(),
            other => panic!("expected shares, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shamir_scenario() {
        let (_dir, vault, _) = vault().await;
        let key = KeyMaterial::generate_ed25519("deploy@ci");

        let created = vault
            .create_backup(
                BackupSpec::new("deploy key", BackupScheme::ShamirSecretSharing).with_shares(5, 3),
                std::slice::from_ref(&key),
            )
            .await
            .unwrap();
        let shares = shares_of(&created);
        let id = created.record.id;

        let two = Credential::Shares(vec![shares[1].clone(), shares[3].clone()]);
        assert!(matches!(
            vault.restore_backup(id, two).await,
            Err(VaultError::InsufficientShares { provided: 2, required: 3 })
        ));

        let three = Credential::Shares(vec![shares[0].clone(), shares[2].clone(), shares[4].clone()]);
        let restored = vault.restore_backup(id, three).await.unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].private_bytes, key.private_bytes);
        assert_eq!(restored[0].fingerprint, key.fingerprint);

        let stored = vault.get_backup(id).await.unwrap().unwrap();
        assert!(stored.last_restored_at.is_some());

        vault.delete_backup(id).await.unwrap();
        assert!(vault.get_backup(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_validation_before_encoding() {
        let (_dir, vault, _) = vault().await;
        let a = KeyMaterial::generate_ed25519("a");
        let b = KeyMaterial::generate_ed25519("b");

        let err = vault
            .create_backup(BackupSpec::new("qr", BackupScheme::QrCode), &[a.duplicate(), b.duplicate()])
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));

        let err = vault
            .create_backup(BackupSpec::new("empty", BackupScheme::EncryptedArchive), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));

        let err = vault
            .create_backup(
                BackupSpec::new("bad shares", BackupScheme::ShamirSecretSharing).with_shares(2, 3),
                std::slice::from_ref(&a),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));

        let err = vault
            .create_backup(
                BackupSpec::new("past", BackupScheme::TimeLocked)
                    .with_passphrase("pw")
                    .expiring_at(Utc::now() - ChronoDuration::minutes(1)),
                std::slice::from_ref(&a),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));

        assert!(vault.list_backups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_time_lock_gate_and_protected_delete() {
        let (_dir, vault, clock) = vault().await;
        let key = KeyMaterial::generate_ed25519("vault");

        let created = vault
            .create_backup(
                BackupSpec::new("will", BackupScheme::TimeLocked)
                    .with_passphrase("open later")
                    .expiring_at(clock.now() + ChronoDuration::days(7)),
                std::slice::from_ref(&key),
            )
            .await
            .unwrap();
        let id = created.record.id;

        // Locked regardless of credential, and no attempts consumed
        for pass in ["open later", "wrong", "wrong", "wrong"] {
            assert!(matches!(
                vault.restore_backup(id, Credential::passphrase(pass)).await,
                Err(VaultError::StillLocked { .. })
            ));
        }
        assert_eq!(vault.restore_state(id), Some((AuthState::Idle, 3)));

        assert!(matches!(vault.delete_backup(id).await, Err(VaultError::StillLocked { .. })));

        clock.advance(ChronoDuration::days(7));

        assert!(matches!(
            vault.restore_backup(id, Credential::passphrase("wrong")).await,
            Err(VaultError::AuthenticationFailed { attempts_left: 2 })
        ));
        let restored = vault.restore_backup(id, Credential::passphrase("open later")).await.unwrap();
        assert_eq!(restored[0].private_bytes, key.private_bytes);

        vault.delete_backup(id).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_restore() {
        let (_dir, vault, _) = vault().await;
        let key = KeyMaterial::generate_ed25519("laptop");
        let created = vault
            .create_backup(
                BackupSpec::new("laptop", BackupScheme::EncryptedArchive).with_passphrase("right"),
                std::slice::from_ref(&key),
            )
            .await
            .unwrap();
        let id = created.record.id;

        for _ in 0..3 {
            assert!(matches!(
                vault.restore_backup(id, Credential::passphrase("wrong")).await,
                Err(VaultError::AuthenticationFailed { .. })
            ));
        }
        assert_eq!(vault.restore_state(id), Some((AuthState::Locked, 0)));

        assert!(matches!(
            vault.restore_backup(id, Credential::passphrase("right")).await,
            Err(VaultError::Cooldown { .. })
        ));

        tokio::time::advance(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;
        assert_eq!(vault.restore_state(id), Some((AuthState::Idle, 3)));

        let restored = vault.restore_backup(id, Credential::passphrase("right")).await.unwrap();
        assert_eq!(restored[0].fingerprint, key.fingerprint);
        // Session ends after success
        assert_eq!(vault.restore_state(id), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_restores_hit_cooldown() {
        let (_dir, vault, _) = vault().await;
        let key = KeyMaterial::generate_ed25519("server");
        let created = vault
            .create_backup(
                BackupSpec::new("server", BackupScheme::EncryptedArchive).with_passphrase("right"),
                std::slice::from_ref(&key),
            )
            .await
            .unwrap();
        let id = created.record.id;
        let vault = Arc::new(vault);

        let tasks: Vec<_> = (0..10)
            .map(|n| {
                let vault = vault.clone();
                tokio::spawn(async move { vault.restore_backup(id, Credential::passphrase(format!("guess{n}"))).await })
            })
            .collect();

        let (mut failed, mut cooldown) = (0, 0);
        for task in tasks {
            match task.await.unwrap() {
                Err(VaultError::AuthenticationFailed { .. }) => failed += 1,
                Err(VaultError::Cooldown { .. }) => cooldown += 1,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!((failed, cooldown), (3, 7));
        assert_eq!(vault.restore_state(id), Some((AuthState::Locked, 0)));
    }

    #[tokio::test]
    async fn test_corruption_detected() {
        let (_dir, vault, _) = vault().await;
        let key = KeyMaterial::generate_ed25519("c");
        let created = vault
            .create_backup(BackupSpec::new("plain", BackupScheme::EncryptedArchive), std::slice::from_ref(&key))
            .await
            .unwrap();
        let id = created.record.id;

        let path = &created.record.payload_location;
        let mut bytes = std::fs::read(path).unwrap();
        bytes[10] ^= 0x20;
        std::fs::write(path, bytes).unwrap();

        assert!(matches!(
            vault.restore_backup(id, Credential::None).await,
            Err(VaultError::CorruptedPayload { .. })
        ));
        assert_eq!(vault.health().await.unwrap().status, VaultStatus::Corrupted);

        // Unhealthy but still there
        assert!(vault.get_backup(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_events_published() {
        let (_dir, vault, _) = vault().await;
        let mut events = vault.subscribe();
        let key = KeyMaterial::generate_ed25519("c");

        let created = vault
            .create_backup(
                BackupSpec::new("qr", BackupScheme::QrCode).with_description("wallet card"),
                std::slice::from_ref(&key),
            )
            .await
            .unwrap();
        assert!(matches!(created.credential_spec, CredentialSpec::QrText(_)));

        assert_eq!(events.recv().await.unwrap(), VaultEvent::BackupCreated(created.record.clone()));
        assert_eq!(events.recv().await.unwrap(), VaultEvent::VaultStatusChanged(VaultStatus::Healthy));

        vault.restore_backup(created.record.id, Credential::None).await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), VaultEvent::BackupRestored(r) if r.id == created.record.id));

        vault.delete_backup(created.record.id).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), VaultEvent::BackupDeleted(created.record.id));
        assert_eq!(events.recv().await.unwrap(), VaultEvent::VaultStatusChanged(VaultStatus::Warning));
    }

    #[tokio::test]
    async fn test_delete_all_reports_partial_success() {
        let (_dir, vault, clock) = vault().await;
        let key = KeyMaterial::generate_ed25519("c");

        vault
            .create_backup(BackupSpec::new("a", BackupScheme::EncryptedArchive), std::slice::from_ref(&key))
            .await
            .unwrap();
        vault
            .create_backup(BackupSpec::new("b", BackupScheme::QrCode), std::slice::from_ref(&key))
            .await
            .unwrap();
        let locked = vault
            .create_backup(
                BackupSpec::new("c", BackupScheme::TimeLocked)
                    .with_passphrase("pw")
                    .expiring_at(clock.now() + ChronoDuration::hours(1)),
                std::slice::from_ref(&key),
            )
            .await
            .unwrap();

        let report = vault.delete_all().await.unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, locked.record.id);
        assert!(matches!(report.failed[0].1, VaultError::StillLocked { .. }));
    }
}
