//! Emergency vault: backup records, their storage and the facade over them

mod auth;
mod emergency;
mod events;
mod health;
mod legacy;
pub mod record;
mod store;

pub use auth::{AuthPolicy, AuthState, RestoreAuthenticator, COOLDOWN, MAX_ATTEMPTS};
pub use emergency::{BackupSpec, BulkReport, Clock, CreatedBackup, EmergencyVault, SystemClock};
pub use events::{VaultEvent, EVENT_CAPACITY};
pub use health::{RecordHealth, VaultHealth, VaultHealthMonitor, VaultSnapshot, VaultStatus};
pub use legacy::{MigrationReport, SkippedEntry, LEGACY_FILE, MIGRATION_MARKER};
pub use record::{BackupRecord, BackupScheme, Partition, RecordId, ShamirParams};
pub use store::{DeleteOutcome, VaultStore};
pub(crate) use store::write_atomic;
