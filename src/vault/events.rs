//! Vault state-change notifications

use tokio::sync::broadcast;

use super::health::VaultStatus;
use super::record::{BackupRecord, RecordId};

/// Capacity of the event channel; slow subscribers see `Lagged`
pub const EVENT_CAPACITY: usize = 64;

/// Published by [`EmergencyVault`](super::EmergencyVault) after each
/// successful state change
#[derive(Debug, Clone, PartialEq)]
pub enum VaultEvent {
    BackupCreated(BackupRecord),
    BackupRestored(BackupRecord),
    BackupDeleted(RecordId),
    VaultStatusChanged(VaultStatus),
}

pub(crate) struct EventBus {
    tx: broadcast::Sender<VaultEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, event: VaultEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}
