use std::time::Duration;

use thiserror::Error;

use crate::vault::RecordId;

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not enough shares: {provided} provided, {required} required")]
    InsufficientShares { provided: usize, required: usize },

    #[error("Backup is time-locked for another {}", format_remaining(.remaining))]
    StillLocked { remaining: Duration },

    #[error("Authentication failed ({attempts_left} attempts left)")]
    AuthenticationFailed { attempts_left: u32 },

    #[error("Too many failed attempts, try again in {}", format_remaining(.remaining))]
    Cooldown { remaining: Duration },

    #[error("Backup {id} is corrupted: checksum mismatch")]
    CorruptedPayload { id: RecordId },

    #[error("Decryption failed: data corrupted or credential incorrect")]
    DecryptionFailed,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Backup {0} not found")]
    NotFound(RecordId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl VaultError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether this failure counts against the restore attempt limit.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, Self::DecryptionFailed | Self::AuthenticationFailed { .. })
    }
}

/// Human-readable rendering of a wait, rounded up to whole seconds.
pub fn format_remaining(remaining: &Duration) -> String {
    let mut secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs += 1;
    }

    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_remaining_rounds_up() {
        assert_eq!(format_remaining(&Duration::from_millis(29_100)), "30s");
        assert_eq!(format_remaining(&Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_remaining(&Duration::from_secs(3 * 3600 + 120)), "3h 2m");
        assert_eq!(format_remaining(&Duration::from_secs(2 * 86_400 + 3600)), "2d 1h");
    }

    #[test]
    fn test_display_insufficient_shares() {
        let err = VaultError::InsufficientShares { provided: 2, required: 3 };
        assert_eq!(err.to_string(), "Not enough shares: 2 provided, 3 required");
    }

    #[test]
    fn test_credential_failures() {
        assert!(VaultError::DecryptionFailed.is_credential_failure());
        assert!(!VaultError::StillLocked { remaining: Duration::from_secs(1) }.is_credential_failure());
        assert!(!VaultError::InsufficientShares { provided: 1, required: 2 }.is_credential_failure());
    }
}
