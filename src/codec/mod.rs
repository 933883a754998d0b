//! Scheme codecs
//!
//! Each backup scheme turns a key set into a payload and back:
//! - [`ArchiveCodec`]: all selected keys, optionally sealed by a passphrase
//! - [`QrCodec`]: exactly one key as a printable string for QR rendering
//! - [`ShamirCodec`]: sealed under a random data key split into shares
//! - [`TimeLockCodec`]: passphrase-sealed, opens only after the unlock time
//!
//! A wrong credential surfaces as `DecryptionFailed`; the restore
//! authenticator turns that into a counted authentication failure.

mod archive;
pub(crate) mod bundle;
mod qr;
mod shamir;
mod timelock;

pub use archive::ArchiveCodec;
pub use qr::{QrCodec, QR_MAX_BYTES};
pub use shamir::ShamirCodec;
pub use timelock::TimeLockCodec;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::crypto::KdfParams;
use crate::error::{Result, VaultError};
use crate::keys::KeyMaterial;
use crate::vault::{BackupRecord, BackupScheme, ShamirParams};

/// Inputs to [`SchemeCodec::encode`] besides the keys
#[derive(Clone, Copy)]
pub struct EncodeParams<'a> {
    pub passphrase: Option<&'a SecretString>,
    pub shamir: Option<ShamirParams>,
    pub kdf: KdfParams,
}

/// What the user must keep to restore a backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSpec {
    /// Nothing beyond access to the vault
    None,
    /// The passphrase chosen at creation
    Passphrase,
    /// Printable text to render as a QR code
    QrText(String),
    /// Encoded Shamir shares, to be distributed; never stored
    Shares(Vec<String>),
}

/// Codec output
pub struct Encoded {
    pub payload: Vec<u8>,
    pub credential_spec: CredentialSpec,
    /// The payload is actually sealed
    pub is_encrypted: bool,
}

/// Credential supplied at restore time
pub enum Credential {
    None,
    Passphrase(SecretString),
    /// Text read back from a QR code, plus its passphrase if it has one
    Scanned {
        text: String,
        passphrase: Option<SecretString>,
    },
    Shares(Vec<String>),
}

impl Credential {
    pub fn passphrase(value: impl Into<String>) -> Self {
        Self::Passphrase(SecretString::new(value.into()))
    }

    fn passphrase_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Passphrase(p) => Some(p.expose_secret().as_bytes()),
            Self::Scanned { passphrase: Some(p), .. } => Some(p.expose_secret().as_bytes()),
            _ => None,
        }
    }

    fn require_passphrase(&self) -> Result<&[u8]> {
        self.passphrase_bytes()
            .ok_or_else(|| VaultError::validation("a passphrase is required to restore this backup"))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Passphrase(_) => f.write_str("Passphrase([REDACTED])"),
            Self::Scanned { passphrase, .. } => f
                .debug_struct("Scanned")
                .field("has_passphrase", &passphrase.is_some())
                .finish(),
            Self::Shares(shares) => f.debug_struct("Shares").field("count", &shares.len()).finish(),
        }
    }
}

/// Per-restore context handed to [`SchemeCodec::decode`]
pub struct DecodeContext<'a> {
    pub record: &'a BackupRecord,
    pub now: DateTime<Utc>,
}

/// Encoding and decoding for one backup scheme
pub trait SchemeCodec: Send + Sync {
    fn scheme(&self) -> BackupScheme;

    fn encode(&self, keys: &[KeyMaterial], params: &EncodeParams<'_>) -> Result<Encoded>;

    fn decode(&self, payload: &[u8], credential: &Credential, ctx: &DecodeContext<'_>) -> Result<Vec<KeyMaterial>>;
}

static ARCHIVE: ArchiveCodec = ArchiveCodec;
static QR: QrCodec = QrCodec;
static SHAMIR: ShamirCodec = ShamirCodec;
static TIME_LOCK: TimeLockCodec = TimeLockCodec;

/// Codec responsible for `scheme`
pub fn codec_for(scheme: BackupScheme) -> &'static dyn SchemeCodec {
    match scheme {
        BackupScheme::EncryptedArchive => &ARCHIVE,
        BackupScheme::QrCode => &QR,
        BackupScheme::ShamirSecretSharing => &SHAMIR,
        BackupScheme::TimeLocked => &TIME_LOCK,
    }
}

/// Passphrase given at creation, rejecting empty strings
fn creation_passphrase<'a>(params: &EncodeParams<'a>) -> Result<Option<&'a [u8]>> {
    match params.passphrase {
        Some(p) if p.expose_secret().is_empty() => Err(VaultError::validation("passphrase must not be empty")),
        Some(p) => Ok(Some(p.expose_secret().as_bytes())),
        None => Ok(None),
    }
}

fn require_keys(keys: &[KeyMaterial]) -> Result<()> {
    if keys.is_empty() {
        return Err(VaultError::validation("select at least one key to back up"));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::crypto::TEST_KDF;

    pub fn params(passphrase: Option<&SecretString>) -> EncodeParams<'_> {
        EncodeParams {
            passphrase,
            shamir: None,
            kdf: TEST_KDF,
        }
    }

    pub fn record_for(scheme: BackupScheme, encoded: &Encoded) -> BackupRecord {
        let mut record = crate::vault::record::tests::sample(scheme);
        record.is_encrypted = encoded.is_encrypted;
        record
    }

    pub fn assert_same_keys(original: &[KeyMaterial], restored: &[KeyMaterial]) {
        assert_eq!(original.len(), restored.len());
        for (a, b) in original.iter().zip(restored) {
            assert_eq!(a.fingerprint, b.fingerprint);
            assert_eq!(a.private_bytes, b.private_bytes);
            assert_eq!(a.key_type, b.key_type);
        }
    }
}
