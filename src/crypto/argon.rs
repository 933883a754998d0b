//! Argon2id Key Derivation Function
//!
//! Uses Argon2id (winner of the Password Hashing Competition) to derive
//! payload encryption keys from backup passphrases. Argon2id is resistant to:
//! - GPU attacks (memory-hard)
//! - Side-channel attacks (hybrid approach)
//! - Time-memory trade-off attacks

use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::SecureBytes;
use crate::error::{Result, VaultError};

/// Salt length in bytes (256 bits)
pub const SALT_LEN: usize = 32;

/// Derived key length in bytes (256 bits for ChaCha20)
pub const KEY_LEN: usize = 32;

/// Upper bounds accepted for any cost parameter, configured or read from a payload
pub const MAX_MEMORY_KIB: u32 = 1024 * 1024;
pub const MAX_ITERATIONS: u32 = 64;
pub const MAX_PARALLELISM: u32 = 64;

/// Argon2id cost parameters.
///
/// Stored in every sealed payload header, so changing the configured
/// parameters never breaks existing backups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// OWASP recommended for high security: 64 MB, 3 passes, 4 lanes
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// True if any cost is above the accepted maximum
    pub fn exceeds_limits(&self) -> bool {
        self.memory_kib > MAX_MEMORY_KIB || self.iterations > MAX_ITERATIONS || self.parallelism > MAX_PARALLELISM
    }

    fn to_argon2(self) -> Result<Params> {
        Params::new(self.memory_kib, self.iterations, self.parallelism, Some(KEY_LEN))
            .map_err(|e| VaultError::InvalidConfig(format!("Argon2 params error: {}", e)))
    }
}

/// A derived encryption key with its associated salt
pub struct DerivedKey {
    /// The derived key material (32 bytes)
    pub key: SecureBytes,
    /// The salt used for derivation (32 bytes)
    pub salt: [u8; SALT_LEN],
}

impl Zeroize for DerivedKey {
    fn zeroize(&mut self) {
        self.key.zeroize();
        self.salt.zeroize();
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// Derive an encryption key from a passphrase using Argon2id
///
/// # Arguments
/// * `password` - The backup passphrase
/// * `salt` - Optional salt (if None, generates a new random salt)
/// * `params` - Cost parameters
pub fn derive_key(password: &[u8], salt: Option<&[u8; SALT_LEN]>, params: KdfParams) -> Result<DerivedKey> {
    let salt_bytes: [u8; SALT_LEN] = match salt {
        Some(s) => *s,
        None => {
            let mut s = [0u8; SALT_LEN];
            OsRng.fill_bytes(&mut s);
            s
        }
    };

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);

    let mut key_bytes = vec![0u8; KEY_LEN];
    argon2
        .hash_password_into(password, &salt_bytes, &mut key_bytes)
        .map_err(|e| VaultError::Other(format!("Key derivation failed: {}", e)))?;

    Ok(DerivedKey {
        key: SecureBytes::new(key_bytes),
        salt: salt_bytes,
    })
}
