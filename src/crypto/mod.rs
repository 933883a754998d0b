//! Cryptographic primitives for the emergency vault
//!
//! This module provides:
//! - Argon2id for passphrase-based key derivation
//! - ChaCha20-Poly1305 for authenticated encryption of payloads
//! - Secure memory handling with automatic zeroing
//! - The sealed payload container format shared by all codecs
//!
//! Sealed payload format:
//! [4 bytes: version (u32 BE)][1 byte: mode]
//! mode = passphrase: [4+4+4 bytes: argon2 m/t/p (u32 BE)][32 bytes: salt]
//! [12 bytes: nonce][N bytes: ciphertext + 16 byte tag]

mod argon;
mod chacha;
mod secure_bytes;

pub use argon::{derive_key, DerivedKey, KdfParams, MAX_ITERATIONS, MAX_MEMORY_KIB, MAX_PARALLELISM, SALT_LEN};
pub use chacha::{decrypt, encrypt, KEY_LEN, NONCE_LEN, TAG_LEN};
pub use secure_bytes::SecureBytes;
pub(crate) use secure_bytes::ct_eq;

use crate::error::{Result, VaultError};

/// Current version of the sealed payload format
pub const FORMAT_VERSION: u32 = 1;

const MODE_PASSPHRASE: u8 = 1;
const MODE_RAW_KEY: u8 = 2;

const PREFIX_LEN: usize = 4 + 1;
const KDF_LEN: usize = 12;

/// Seal `plaintext` under a key derived from `passphrase`
pub fn seal_with_passphrase(plaintext: &[u8], passphrase: &[u8], params: KdfParams) -> Result<Vec<u8>> {
    let derived = derive_key(passphrase, None, params)?;
    let (nonce, ciphertext) = encrypt(&derived.key, plaintext)?;

    let mut data = Vec::with_capacity(PREFIX_LEN + KDF_LEN + SALT_LEN + NONCE_LEN + ciphertext.len());
    data.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
    data.push(MODE_PASSPHRASE);
    data.extend_from_slice(&params.memory_kib.to_be_bytes());
    data.extend_from_slice(&params.iterations.to_be_bytes());
    data.extend_from_slice(&params.parallelism.to_be_bytes());
    data.extend_from_slice(&derived.salt);
    data.extend_from_slice(&nonce);
    data.extend_from_slice(&ciphertext);
    Ok(data)
}

/// Open a payload produced by [`seal_with_passphrase`]
pub fn open_with_passphrase(data: &[u8], passphrase: &[u8]) -> Result<SecureBytes> {
    let body = parse_prefix(data, MODE_PASSPHRASE)?;
    if body.len() < KDF_LEN + SALT_LEN + NONCE_LEN + TAG_LEN {
        return Err(VaultError::DecryptionFailed);
    }

    let params = KdfParams {
        memory_kib: read_u32(&body[0..4]),
        iterations: read_u32(&body[4..8]),
        parallelism: read_u32(&body[8..12]),
    };
    if params.exceeds_limits() {
        return Err(VaultError::Other(format!(
            "payload KDF parameters exceed limits (m={}, t={}, p={})",
            params.memory_kib, params.iterations, params.parallelism
        )));
    }

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&body[KDF_LEN..KDF_LEN + SALT_LEN]);
    let nonce_start = KDF_LEN + SALT_LEN;
    let nonce = &body[nonce_start..nonce_start + NONCE_LEN];
    let ciphertext = &body[nonce_start + NONCE_LEN..];

    let derived = derive_key(passphrase, Some(&salt), params)?;
    decrypt(&derived.key, nonce, ciphertext)
}

/// Seal `plaintext` under a raw 32-byte key
pub fn seal_with_key(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    let (nonce, ciphertext) = encrypt(key, plaintext)?;

    let mut data = Vec::with_capacity(PREFIX_LEN + NONCE_LEN + ciphertext.len());
    data.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
    data.push(MODE_RAW_KEY);
    data.extend_from_slice(&nonce);
    data.extend_from_slice(&ciphertext);
    Ok(data)
}

/// Open a payload produced by [`seal_with_key`]
pub fn open_with_key(data: &[u8], key: &[u8]) -> Result<SecureBytes> {
    let body = parse_prefix(data, MODE_RAW_KEY)?;
    if body.len() < NONCE_LEN + TAG_LEN {
        return Err(VaultError::DecryptionFailed);
    }
    decrypt(key, &body[..NONCE_LEN], &body[NONCE_LEN..])
}

/// Whether `data` starts like a sealed payload of any mode
pub fn is_sealed(data: &[u8]) -> bool {
    data.len() >= PREFIX_LEN
        && read_u32(&data[0..4]) == FORMAT_VERSION
        && matches!(data[4], MODE_PASSPHRASE | MODE_RAW_KEY)
}

fn parse_prefix(data: &[u8], expected_mode: u8) -> Result<&[u8]> {
    if data.len() < PREFIX_LEN {
        return Err(VaultError::DecryptionFailed);
    }

    let version = read_u32(&data[0..4]);
    if version != FORMAT_VERSION {
        return Err(VaultError::Other(format!("Unsupported payload version: {}", version)));
    }
    if data[4] != expected_mode {
        return Err(VaultError::Other(format!("Unexpected payload mode: {}", data[4])));
    }

    Ok(&data[PREFIX_LEN..])
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
pub(crate) const TEST_KDF: KdfParams = KdfParams {
    memory_kib: 1024,
    iterations: 1,
    parallelism: 1,
};
