//! ChaCha20-Poly1305 Authenticated Encryption
//!
//! Backup payloads are sealed with an AEAD cipher so that a wrong
//! passphrase or a wrong share set is detected instead of yielding garbage.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

use super::SecureBytes;
use crate::error::{Result, VaultError};

/// Nonce length for ChaCha20-Poly1305 (96 bits)
pub const NONCE_LEN: usize = 12;

/// Authentication tag length (128 bits)
pub const TAG_LEN: usize = 16;

/// Key length (256 bits)
pub const KEY_LEN: usize = 32;

/// Encrypt data using ChaCha20-Poly1305
///
/// Returns (nonce, ciphertext) where ciphertext includes the auth tag.
/// A fresh random nonce is generated for every call.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    if key.len() != KEY_LEN {
        return Err(VaultError::EncryptionFailed(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LEN,
            key.len()
        )));
    }

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    Ok((nonce_bytes, ciphertext))
}

/// Decrypt data using ChaCha20-Poly1305
///
/// # Errors
/// Returns DecryptionFailed if the key or nonce has the wrong length, or
/// if tag verification fails (wrong key or tampered data).
pub fn decrypt(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<SecureBytes> {
    if key.len() != KEY_LEN || nonce.len() != NONCE_LEN {
        return Err(VaultError::DecryptionFailed);
    }

    let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| VaultError::DecryptionFailed)?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| VaultError::DecryptionFailed)?;

    Ok(SecureBytes::new(plaintext))
}
