//! Payload digests
//!
//! Every stored payload carries a SHA-256 checksum computed at creation and
//! re-verified before any restore and by the health monitor.

use sha2::{Digest, Sha256};

use crate::crypto::ct_eq;
use crate::error::{Result, VaultError};

/// Lower-case hex SHA-256 of `payload`
pub fn compute(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Whether `payload` still matches `expected`
pub fn verify(payload: &[u8], expected: &str) -> bool {
    let actual = compute(payload);
    ct_eq(actual.as_bytes(), expected.trim().to_ascii_lowercase().as_bytes())
}

/// [`compute`] on the blocking pool; hands the payload back for reuse
pub async fn compute_async(payload: Vec<u8>) -> Result<(Vec<u8>, String)> {
    tokio::task::spawn_blocking(move || {
        let digest = compute(&payload);
        (payload, digest)
    })
    .await
    .map_err(|e| VaultError::Other(format!("Checksum task failed: {}", e)))
}

/// [`verify`] on the blocking pool; hands the payload back for reuse
pub async fn verify_async(payload: Vec<u8>, expected: String) -> Result<(Vec<u8>, bool)> {
    tokio::task::spawn_blocking(move || {
        let ok = verify(&payload, &expected);
        (payload, ok)
    })
    .await
    .map_err(|e| VaultError::Other(format!("Checksum task failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            compute(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify_detects_single_byte_change() {
        let mut payload = b"payload bytes".to_vec();
        let digest = compute(&payload);
        assert!(verify(&payload, &digest));

        payload[3] ^= 0x01;
        assert!(!verify(&payload, &digest));
    }

    #[test]
    fn test_verify_accepts_uppercase() {
        let digest = compute(b"abc").to_uppercase();
        assert!(verify(b"abc", &digest));
    }

    #[tokio::test]
    async fn test_async_variants_agree() {
        let (_, digest) = compute_async(b"abc".to_vec()).await.unwrap();
        let (payload, ok) = verify_async(b"abc".to_vec(), digest).await.unwrap();
        assert!(ok);
        assert_eq!(payload, b"abc");
    }
}
