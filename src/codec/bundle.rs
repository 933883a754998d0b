//! Key bundle: the plaintext every scheme protects
//!
//! JSON document `{ "version": 1, "keys": [ ... ] }` with private and
//! public bytes base64-encoded.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::SecureBytes;
use crate::error::{Result, VaultError};
use crate::keys::{KeyMaterial, KeyType};

const BUNDLE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct BundleEntry {
    private_key: String,
    public_key: String,
    fingerprint: String,
    #[serde(default)]
    comment: Option<String>,
    #[zeroize(skip)]
    key_type: KeyType,
}

#[derive(Serialize, Deserialize)]
struct KeyBundle {
    version: u32,
    keys: Vec<BundleEntry>,
}

/// Serialize `keys` into bundle bytes
pub fn pack(keys: &[KeyMaterial]) -> Result<SecureBytes> {
    let bundle = KeyBundle {
        version: BUNDLE_VERSION,
        keys: keys
            .iter()
            .map(|key| BundleEntry {
                private_key: STANDARD.encode(&*key.private_bytes),
                public_key: STANDARD.encode(&key.public_bytes),
                fingerprint: key.fingerprint.clone(),
                comment: key.comment.clone(),
                key_type: key.key_type,
            })
            .collect(),
    };

    Ok(SecureBytes::new(serde_json::to_vec(&bundle)?))
}

/// Parse bundle bytes back into key material
pub fn unpack(bytes: &[u8]) -> Result<Vec<KeyMaterial>> {
    let bundle: KeyBundle = serde_json::from_slice(bytes)
        .map_err(|e| VaultError::Other(format!("Key bundle is unreadable: {}", e)))?;

    if bundle.version != BUNDLE_VERSION {
        return Err(VaultError::Other(format!("Unsupported key bundle version: {}", bundle.version)));
    }
    if bundle.keys.is_empty() {
        return Err(VaultError::Other("Key bundle contains no keys".into()));
    }

    bundle
        .keys
        .iter()
        .map(|entry| {
            let private = STANDARD
                .decode(&entry.private_key)
                .map_err(|e| VaultError::Other(format!("Corrupt private key in bundle: {}", e)))?;
            let public = STANDARD
                .decode(&entry.public_key)
                .map_err(|e| VaultError::Other(format!("Corrupt public key in bundle: {}", e)))?;

            Ok(KeyMaterial {
                private_bytes: SecureBytes::new(private),
                public_bytes: public,
                fingerprint: entry.fingerprint.clone(),
                comment: entry.comment.clone(),
                key_type: entry.key_type,
            })
        })
        .collect()
}
