//! SSH key material as consumed by the vault
//!
//! The vault never scans the filesystem for keys. Whoever owns key
//! discovery implements [`KeyMaterialSource`] and hands over
//! [`KeyMaterial`] values; restores hand them back the same way.

use std::fmt;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ssh_key::{HashAlg, PrivateKey};

use crate::crypto::SecureBytes;
use crate::error::{Result, VaultError};

/// Supported SSH key types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Ed25519,
    Rsa,
    /// Listed but not recommended
    Ecdsa,
}

impl KeyType {
    /// Map an OpenSSH algorithm name (`ssh-ed25519`, `ecdsa-sha2-nistp256`, ...)
    pub fn from_algorithm(name: &str) -> Option<Self> {
        match name {
            "ssh-ed25519" => Some(Self::Ed25519),
            "ssh-rsa" | "rsa-sha2-256" | "rsa-sha2-512" => Some(Self::Rsa),
            n if n.starts_with("ecdsa-sha2-") => Some(Self::Ecdsa),
            _ => None,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ed25519 => "ED25519",
            Self::Rsa => "RSA",
            Self::Ecdsa => "ECDSA",
        };
        f.write_str(name)
    }
}

/// One SSH key pair handed to or returned from the vault
pub struct KeyMaterial {
    /// Private key bytes, wiped on drop
    pub private_bytes: SecureBytes,
    /// Public key bytes (usually the OpenSSH `.pub` line)
    pub public_bytes: Vec<u8>,
    /// `SHA256:<base64>` fingerprint
    pub fingerprint: String,
    pub comment: Option<String>,
    pub key_type: KeyType,
}

impl KeyMaterial {
    /// Generate a new random Ed25519 key
    ///
    /// Private bytes are the 32-byte seed, public bytes the OpenSSH line.
    pub fn generate_ed25519(comment: &str) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key: VerifyingKey = (&signing_key).into();

        let blob = ed25519_public_blob(verifying_key.as_bytes());
        let openssh = format!("ssh-ed25519 {} {}", STANDARD.encode(&blob), comment);

        Self {
            private_bytes: SecureBytes::new(signing_key.to_bytes().to_vec()),
            public_bytes: openssh.into_bytes(),
            fingerprint: fingerprint_of_blob(&blob),
            comment: Some(comment.to_string()),
            key_type: KeyType::Ed25519,
        }
    }

    /// Independent copy, including a freshly locked private buffer
    pub fn duplicate(&self) -> Self {
        Self {
            private_bytes: self.private_bytes.duplicate(),
            public_bytes: self.public_bytes.clone(),
            fingerprint: self.fingerprint.clone(),
            comment: self.comment.clone(),
            key_type: self.key_type,
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("fingerprint", &self.fingerprint)
            .field("key_type", &self.key_type)
            .field("comment", &self.comment)
            .field("private_bytes", &self.private_bytes)
            .finish()
    }
}

/// Supplier of key material for a requested key set
pub trait KeyMaterialSource {
    /// Load the keys identified by `selection` (paths, names or
    /// fingerprints, depending on the source), preserving order.
    fn load(&self, selection: &[String]) -> Result<Vec<KeyMaterial>>;
}

/// Reads OpenSSH private key files
///
/// The private bytes are the file as written by `ssh-keygen`, so keys
/// protected with their own passphrase stay protected inside a backup.
pub struct OpenSshFileSource {
    base_dir: PathBuf,
}

impl OpenSshFileSource {
    /// Relative selections resolve against `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Source rooted at `~/.ssh`
    pub fn user_ssh_dir() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| VaultError::Other("Could not determine home directory".into()))?;
        Ok(Self::new(home.join(".ssh")))
    }

    fn load_one(&self, path: &Path) -> Result<KeyMaterial> {
        let path = self.base_dir.join(path);
        let data = std::fs::read(&path)?;
        let private = PrivateKey::from_openssh(&data)
            .map_err(|e| VaultError::Validation(format!("{}: not an OpenSSH private key: {}", path.display(), e)))?;

        let public = private.public_key();
        let algorithm = public.algorithm();
        let key_type = KeyType::from_algorithm(algorithm.as_str())
            .ok_or_else(|| VaultError::Validation(format!("{}: unsupported key type {}", path.display(), algorithm)))?;
        let public_line = public
            .to_openssh()
            .map_err(|e| VaultError::Other(format!("Could not encode public key: {}", e)))?;

        let comment = Some(private.comment().trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        tracing::debug!("loaded {} key from {}", key_type, path.display());
        Ok(KeyMaterial {
            private_bytes: SecureBytes::new(data),
            public_bytes: public_line.into_bytes(),
            fingerprint: public.fingerprint(HashAlg::Sha256).to_string(),
            comment,
            key_type,
        })
    }
}

impl KeyMaterialSource for OpenSshFileSource {
    fn load(&self, selection: &[String]) -> Result<Vec<KeyMaterial>> {
        selection.iter().map(|s| self.load_one(Path::new(s))).collect()
    }
}

/// OpenSSH wire blob for an Ed25519 public key:
/// [u32 len]["ssh-ed25519"][u32 len][32 byte key]
fn ed25519_public_blob(public_key: &[u8; 32]) -> Vec<u8> {
    let key_type = b"ssh-ed25519";
    let mut blob = Vec::with_capacity(4 + key_type.len() + 4 + public_key.len());
    blob.extend_from_slice(&(key_type.len() as u32).to_be_bytes());
    blob.extend_from_slice(key_type);
    blob.extend_from_slice(&(public_key.len() as u32).to_be_bytes());
    blob.extend_from_slice(public_key);
    blob
}

/// OpenSSH-style `SHA256:` fingerprint of a public key blob
pub fn fingerprint_of_blob(blob: &[u8]) -> String {
    format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(blob)))
}

/// Fingerprint of an OpenSSH public key line (`<type> <base64> [comment]`)
pub fn fingerprint_of_openssh(line: &str) -> Result<String> {
    let encoded = line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| VaultError::validation("public key line has no key data"))?;
    let blob = STANDARD
        .decode(encoded)
        .map_err(|e| VaultError::Validation(format!("public key is not valid base64: {}", e)))?;
    Ok(fingerprint_of_blob(&blob))
}
