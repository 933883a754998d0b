//! Vault configuration
//!
//! Read from `<config_dir>/keymaker/vault.json`. Every field is optional;
//! missing fields and a missing file fall back to defaults. The
//! `KEYMAKER_VAULT_DIR` environment variable overrides the data directory.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::{KdfParams, MAX_ITERATIONS, MAX_MEMORY_KIB, MAX_PARALLELISM};
use crate::error::{Result, VaultError};
use crate::vault::{AuthPolicy, COOLDOWN, MAX_ATTEMPTS};

const APP_DIR: &str = "keymaker";
const CONFIG_FILE: &str = "vault.json";
const VAULT_DIR: &str = "emergency_vault";

/// Overrides `data_dir`
pub const DATA_DIR_ENV: &str = "KEYMAKER_VAULT_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Root of the vault store
    pub data_dir: PathBuf,
    /// Argon2id cost for newly sealed payloads
    pub kdf: KdfParams,
    /// Failed restore attempts before lockout
    pub max_attempts: u32,
    /// Lockout length in seconds
    pub cooldown_secs: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            kdf: KdfParams::default(),
            max_attempts: MAX_ATTEMPTS,
            cooldown_secs: COOLDOWN.as_secs(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(VAULT_DIR)
}

/// Path of the configuration file
pub fn config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
        .ok_or_else(|| VaultError::InvalidConfig("Could not determine the configuration directory".into()))
}

impl VaultConfig {
    /// Load from the default location and apply the environment override
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&config_path()?)?;
        config.apply_data_dir_override(std::env::var_os(DATA_DIR_ENV));
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("no config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&data)
            .map_err(|e| VaultError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    pub fn apply_data_dir_override(&mut self, value: Option<OsString>) {
        if let Some(dir) = value.filter(|v| !v.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(VaultError::InvalidConfig("data_dir must not be empty".into()));
        }
        if self.max_attempts == 0 {
            return Err(VaultError::InvalidConfig("max_attempts must be at least 1".into()));
        }
        if self.cooldown_secs == 0 {
            return Err(VaultError::InvalidConfig("cooldown_secs must be at least 1".into()));
        }

        let kdf = &self.kdf;
        if kdf.iterations == 0 || kdf.parallelism == 0 {
            return Err(VaultError::InvalidConfig(
                "kdf iterations and parallelism must be at least 1".into(),
            ));
        }
        if kdf.exceeds_limits() {
            return Err(VaultError::InvalidConfig(format!(
                "kdf costs are capped at memory_kib {}, iterations {}, parallelism {}",
                MAX_MEMORY_KIB, MAX_ITERATIONS, MAX_PARALLELISM
            )));
        }
        // Argon2 needs 8 KiB per lane
        let lane_floor = kdf.parallelism.saturating_mul(8);
        if kdf.memory_kib < lane_floor {
            return Err(VaultError::InvalidConfig(format!(
                "kdf memory_kib must be at least {} for {} lanes",
                lane_floor, kdf.parallelism
            )));
        }
        Ok(())
    }

    pub fn auth_policy(&self) -> AuthPolicy {
        AuthPolicy {
            max_attempts: self.max_attempts,
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }
}
