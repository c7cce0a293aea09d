use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::lockout::LockoutPolicy;
use crate::security::SecurityConfig;
use crate::storage::file_store::write_atomic;
use crate::storage::ProfilePaths;

const CONFIG_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockoutTier {
    pub threshold: u32,
    pub lock_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileConfig {
    pub pin_length: usize,
    pub lockout_tiers: Vec<LockoutTier>,
    pub verify_mnemonic_checksum: bool,
    pub environment: String,
    pub last_updated: DateTime<Utc>,
    pub version: u16,
}

impl ProfileConfig {
    /// Defaults taken from the active [`SecurityConfig`].
    pub fn from_security(security: &SecurityConfig) -> WalletResult<Self> {
        let lockout_tiers = security
            .lockout_policy()?
            .tiers()
            .iter()
            .map(|(threshold, duration)| LockoutTier {
                threshold: *threshold,
                lock_seconds: duration.as_secs(),
            })
            .collect();

        Ok(Self {
            pin_length: security.pin_length()?,
            lockout_tiers,
            verify_mnemonic_checksum: security.verify_mnemonic_checksum()?,
            environment: security.environment().as_str().to_string(),
            last_updated: Utc::now(),
            version: CONFIG_VERSION,
        })
    }

    pub fn lockout_policy(&self) -> WalletResult<LockoutPolicy> {
        LockoutPolicy::new(
            self.lockout_tiers
                .iter()
                .map(|tier| (tier.threshold, Duration::from_secs(tier.lock_seconds)))
                .collect(),
        )
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigEnvelope {
    version: u16,
    checksum: [u8; 32],
    payload: ProfileConfig,
    modified_at_unix: i64,
}

/// Handles persistence of profile configuration with integrity checks.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_paths(paths: &ProfilePaths) -> Self {
        Self {
            path: paths.config_file().to_path_buf(),
        }
    }

    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Load the stored config, writing one derived from `security` on first use.
    pub fn load_or_default(&self, security: &SecurityConfig) -> WalletResult<ProfileConfig> {
        if !self.path.exists() {
            let config = ProfileConfig::from_security(security)?;
            self.save(&config)?;
            return Ok(config);
        }

        let bytes = fs::read(&self.path)?;
        let envelope: ConfigEnvelope = serde_json::from_slice(&bytes)
            .map_err(|_| WalletError::ValidationError("Config file is malformed".to_string()))?;
        if envelope.version != CONFIG_VERSION {
            return Err(WalletError::ValidationError(format!(
                "Unsupported config version {}",
                envelope.version
            )));
        }

        if checksum(&envelope.payload)? != envelope.checksum {
            return Err(WalletError::ValidationError(
                "Config integrity verification failed".to_string(),
            ));
        }

        Ok(envelope.payload)
    }

    pub fn save(&self, config: &ProfileConfig) -> WalletResult<()> {
        config.lockout_policy()?;

        let mut payload = config.clone();
        payload.touch();

        let envelope = ConfigEnvelope {
            version: CONFIG_VERSION,
            checksum: checksum(&payload)?,
            modified_at_unix: payload.last_updated.timestamp(),
            payload,
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
        write_atomic(&self.path, &serialized)?;
        log::debug!("Profile configuration written to {}", self.path.display());
        Ok(())
    }

    pub fn update<F>(&self, security: &SecurityConfig, updater: F) -> WalletResult<ProfileConfig>
    where
        F: FnOnce(&mut ProfileConfig) -> WalletResult<()>,
    {
        let mut config = self.load_or_default(security)?;
        updater(&mut config)?;
        config.touch();
        self.save(&config)?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn checksum(config: &ProfileConfig) -> WalletResult<[u8; 32]> {
    let mut hasher = Blake3::new();
    let encoded = serde_json::to_vec(config)?;
    hasher.update(&encoded);
    Ok(*hasher.finalize().as_bytes())
}
