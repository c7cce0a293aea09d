use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{WalletError, WalletResult};

/// Manages filesystem paths used by one device profile.
#[derive(Debug, Clone)]
pub struct ProfilePaths {
    /// Root directory for profile data.
    root_dir: PathBuf,
    /// Directory holding the wallet record.
    keystore_dir: PathBuf,
    /// Directory holding lockout state, kept apart from the wallet record.
    state_dir: PathBuf,
    /// Path to persisted profile configuration.
    config_file: PathBuf,
}

impl ProfilePaths {
    pub const KEYSTORE_DIRNAME: &'static str = "keystore";
    pub const STATE_DIRNAME: &'static str = "state";
    pub const CONFIG_FILENAME: &'static str = "profile.config";

    /// Create a new path manager rooted at the provided directory.
    pub fn new(root: impl AsRef<Path>) -> WalletResult<Self> {
        let root_dir = root.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(WalletError::StorageUnavailable(
                "Profile root directory cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            keystore_dir: root_dir.join(Self::KEYSTORE_DIRNAME),
            state_dir: root_dir.join(Self::STATE_DIRNAME),
            config_file: root_dir.join(Self::CONFIG_FILENAME),
            root_dir,
        })
    }

    /// Ensure the directory structure exists, creating missing folders.
    pub fn ensure_directories(&self) -> WalletResult<()> {
        fs::create_dir_all(&self.root_dir)?;
        fs::create_dir_all(&self.keystore_dir)?;
        fs::create_dir_all(&self.state_dir)?;
        Ok(())
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn keystore_dir(&self) -> &Path {
        &self.keystore_dir
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }
}
