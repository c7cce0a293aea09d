use std::path::Path;
use std::sync::Arc;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::config_store::{ConfigStore, ProfileConfig};
use crate::crypto;
use crate::errors::{WalletError, WalletResult};
use crate::lockout::LockoutTracker;
use crate::security;
use crate::session::{SessionKeyContext, SessionVault};
use crate::storage::{FileStore, Keystore, KeyValueStore, MemoryStore, ProfilePaths, WalletPayload};
use crate::validation::InputValidator;

/// Where the application should send the user on entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryRoute {
    /// No wallet stored yet.
    Setup,
    /// A wallet exists but no usable session does.
    PinLock,
    Wallet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockedWallet {
    pub address: String,
}

/// Ties keystore, lockout and session together for one device profile.
#[derive(Debug)]
pub struct WalletContext {
    paths: Option<ProfilePaths>,
    config: Option<ProfileConfig>,
    keystore: Keystore,
    lockout: LockoutTracker,
    session: SessionVault,
    validator: InputValidator,
    verify_mnemonic_checksum: bool,
    /// Held from the lock check until the attempt is counted or cleared.
    attempts: tokio::sync::Mutex<()>,
}

impl WalletContext {
    /// Open the profile rooted at `root_dir`. The session-scoped storage starts
    /// empty; the session key lives in `keys` for as long as the caller keeps it.
    pub fn initialize(root_dir: impl AsRef<Path>, keys: Arc<SessionKeyContext>) -> WalletResult<Self> {
        let security = security::init_security_config_from_env()?;
        let paths = ProfilePaths::new(root_dir)?;
        paths.ensure_directories()?;

        let config = ConfigStore::from_paths(&paths).load_or_default(security)?;
        let keystore = Keystore::new(Arc::new(FileStore::new(paths.keystore_dir())?));
        let lockout = LockoutTracker::new(
            Arc::new(FileStore::new(paths.state_dir())?),
            config.lockout_policy()?,
        );
        let session_storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let session = SessionVault::new(keys, session_storage);
        let validator = InputValidator::with_pin_length(config.pin_length)?;

        log::info!(
            "Wallet profile opened at {} ({} environment)",
            paths.root_dir().display(),
            config.environment
        );

        Ok(Self {
            verify_mnemonic_checksum: config.verify_mnemonic_checksum,
            paths: Some(paths),
            config: Some(config),
            keystore,
            lockout,
            session,
            validator,
            attempts: tokio::sync::Mutex::new(()),
        })
    }

    /// Assemble a context from already-built parts.
    pub fn from_parts(
        keystore: Keystore,
        lockout: LockoutTracker,
        session: SessionVault,
        validator: InputValidator,
    ) -> Self {
        Self {
            paths: None,
            config: None,
            keystore,
            lockout,
            session,
            validator,
            verify_mnemonic_checksum: false,
            attempts: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_mnemonic_checksum(mut self, enabled: bool) -> Self {
        self.verify_mnemonic_checksum = enabled;
        self
    }

    pub fn keystore(&self) -> &Keystore {
        &self.keystore
    }

    pub fn lockout(&self) -> &LockoutTracker {
        &self.lockout
    }

    pub fn session(&self) -> &SessionVault {
        &self.session
    }

    pub fn validator(&self) -> &InputValidator {
        &self.validator
    }

    pub fn paths(&self) -> Option<&ProfilePaths> {
        self.paths.as_ref()
    }

    pub fn config(&self) -> Option<&ProfileConfig> {
        self.config.as_ref()
    }

    /// Store a new wallet sealed under `pin` and open a session for it.
    pub async fn setup_wallet(
        &self,
        address: &str,
        mnemonic: SecretString,
        pin: SecretString,
        confirm_pin: SecretString,
    ) -> WalletResult<UnlockedWallet> {
        self.validator.validate_new_pin(&pin, &confirm_pin)?;
        self.validator.validate_address(address)?;
        if self.verify_mnemonic_checksum {
            self.validator.validate_mnemonic_checksum(&mnemonic)?;
        } else {
            self.validator.validate_mnemonic(&mnemonic)?;
        }

        let _attempt = self.attempts.lock().await;
        let keystore = self.keystore.clone();
        let owned_address = address.to_string();
        let mnemonic = tokio::task::spawn_blocking(move || {
            keystore
                .save(&owned_address, &mnemonic, &pin)
                .map(|()| mnemonic)
        })
        .await??;

        self.lockout.reset_failed_attempts()?;
        self.session.init_session(address, &mnemonic)?;
        log::info!("Wallet set up for {}", address);

        Ok(UnlockedWallet {
            address: address.to_string(),
        })
    }

    /// Verify `pin`, decrypt the wallet and cache it in the session.
    ///
    /// An active lock is reported before any key stretching happens. A wrong
    /// PIN is counted against the lockout schedule. Attempts run one at a
    /// time, so each sees the lock armed by the one before it.
    pub async fn unlock(&self, pin: SecretString) -> WalletResult<UnlockedWallet> {
        self.validator.validate_pin(&pin)?;
        let _attempt = self.attempts.lock().await;
        self.lockout.ensure_unlocked()?;

        let keystore = self.keystore.clone();
        let outcome = tokio::task::spawn_blocking(move || -> WalletResult<Option<WalletPayload>> {
            let Some(hash) = keystore.verification_hash()? else {
                return Err(WalletError::NotFound("No wallet stored".to_string()));
            };
            if !crypto::verify_pin(&pin, &hash) {
                return Ok(None);
            }
            keystore
                .load(&pin)?
                .map(Some)
                .ok_or(WalletError::AuthenticationFailed)
        })
        .await??;

        let Some(payload) = outcome else {
            let state = self.lockout.record_failed_attempt()?;
            log::warn!(
                "Unlock rejected ({} failed attempts)",
                state.failed_attempts
            );
            return Err(WalletError::AuthenticationFailed);
        };

        self.lockout.reset_failed_attempts()?;
        self.session.init_session(&payload.address, &payload.mnemonic)?;
        log::info!("Wallet unlocked for {}", payload.address);

        Ok(UnlockedWallet {
            address: payload.address,
        })
    }

    /// Re-seal the wallet under `new_pin`. The current PIN is checked like an
    /// unlock attempt.
    pub async fn change_pin(
        &self,
        current_pin: SecretString,
        new_pin: SecretString,
        confirm_pin: SecretString,
    ) -> WalletResult<()> {
        self.validator.validate_pin(&current_pin)?;
        self.validator.validate_new_pin(&new_pin, &confirm_pin)?;
        let _attempt = self.attempts.lock().await;
        self.lockout.ensure_unlocked()?;

        let keystore = self.keystore.clone();
        let changed = tokio::task::spawn_blocking(move || -> WalletResult<bool> {
            let Some(hash) = keystore.verification_hash()? else {
                return Err(WalletError::NotFound("No wallet stored".to_string()));
            };
            if !crypto::verify_pin(&current_pin, &hash) {
                return Ok(false);
            }
            keystore.change_pin(&current_pin, &new_pin)?;
            Ok(true)
        })
        .await??;

        if !changed {
            self.lockout.record_failed_attempt()?;
            return Err(WalletError::AuthenticationFailed);
        }

        self.lockout.reset_failed_attempts()
    }

    /// Route for a fresh entry into the application. A session left over from
    /// a different stored wallet is cleared.
    pub fn entry_route(&self) -> WalletResult<EntryRoute> {
        let Some(stored_address) = self.keystore.stored_address()? else {
            return Ok(EntryRoute::Setup);
        };

        if self.session.is_valid() {
            if self.session.session_address().as_deref() == Some(stored_address.as_str()) {
                return Ok(EntryRoute::Wallet);
            }
            log::warn!("Session belongs to another wallet; clearing session");
            self.session.clear()?;
        }
        Ok(EntryRoute::PinLock)
    }

    /// Recovery phrase cached by the current session.
    pub fn session_mnemonic(&self) -> WalletResult<SecretString> {
        self.session.require_session()
    }

    /// Recovery phrase for `address`. A session opened for any other address is
    /// cleared.
    pub fn require_session(&self, address: &str) -> WalletResult<SecretString> {
        if !self.session.is_valid() {
            return Err(WalletError::SessionInvalid);
        }

        if self.session.session_address().as_deref() != Some(address) {
            log::warn!("Session address mismatch; clearing session");
            self.session.clear()?;
            return Err(WalletError::SessionInvalid);
        }

        self.session.require_session()
    }

    /// End the session. The stored wallet is untouched.
    pub fn lock(&self) -> WalletResult<()> {
        self.session.clear()
    }

    /// Erase the wallet, its lockout state and the session.
    pub fn reset_wallet(&self) -> WalletResult<()> {
        self.session.clear()?;
        self.keystore.erase()?;
        self.lockout.reset_failed_attempts()?;
        log::info!("Wallet reset");
        Ok(())
    }
}
