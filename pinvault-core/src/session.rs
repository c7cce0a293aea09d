use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use ring::aead::LessSafeKey;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::crypto::{self, KEY_LEN, NONCE_LEN};
use crate::errors::{WalletError, WalletResult};
use crate::storage::KeyValueStore;

pub const SESSION_AUTHENTICATED_KEY: &str = "authenticated";
pub const SESSION_ADDRESS_KEY: &str = "wallet_address";
pub const SESSION_SECRET_KEY: &str = "wallet_encrypted";

const AUTHENTICATED_MARKER: &[u8] = b"true";

/// Process-lifetime session key.
///
/// The key is generated on first use and lives only inside this value. It has
/// no serialized form; dropping the context (a process restart) makes every
/// blob sealed under it permanently unreadable.
#[derive(Default)]
pub struct SessionKeyContext {
    key: Mutex<Option<LessSafeKey>>,
}

impl SessionKeyContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_key(&self) -> bool {
        self.key.lock().is_some()
    }

    /// Drop the key. The next [`Self::with_key`] generates a new one.
    pub fn clear(&self) {
        self.key.lock().take();
    }

    /// Run `operation` with the key, generating it first if absent.
    fn with_key<T>(
        &self,
        operation: impl FnOnce(&LessSafeKey) -> WalletResult<T>,
    ) -> WalletResult<T> {
        let mut slot = self.key.lock();
        if slot.is_none() {
            let raw = Zeroizing::new(crypto::random_bytes::<KEY_LEN>()?);
            *slot = Some(crypto::less_safe_key(&raw[..])?);
            log::debug!("Generated session key");
        }

        match slot.as_ref() {
            Some(key) => operation(key),
            None => Err(WalletError::SessionInvalid),
        }
    }

    /// Run `operation` only if a key already exists.
    fn with_existing_key<T>(
        &self,
        operation: impl FnOnce(&LessSafeKey) -> WalletResult<T>,
    ) -> WalletResult<T> {
        let slot = self.key.lock();
        let key = slot.as_ref().ok_or(WalletError::SessionInvalid)?;
        operation(key)
    }
}

impl fmt::Debug for SessionKeyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeyContext")
            .field("has_key", &self.has_key())
            .finish()
    }
}

/// Caches the unlocked recovery phrase for one session, sealed under the
/// in-memory session key.
#[derive(Debug, Clone)]
pub struct SessionVault {
    keys: Arc<SessionKeyContext>,
    storage: Arc<dyn KeyValueStore>,
}

impl SessionVault {
    pub fn new(keys: Arc<SessionKeyContext>, storage: Arc<dyn KeyValueStore>) -> Self {
        Self { keys, storage }
    }

    /// Seal `mnemonic` under the session key and publish the session markers.
    pub fn init_session(&self, address: &str, mnemonic: &SecretString) -> WalletResult<()> {
        let nonce = crypto::random_bytes::<NONCE_LEN>()?;
        let ciphertext = self.keys.with_key(|key| {
            crypto::seal_with(key, nonce, mnemonic.expose_secret().as_bytes())
        })?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        // Marker dropped first and written last: a session interrupted mid-write
        // never looks authenticated.
        self.storage.delete(SESSION_AUTHENTICATED_KEY)?;
        self.storage
            .put(SESSION_SECRET_KEY, hex::encode(blob).as_bytes())?;
        self.storage
            .put(SESSION_ADDRESS_KEY, address.as_bytes())?;
        self.storage
            .put(SESSION_AUTHENTICATED_KEY, AUTHENTICATED_MARKER)?;

        log::info!("Session initialised for {}", address);
        Ok(())
    }

    /// The cached recovery phrase, or `None` if the session cannot produce it.
    pub fn read_session(&self) -> Option<SecretString> {
        match self.open_session() {
            Ok(mnemonic) => Some(mnemonic),
            Err(err) => {
                log::debug!("Session unavailable: {}", err);
                None
            }
        }
    }

    /// Like [`Self::read_session`], reporting absence as [`WalletError::SessionInvalid`].
    pub fn require_session(&self) -> WalletResult<SecretString> {
        self.read_session().ok_or(WalletError::SessionInvalid)
    }

    /// True only while the marker, address, blob and in-memory key all exist.
    pub fn is_valid(&self) -> bool {
        let stored = || -> WalletResult<bool> {
            Ok(self.is_authenticated()?
                && self.storage.contains(SESSION_ADDRESS_KEY)?
                && self.storage.contains(SESSION_SECRET_KEY)?)
        };

        match stored() {
            Ok(complete) => complete && self.keys.has_key(),
            Err(err) => {
                log::warn!("Session storage unreadable: {}", err);
                false
            }
        }
    }

    /// Address recorded when the session was initialised.
    pub fn session_address(&self) -> Option<String> {
        match self.storage.get(SESSION_ADDRESS_KEY) {
            Ok(Some(bytes)) => String::from_utf8(bytes).ok(),
            Ok(None) => None,
            Err(err) => {
                log::warn!("Session storage unreadable: {}", err);
                None
            }
        }
    }

    /// Erase the session entries and the in-memory key together.
    pub fn clear(&self) -> WalletResult<()> {
        self.keys.clear();
        self.storage.delete(SESSION_AUTHENTICATED_KEY)?;
        self.storage.delete(SESSION_ADDRESS_KEY)?;
        self.storage.delete(SESSION_SECRET_KEY)?;
        log::info!("Session cleared");
        Ok(())
    }

    fn is_authenticated(&self) -> WalletResult<bool> {
        Ok(self
            .storage
            .get(SESSION_AUTHENTICATED_KEY)?
            .is_some_and(|marker| marker == AUTHENTICATED_MARKER))
    }

    fn open_session(&self) -> WalletResult<SecretString> {
        if !self.is_authenticated()? {
            return Err(WalletError::SessionInvalid);
        }

        let encoded = self
            .storage
            .get(SESSION_SECRET_KEY)?
            .ok_or(WalletError::SessionInvalid)?;
        let blob = hex::decode(encoded).map_err(|_| WalletError::SessionInvalid)?;
        if blob.len() <= NONCE_LEN {
            return Err(WalletError::SessionInvalid);
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce: [u8; NONCE_LEN] = nonce.try_into().map_err(|_| WalletError::SessionInvalid)?;

        let plaintext = self
            .keys
            .with_existing_key(|key| crypto::open_with(key, nonce, ciphertext))
            .map_err(|_| WalletError::SessionInvalid)?;

        let mnemonic =
            String::from_utf8(plaintext.to_vec()).map_err(|_| WalletError::SessionInvalid)?;
        Ok(SecretString::from(mnemonic))
    }
}
