use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::KeyValueStore;
use crate::crypto::{self, EncryptedSecret};
use crate::errors::{WalletError, WalletResult};

/// Fixed key of the singleton wallet record.
pub const WALLET_RECORD_KEY: &str = "wallet";

/// Durable wallet record. One per profile.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletRecord {
    /// Public chain address, opaque to the keystore.
    pub address: String,
    /// `salt:hash` produced by [`crypto::hash_pin`].
    pub pin_verification_hash: String,
    /// Recovery phrase sealed under the PIN.
    pub encrypted_secret: EncryptedSecret,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for WalletRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletRecord")
            .field("address", &self.address)
            .field("pin_verification_hash", &"<redacted>")
            .field("encrypted_secret", &"<sealed>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Decrypted wallet returned by a successful [`Keystore::load`].
#[derive(Debug)]
pub struct WalletPayload {
    pub address: String,
    pub mnemonic: SecretString,
}

/// Persists the singleton wallet record and seals the recovery phrase under the PIN.
#[derive(Debug, Clone)]
pub struct Keystore {
    store: Arc<dyn KeyValueStore>,
    guard: Arc<Mutex<()>>,
}

impl Keystore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            guard: Arc::new(Mutex::new(())),
        }
    }

    /// Seal `mnemonic` under `pin` and replace any existing wallet record.
    pub fn save(
        &self,
        address: &str,
        mnemonic: &SecretString,
        pin: &SecretString,
    ) -> WalletResult<()> {
        if address.trim().is_empty() {
            return Err(WalletError::ValidationError(
                "Wallet address cannot be empty".to_string(),
            ));
        }

        let record = seal_record(address, mnemonic, pin, Utc::now())?;
        self.write_record(&record)?;
        log::info!("Wallet record saved");
        Ok(())
    }

    /// Decrypt the stored wallet. Returns `None` when no wallet exists or the PIN
    /// does not open the envelope.
    pub fn load(&self, pin: &SecretString) -> WalletResult<Option<WalletPayload>> {
        let Some(record) = self.record()? else {
            return Ok(None);
        };

        match open_record(&record, pin) {
            Ok(payload) => Ok(Some(payload)),
            Err(WalletError::AuthenticationFailed) => {
                log::debug!("Wallet envelope did not authenticate");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Stored PIN verification hash, for checking a PIN without opening the envelope.
    pub fn verification_hash(&self) -> WalletResult<Option<String>> {
        Ok(self.record()?.map(|record| record.pin_verification_hash))
    }

    /// Read the record without decrypting anything.
    pub fn record(&self) -> WalletResult<Option<WalletRecord>> {
        let bytes = {
            let _guard = self.guard.lock();
            self.store.get(WALLET_RECORD_KEY)?
        };

        match bytes {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn stored_address(&self) -> WalletResult<Option<String>> {
        Ok(self.record()?.map(|record| record.address))
    }

    pub fn exists(&self) -> WalletResult<bool> {
        let _guard = self.guard.lock();
        self.store.contains(WALLET_RECORD_KEY)
    }

    /// Irreversibly delete the wallet record.
    pub fn erase(&self) -> WalletResult<()> {
        let _guard = self.guard.lock();
        self.store.delete(WALLET_RECORD_KEY)?;
        log::info!("Wallet record erased");
        Ok(())
    }

    /// Re-seal the stored phrase under `new_pin`, keeping address and creation time.
    pub fn change_pin(&self, current_pin: &SecretString, new_pin: &SecretString) -> WalletResult<()> {
        let record = self
            .record()?
            .ok_or_else(|| WalletError::NotFound("No wallet stored".to_string()))?;
        let payload = open_record(&record, current_pin)?;

        let resealed = seal_record(
            &payload.address,
            &payload.mnemonic,
            new_pin,
            record.created_at,
        )?;
        let serialized = serde_json::to_vec(&resealed)?;

        // Only replace the record that was opened above.
        let _guard = self.guard.lock();
        let current = match self.store.get(WALLET_RECORD_KEY)? {
            Some(bytes) => Some(serde_json::from_slice::<WalletRecord>(&bytes)?),
            None => None,
        };
        if current.as_ref() != Some(&record) {
            return Err(WalletError::StorageUnavailable(
                "Wallet record changed during PIN change".to_string(),
            ));
        }
        self.store.put(WALLET_RECORD_KEY, &serialized)?;
        log::info!("Wallet PIN changed");
        Ok(())
    }

    /// [`Keystore::save`] on the blocking pool. Runs to completion even if the
    /// returned future is dropped.
    pub async fn save_async(
        &self,
        address: String,
        mnemonic: SecretString,
        pin: SecretString,
    ) -> WalletResult<()> {
        let keystore = self.clone();
        tokio::task::spawn_blocking(move || keystore.save(&address, &mnemonic, &pin)).await?
    }

    /// [`Keystore::load`] on the blocking pool.
    pub async fn load_async(&self, pin: SecretString) -> WalletResult<Option<WalletPayload>> {
        let keystore = self.clone();
        tokio::task::spawn_blocking(move || keystore.load(&pin)).await?
    }

    fn write_record(&self, record: &WalletRecord) -> WalletResult<()> {
        let serialized = serde_json::to_vec(record)?;
        let _guard = self.guard.lock();
        self.store.put(WALLET_RECORD_KEY, &serialized)
    }
}

fn seal_record(
    address: &str,
    mnemonic: &SecretString,
    pin: &SecretString,
    created_at: DateTime<Utc>,
) -> WalletResult<WalletRecord> {
    let pin_verification_hash = crypto::hash_pin(pin)?;
    let encrypted_secret = crypto::encrypt(mnemonic.expose_secret().as_bytes(), pin)?;

    Ok(WalletRecord {
        address: address.to_string(),
        pin_verification_hash,
        encrypted_secret,
        created_at,
    })
}

fn open_record(record: &WalletRecord, pin: &SecretString) -> WalletResult<WalletPayload> {
    let plaintext = crypto::decrypt(&record.encrypted_secret, pin)?;
    let mnemonic =
        String::from_utf8(plaintext.to_vec()).map_err(|_| WalletError::AuthenticationFailed)?;

    Ok(WalletPayload {
        address: record.address.clone(),
        mnemonic: SecretString::from(mnemonic),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, MemoryStore};
    use tempfile::TempDir;

    const ADDRESS: &str = "0xABC0000000000000000000000000000000000001";
    const PHRASE: &str =
        "legal winner thank year wave sausage worth useful legal winner thank yellow";

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    fn memory_keystore() -> (Keystore, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Keystore::new(store.clone()), store)
    }

    #[test]
    fn save_and_load_round_trip() {
        let (keystore, _) = memory_keystore();
        keystore.save(ADDRESS, &secret(PHRASE), &secret("1234")).unwrap();

        let payload = keystore.load(&secret("1234")).unwrap().expect("wallet present");
        assert_eq!(payload.address, ADDRESS);
        assert_eq!(payload.mnemonic.expose_secret(), PHRASE);
    }

    #[test]
    fn wrong_pin_returns_none_and_leaves_record_untouched() {
        let (keystore, store) = memory_keystore();
        keystore.save(ADDRESS, &secret(PHRASE), &secret("1234")).unwrap();
        let before = store.get(WALLET_RECORD_KEY).unwrap();

        assert!(keystore.load(&secret("9999")).unwrap().is_none());

        let after = store.get(WALLET_RECORD_KEY).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn load_without_wallet_returns_none() {
        let (keystore, _) = memory_keystore();
        assert!(keystore.load(&secret("1234")).unwrap().is_none());
        assert!(keystore.verification_hash().unwrap().is_none());
        assert!(!keystore.exists().unwrap());
    }

    #[test]
    fn verification_hash_checks_pin() {
        let (keystore, _) = memory_keystore();
        keystore.save(ADDRESS, &secret(PHRASE), &secret("1234")).unwrap();

        let hash = keystore.verification_hash().unwrap().expect("hash present");
        assert!(crypto::verify_pin(&secret("1234"), &hash));
        assert!(!crypto::verify_pin(&secret("1235"), &hash));
    }

    #[test]
    fn resaving_generates_fresh_salts_and_nonces() {
        let (keystore, _) = memory_keystore();
        keystore.save(ADDRESS, &secret(PHRASE), &secret("1234")).unwrap();
        let first = keystore.record().unwrap().unwrap();
        keystore.save(ADDRESS, &secret(PHRASE), &secret("1234")).unwrap();
        let second = keystore.record().unwrap().unwrap();

        assert_ne!(first.pin_verification_hash, second.pin_verification_hash);
        assert_ne!(first.encrypted_secret.salt, second.encrypted_secret.salt);
        assert_ne!(first.encrypted_secret.nonce, second.encrypted_secret.nonce);

        let hash_salt = second.pin_verification_hash.split(':').next().unwrap();
        assert_ne!(hash_salt, second.encrypted_secret.salt);
    }

    #[test]
    fn save_replaces_previous_wallet() {
        let (keystore, _) = memory_keystore();
        keystore.save(ADDRESS, &secret(PHRASE), &secret("1234")).unwrap();
        keystore
            .save("0xDEF0000000000000000000000000000000000002", &secret("other phrase"), &secret("5678"))
            .unwrap();

        assert!(keystore.load(&secret("1234")).unwrap().is_none());
        let payload = keystore.load(&secret("5678")).unwrap().unwrap();
        assert_eq!(payload.mnemonic.expose_secret(), "other phrase");
    }

    #[test]
    fn erase_removes_wallet() {
        let (keystore, _) = memory_keystore();
        keystore.save(ADDRESS, &secret(PHRASE), &secret("1234")).unwrap();
        assert!(keystore.exists().unwrap());

        keystore.erase().unwrap();
        assert!(!keystore.exists().unwrap());
        assert!(keystore.load(&secret("1234")).unwrap().is_none());
    }

    #[test]
    fn empty_address_rejected() {
        let (keystore, _) = memory_keystore();
        let err = keystore
            .save("  ", &secret(PHRASE), &secret("1234"))
            .unwrap_err();
        assert!(matches!(err, WalletError::ValidationError(_)));
    }

    #[test]
    fn tampered_envelope_loads_as_none() {
        let (keystore, store) = memory_keystore();
        keystore.save(ADDRESS, &secret(PHRASE), &secret("1234")).unwrap();

        let mut record = keystore.record().unwrap().unwrap();
        let mut bytes = hex::decode(&record.encrypted_secret.ciphertext).unwrap();
        bytes[0] ^= 0xFF;
        record.encrypted_secret.ciphertext = hex::encode(bytes);
        store
            .put(WALLET_RECORD_KEY, &serde_json::to_vec(&record).unwrap())
            .unwrap();

        assert!(keystore.load(&secret("1234")).unwrap().is_none());
    }

    #[test]
    fn malformed_record_reports_storage_error() {
        let (keystore, store) = memory_keystore();
        store.put(WALLET_RECORD_KEY, b"not json").unwrap();

        assert!(matches!(
            keystore.load(&secret("1234")),
            Err(WalletError::StorageUnavailable(_))
        ));
    }

    #[test]
    fn change_pin_re_encrypts_record() {
        let (keystore, _) = memory_keystore();
        keystore.save(ADDRESS, &secret(PHRASE), &secret("1234")).unwrap();
        let created_at = keystore.record().unwrap().unwrap().created_at;

        keystore.change_pin(&secret("1234"), &secret("4321")).unwrap();

        assert!(keystore.load(&secret("1234")).unwrap().is_none());
        let payload = keystore.load(&secret("4321")).unwrap().unwrap();
        assert_eq!(payload.mnemonic.expose_secret(), PHRASE);
        assert_eq!(keystore.record().unwrap().unwrap().created_at, created_at);
    }

    #[test]
    fn change_pin_with_wrong_current_pin_fails() {
        let (keystore, _) = memory_keystore();
        keystore.save(ADDRESS, &secret(PHRASE), &secret("1234")).unwrap();

        let err = keystore
            .change_pin(&secret("0000"), &secret("4321"))
            .unwrap_err();
        assert_eq!(err, WalletError::AuthenticationFailed);
        assert!(keystore.load(&secret("1234")).unwrap().is_some());
    }

    #[test]
    fn record_debug_redacts_hash() {
        let (keystore, _) = memory_keystore();
        keystore.save(ADDRESS, &secret(PHRASE), &secret("1234")).unwrap();
        let record = keystore.record().unwrap().unwrap();
        let rendered = format!("{record:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(&record.pin_verification_hash));
    }

    #[test]
    fn file_backed_keystore_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = Arc::new(FileStore::new(dir.path()).unwrap());
            Keystore::new(store)
                .save(ADDRESS, &secret(PHRASE), &secret("1234"))
                .unwrap();
        }

        let reopened = Keystore::new(Arc::new(FileStore::new(dir.path()).unwrap()));
        let payload = reopened.load(&secret("1234")).unwrap().unwrap();
        assert_eq!(payload.address, ADDRESS);
    }

    #[test]
    fn concurrent_saves_leave_one_complete_record() {
        let (keystore, _) = memory_keystore();
        let pins = ["1111", "2222", "3333"];

        let handles: Vec<_> = pins
            .iter()
            .map(|pin| {
                let keystore = keystore.clone();
                let pin = pin.to_string();
                std::thread::spawn(move || {
                    keystore
                        .save(ADDRESS, &secret(PHRASE), &secret(&pin))
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let hash = keystore.verification_hash().unwrap().unwrap();
        let winner = pins
            .iter()
            .find(|pin| crypto::verify_pin(&secret(pin), &hash))
            .expect("verification hash matches one writer");
        let payload = keystore.load(&secret(winner)).unwrap();
        assert!(payload.is_some(), "hash and envelope come from the same save");
    }

    #[tokio::test]
    async fn async_save_and_load() {
        let (keystore, _) = memory_keystore();
        keystore
            .save_async(ADDRESS.to_string(), secret(PHRASE), secret("1234"))
            .await
            .unwrap();

        let payload = keystore.load_async(secret("1234")).await.unwrap().unwrap();
        assert_eq!(payload.mnemonic.expose_secret(), PHRASE);
        assert!(keystore.load_async(secret("9999")).await.unwrap().is_none());
    }
}
