pub mod file_store;
pub mod keystore;
pub mod memory;
pub mod paths;

use std::fmt::Debug;

use crate::errors::WalletResult;

pub use file_store::FileStore;
pub use keystore::{Keystore, WalletPayload, WalletRecord, WALLET_RECORD_KEY};
pub use memory::MemoryStore;
pub use paths::ProfilePaths;

/// Singleton-record storage. Each `put` must land atomically: readers observe
/// either the previous value or the new one, never a mix.
pub trait KeyValueStore: Send + Sync + Debug {
    fn get(&self, key: &str) -> WalletResult<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: &[u8]) -> WalletResult<()>;

    /// Remove `key`. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> WalletResult<()>;

    fn contains(&self, key: &str) -> WalletResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
