use std::collections::HashMap;

use parking_lot::RwLock;
use zeroize::Zeroizing;

use super::KeyValueStore;
use crate::errors::WalletResult;

/// Volatile store. Used as session-scoped storage and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> WalletResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).map(|value| value.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> WalletResult<()> {
        self.entries
            .write()
            .insert(key.to_string(), Zeroizing::new(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &str) -> WalletResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}
