use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::KeyValueStore;
use crate::errors::{WalletError, WalletResult};

const RECORD_EXTENSION: &str = "json";

/// Durable store keeping one file per key inside a directory.
///
/// Writes go to a uniquely named sibling file which is synced and then renamed
/// over the record, so a crash mid-write leaves the previous record intact and
/// several handles on one directory never share a temporary file.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> WalletResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        if dir.as_os_str().is_empty() {
            return Err(WalletError::StorageUnavailable(
                "Store directory cannot be empty".to_string(),
            ));
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `key`.
    pub fn record_path(&self, key: &str) -> WalletResult<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.{RECORD_EXTENSION}")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> WalletResult<Option<Vec<u8>>> {
        let path = self.record_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> WalletResult<()> {
        let path = self.record_path(key)?;
        write_atomic(&path, value)
    }

    fn delete(&self, key: &str) -> WalletResult<()> {
        let path = self.record_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn validate_key(key: &str) -> WalletResult<()> {
    let valid = !key.is_empty()
        && key.len() <= 64
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(WalletError::ValidationError(format!(
            "Invalid store key '{}'",
            key
        )));
    }
    Ok(())
}

/// Replace `path` with `contents`: temp file in the same directory, fsync,
/// rename, then fsync the directory so the rename itself is durable.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> WalletResult<()> {
    let dir = match path.parent() {
        Some(dir) if dir.as_os_str().is_empty() => Path::new("."),
        Some(dir) => dir,
        None => {
            return Err(WalletError::StorageUnavailable(
                "Invalid record path".to_string(),
            ))
        }
    };
    fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.flush()?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| WalletError::from(err.error))?;

    sync_dir(dir)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> WalletResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> WalletResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn put_then_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        assert_eq!(store.get("wallet").unwrap(), None);
        store.put("wallet", b"{\"address\":\"0xabc\"}").unwrap();
        assert_eq!(
            store.get("wallet").unwrap(),
            Some(b"{\"address\":\"0xabc\"}".to_vec())
        );
    }

    #[test]
    fn put_replaces_previous_value_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("keystore")).unwrap();

        store.put("wallet", b"old").unwrap();
        store.put("wallet", b"new").unwrap();
        assert_eq!(store.get("wallet").unwrap(), Some(b"new".to_vec()));

        let leftovers: Vec<_> = fs::read_dir(store.dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("wallet.json")]);
    }

    #[test]
    fn two_handles_on_one_directory_write_concurrently() {
        let dir = TempDir::new().unwrap();
        let first = FileStore::new(dir.path()).unwrap();
        let second = FileStore::new(dir.path()).unwrap();

        for round in 0..50 {
            let a = format!("{{\"writer\":\"a\",\"round\":{round}}}");
            let b = format!("{{\"writer\":\"b\",\"round\":{round}}}");
            let (left, right) = std::thread::scope(|scope| {
                let left = scope.spawn(|| first.put("wallet", a.as_bytes()));
                let right = scope.spawn(|| second.put("wallet", b.as_bytes()));
                (left.join().unwrap(), right.join().unwrap())
            });
            left.unwrap();
            right.unwrap();

            let stored = first.get("wallet").unwrap().unwrap();
            assert!(stored == a.as_bytes() || stored == b.as_bytes());
        }

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        store.put("pin_lock_state", b"{}").unwrap();
        store.delete("pin_lock_state").unwrap();
        store.delete("pin_lock_state").unwrap();
        assert!(!store.contains("pin_lock_state").unwrap());
    }

    #[test]
    fn keys_with_path_separators_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        assert!(matches!(
            store.put("../escape", b"x"),
            Err(WalletError::ValidationError(_))
        ));
        assert!(matches!(
            store.get(""),
            Err(WalletError::ValidationError(_))
        ));
    }

    #[test]
    fn empty_directory_rejected() {
        let result = FileStore::new("");
        match result {
            Err(WalletError::StorageUnavailable(msg)) => assert!(msg.contains("cannot be empty")),
            other => panic!("Expected StorageUnavailable, got {other:?}"),
        }
    }
}
