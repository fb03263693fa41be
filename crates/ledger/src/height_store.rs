//! Persisted last-processed ledger block height.
//!
//! A single scalar in a file. Reads and writes are serialized through one
//! mutex, and writes go to a temp file followed by a rename so a crash can
//! never leave a partially written value behind.

use std::path::PathBuf;
use std::sync::Mutex;

use tracing::debug;

use common::BridgeError;

/// File-backed scalar store for the last processed ledger height.
pub struct HeightStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl HeightStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Read the stored height. `None` means nothing has been processed yet.
    pub fn get(&self) -> Result<Option<u64>, BridgeError> {
        let _guard = self.lock.lock().expect("height store lock poisoned");

        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BridgeError::Storage(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let height = contents.trim().parse::<u64>().map_err(|e| {
            BridgeError::Storage(format!(
                "corrupt height file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(Some(height))
    }

    /// Persist a new height.
    pub fn set(&self, height: u64) -> Result<(), BridgeError> {
        let _guard = self.lock.lock().expect("height store lock poisoned");

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, height.to_string()).map_err(|e| {
            BridgeError::Storage(format!("failed to write {}: {}", tmp.display(), e))
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            BridgeError::Storage(format!(
                "failed to rename {} into place: {}",
                tmp.display(),
                e
            ))
        })?;

        debug!("Persisted ledger height {}", height);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_before_set_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeightStore::new(dir.path().join("height"));
        assert_eq!(store.get().unwrap(), None);
    }

    #[test]
    fn test_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeightStore::new(dir.path().join("height"));
        store.set(42).unwrap();
        assert_eq!(store.get().unwrap(), Some(42));
        store.set(43).unwrap();
        assert_eq!(store.get().unwrap(), Some(43));
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("height");
        std::fs::write(&path, "not a number").unwrap();
        let store = HeightStore::new(path);
        assert!(matches!(store.get(), Err(BridgeError::Storage(_))));
    }
}
