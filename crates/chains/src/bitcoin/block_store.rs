//! Block storage.
//!
//! Records the headers of downloaded blocks. The store has an explicit
//! `close()`: shutdown closes it before releasing network resources, and
//! any write that races past close surfaces as a storage error instead of
//! touching a half-torn-down store.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use common::BridgeError;

/// SQLite-backed store of downloaded block headers.
pub struct BlockStore {
    conn: Mutex<Option<Connection>>,
}

impl BlockStore {
    /// Open or create a block store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BridgeError> {
        let conn = Connection::open(path)
            .map_err(|e| BridgeError::Storage(format!("failed to open block store: {}", e)))?;
        let store = Self {
            conn: Mutex::new(Some(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, BridgeError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            BridgeError::Storage(format!("failed to open in-memory block store: {}", e))
        })?;
        let store = Self {
            conn: Mutex::new(Some(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), BridgeError> {
        let guard = self.conn.lock().expect("block store lock poisoned");
        let conn = guard
            .as_ref()
            .ok_or_else(|| BridgeError::Storage("block store closed".into()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                hash TEXT PRIMARY KEY,
                time_secs INTEGER NOT NULL,
                received_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| BridgeError::Storage(format!("failed to create block schema: {}", e)))?;
        debug!("Block store schema initialized");
        Ok(())
    }

    /// Record one downloaded block header. Re-inserting a hash is a no-op.
    pub fn insert(&self, hash: &str, time_secs: u32) -> Result<(), BridgeError> {
        let guard = self.conn.lock().expect("block store lock poisoned");
        let conn = guard
            .as_ref()
            .ok_or_else(|| BridgeError::Storage("block store closed".into()))?;
        conn.execute(
            "INSERT OR IGNORE INTO blocks (hash, time_secs, received_at) VALUES (?1, ?2, strftime('%s','now'))",
            params![hash, time_secs],
        )
        .map_err(|e| BridgeError::Storage(format!("failed to insert block: {}", e)))?;
        Ok(())
    }

    /// Number of stored blocks.
    pub fn count(&self) -> Result<u64, BridgeError> {
        let guard = self.conn.lock().expect("block store lock poisoned");
        let conn = guard
            .as_ref()
            .ok_or_else(|| BridgeError::Storage("block store closed".into()))?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))
            .map_err(|e| BridgeError::Storage(format!("count error: {}", e)))?;
        Ok(count as u64)
    }

    /// Timestamp of the most recently stored block, if any.
    pub fn latest_time_secs(&self) -> Result<Option<u32>, BridgeError> {
        let guard = self.conn.lock().expect("block store lock poisoned");
        let conn = guard
            .as_ref()
            .ok_or_else(|| BridgeError::Storage("block store closed".into()))?;
        conn.query_row("SELECT MAX(time_secs) FROM blocks", [], |row| {
            row.get::<_, Option<u32>>(0)
        })
        .optional()
        .map(|v| v.flatten())
        .map_err(|e| BridgeError::Storage(format!("query error: {}", e)))
    }

    /// Close the store. Further writes fail with a storage error.
    /// Idempotent.
    pub fn close(&self) {
        let mut guard = self.conn.lock().expect("block store lock poisoned");
        if guard.take().is_some() {
            debug!("Block store closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.conn
            .lock()
            .expect("block store lock poisoned")
            .is_none()
    }
}
