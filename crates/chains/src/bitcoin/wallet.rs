//! Wallet state and persistence.
//!
//! The wallet is the set of watched addresses plus the unspent outputs
//! paying to them. Exactly two actors mutate it: the block download path
//! (adding watched addresses and newly seen outputs) and the withdrawal
//! orchestrator (consuming outputs). Both go through one
//! `tokio::sync::Mutex<Wallet>` per instance.
//!
//! Persistence is a SQLite file store so a restart resumes from the last
//! saved watch-list and UTXO set.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::BridgeError;

/// An unspent transaction output paying to a watched address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// Value in satoshis.
    pub value: u64,
    /// The watched address this output pays to.
    pub address: String,
}

/// In-memory wallet state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    watched: BTreeSet<String>,
    utxos: Vec<Utxo>,
}

impl Wallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an address to the watch-list. Idempotent.
    pub fn watch_address(&mut self, address: &str) {
        self.watched.insert(address.to_string());
    }

    pub fn is_watched(&self, address: &str) -> bool {
        self.watched.contains(address)
    }

    pub fn watched_addresses(&self) -> impl Iterator<Item = &str> {
        self.watched.iter().map(String::as_str)
    }

    /// Record a newly observed unspent output. Re-observing the same
    /// outpoint overwrites in place.
    pub fn add_utxo(&mut self, utxo: Utxo) {
        if let Some(existing) = self
            .utxos
            .iter_mut()
            .find(|u| u.txid == utxo.txid && u.vout == utxo.vout)
        {
            *existing = utxo;
        } else {
            self.utxos.push(utxo);
        }
    }

    /// Remove an outpoint after it has been spent.
    pub fn remove_utxo(&mut self, txid: &str, vout: u32) -> bool {
        let before = self.utxos.len();
        self.utxos.retain(|u| !(u.txid == txid && u.vout == vout));
        self.utxos.len() != before
    }

    /// Unspent outputs paying to one address.
    pub fn utxos_for(&self, address: &str) -> Vec<Utxo> {
        self.utxos
            .iter()
            .filter(|u| u.address == address)
            .cloned()
            .collect()
    }

    pub fn utxos(&self) -> &[Utxo] {
        &self.utxos
    }

    /// Confirmed balance across all watched addresses, in satoshis.
    pub fn balance_sat(&self) -> u64 {
        self.utxos.iter().map(|u| u.value).sum()
    }

    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }
}

/// SQLite-backed wallet persistence.
pub struct WalletStore {
    conn: Mutex<Connection>,
}

impl WalletStore {
    /// Open or create a wallet store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BridgeError> {
        let conn = Connection::open(path)
            .map_err(|e| BridgeError::Storage(format!("failed to open wallet store: {}", e)))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, BridgeError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            BridgeError::Storage(format!("failed to open in-memory wallet store: {}", e))
        })?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), BridgeError> {
        let conn = self.conn.lock().expect("wallet store lock poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS watched_addresses (
                address TEXT PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS utxos (
                txid TEXT NOT NULL,
                vout INTEGER NOT NULL,
                value INTEGER NOT NULL,
                address TEXT NOT NULL,
                PRIMARY KEY (txid, vout)
            );",
        )
        .map_err(|e| BridgeError::Storage(format!("failed to create wallet schema: {}", e)))?;
        debug!("Wallet store schema initialized");
        Ok(())
    }

    /// Load the persisted wallet state.
    pub fn load(&self) -> Result<Wallet, BridgeError> {
        let conn = self.conn.lock().expect("wallet store lock poisoned");

        let mut wallet = Wallet::new();

        let mut stmt = conn
            .prepare("SELECT address FROM watched_addresses")
            .map_err(|e| BridgeError::Storage(format!("query error: {}", e)))?;
        let addresses = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| BridgeError::Storage(format!("query error: {}", e)))?;
        for address in addresses {
            let address = address.map_err(|e| BridgeError::Storage(format!("row error: {}", e)))?;
            wallet.watch_address(&address);
        }

        let mut stmt = conn
            .prepare("SELECT txid, vout, value, address FROM utxos")
            .map_err(|e| BridgeError::Storage(format!("query error: {}", e)))?;
        let utxos = stmt
            .query_map([], |row| {
                Ok(Utxo {
                    txid: row.get(0)?,
                    vout: row.get(1)?,
                    value: row.get::<_, i64>(2)? as u64,
                    address: row.get(3)?,
                })
            })
            .map_err(|e| BridgeError::Storage(format!("query error: {}", e)))?;
        for utxo in utxos {
            let utxo = utxo.map_err(|e| BridgeError::Storage(format!("row error: {}", e)))?;
            wallet.add_utxo(utxo);
        }

        Ok(wallet)
    }

    /// Persist the full wallet state, replacing what was stored before.
    pub fn save(&self, wallet: &Wallet) -> Result<(), BridgeError> {
        let mut conn = self.conn.lock().expect("wallet store lock poisoned");

        let tx = conn
            .transaction()
            .map_err(|e| BridgeError::Storage(format!("transaction error: {}", e)))?;

        tx.execute("DELETE FROM watched_addresses", [])
            .map_err(|e| BridgeError::Storage(format!("delete error: {}", e)))?;
        tx.execute("DELETE FROM utxos", [])
            .map_err(|e| BridgeError::Storage(format!("delete error: {}", e)))?;

        for address in wallet.watched_addresses() {
            tx.execute(
                "INSERT INTO watched_addresses (address) VALUES (?1)",
                params![address],
            )
            .map_err(|e| BridgeError::Storage(format!("insert error: {}", e)))?;
        }
        for utxo in wallet.utxos() {
            tx.execute(
                "INSERT INTO utxos (txid, vout, value, address) VALUES (?1, ?2, ?3, ?4)",
                params![utxo.txid, utxo.vout, utxo.value as i64, utxo.address],
            )
            .map_err(|e| BridgeError::Storage(format!("insert error: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| BridgeError::Storage(format!("commit error: {}", e)))?;

        info!(
            "Saved wallet state ({} addresses, {} utxos)",
            wallet.watched_count(),
            wallet.utxos().len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utxo(txid: &str, vout: u32, value: u64, address: &str) -> Utxo {
        Utxo {
            txid: txid.into(),
            vout,
            value,
            address: address.into(),
        }
    }

    #[test]
    fn test_wallet_save_load_round_trip() {
        let store = WalletStore::open_in_memory().unwrap();

        let mut wallet = Wallet::new();
        wallet.watch_address("3abc");
        wallet.watch_address("3def");
        wallet.add_utxo(utxo("aa", 0, 5_000, "3abc"));
        wallet.add_utxo(utxo("bb", 1, 7_000, "3def"));

        store.save(&wallet).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, wallet);
    }

    #[test]
    fn test_add_utxo_overwrites_same_outpoint() {
        let mut wallet = Wallet::new();
        wallet.add_utxo(utxo("aa", 0, 5_000, "3abc"));
        wallet.add_utxo(utxo("aa", 0, 6_000, "3abc"));
        assert_eq!(wallet.utxos().len(), 1);
        assert_eq!(wallet.balance_sat(), 6_000);
    }

    #[test]
    fn test_remove_utxo() {
        let mut wallet = Wallet::new();
        wallet.add_utxo(utxo("aa", 0, 5_000, "3abc"));
        assert!(wallet.remove_utxo("aa", 0));
        assert!(!wallet.remove_utxo("aa", 0));
        assert_eq!(wallet.balance_sat(), 0);
    }

    #[test]
    fn test_utxos_for_filters_by_address() {
        let mut wallet = Wallet::new();
        wallet.add_utxo(utxo("aa", 0, 5_000, "3abc"));
        wallet.add_utxo(utxo("bb", 0, 7_000, "3def"));
        let for_abc = wallet.utxos_for("3abc");
        assert_eq!(for_abc.len(), 1);
        assert_eq!(for_abc[0].value, 5_000);
    }
}
