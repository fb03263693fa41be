//! Deposit detection.
//!
//! Scans every transaction output of every downloaded block against the
//! registered address set. The set is an in-memory index refreshed from
//! the allocation ledger, never a per-output ledger query. Matches become
//! `DepositEvent`s with ledger-compatible timestamps: the block time minus
//! a two-hour safety margin, because Bitcoin block timestamps may run up
//! to ~2h ahead of real time while the ledger rejects future-dated
//! entries.
//!
//! Wallet persistence happens after the events are handed to the sink.
//! A crash between emission and persistence re-detects the same deposits
//! on restart: delivery is at-least-once, and downstream consumers are
//! expected to deduplicate by transaction id.

use std::collections::HashMap;
use std::sync::Arc;

use bitcoin::{Address, Block, Network};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use chains::bitcoin::{Utxo, Wallet, WalletStore};
use common::{format_btc, BridgeError, DepositEvent, OwnerType, BLOCK_TIME_SAFETY_MARGIN_MS};

use crate::allocation::{AddressAllocationLedger, OwnerFilter};

/// Matches block outputs against registered custody addresses.
pub struct DepositDetector {
    allocation: AddressAllocationLedger,
    wallet: Arc<Mutex<Wallet>>,
    wallet_store: Arc<WalletStore>,
    network: Network,
    /// address -> owning client id, refreshed from the ledger.
    index: RwLock<HashMap<String, String>>,
}

impl DepositDetector {
    pub fn new(
        allocation: AddressAllocationLedger,
        wallet: Arc<Mutex<Wallet>>,
        wallet_store: Arc<WalletStore>,
        network: Network,
    ) -> Self {
        Self {
            allocation,
            wallet,
            wallet_store,
            network,
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the in-memory index from the allocation ledger and make
    /// sure every custody address is on the wallet watch-list.
    pub async fn refresh_index(&self) -> Result<(), BridgeError> {
        let registered = self
            .allocation
            .list_addresses(OwnerFilter::Registered)
            .await?;
        let change = self.allocation.list_addresses(OwnerFilter::Change).await?;

        let mut index = HashMap::with_capacity(registered.len());
        for entry in &registered {
            if let OwnerType::Registered { client_id } = &entry.info.owner {
                index.insert(entry.address.clone(), client_id.clone());
            }
        }

        {
            let mut wallet = self.wallet.lock().await;
            for entry in registered.iter().chain(change.iter()) {
                wallet.watch_address(&entry.address);
            }
        }

        debug!("Deposit index refreshed ({} registered)", index.len());
        *self.index.write().await = index;
        Ok(())
    }

    /// Scan one block. Outputs whose script does not decode to an address
    /// are skipped, not errors; matches are returned and the paying
    /// outputs recorded in the wallet.
    pub async fn process_block(&self, block: &Block) -> Vec<DepositEvent> {
        let adjusted_time_ms =
            (block.header.time as i64) * 1000 - BLOCK_TIME_SAFETY_MARGIN_MS;

        let index = self.index.read().await;
        let mut events = Vec::new();
        let mut wallet = self.wallet.lock().await;

        for tx in &block.txdata {
            let txid = tx.compute_txid().to_string();
            for (vout, output) in tx.output.iter().enumerate() {
                let address = match Address::from_script(&output.script_pubkey, self.network) {
                    Ok(address) => address.to_string(),
                    // Not every output pays to an address (op_return etc).
                    Err(_) => continue,
                };

                if wallet.is_watched(&address) {
                    wallet.add_utxo(Utxo {
                        txid: txid.clone(),
                        vout: vout as u32,
                        value: output.value.to_sat(),
                        address: address.clone(),
                    });
                }

                if let Some(client_id) = index.get(&address) {
                    let amount = format_btc(output.value.to_sat());
                    info!(
                        "Deposit detected: {} BTC to {} (client {}) in tx {}",
                        amount, address, client_id, txid
                    );
                    events.push(DepositEvent {
                        tx_id: txid.clone(),
                        adjusted_time_ms,
                        client_id: client_id.clone(),
                        asset: "BTC".to_string(),
                        amount,
                    });
                }
            }
        }

        events
    }

    /// Persist the wallet after events were handed off.
    pub async fn persist_wallet(&self) -> Result<(), BridgeError> {
        let wallet = self.wallet.lock().await;
        self.wallet_store.save(&wallet)
    }
}

/// Consume blocks in arrival order, emitting deposit events to the sink.
///
/// Emission happens before the wallet save on purpose; see the module
/// docs for the at-least-once consequence.
pub fn spawn_deposit_pipeline(
    detector: Arc<DepositDetector>,
    mut blocks: mpsc::Receiver<Block>,
    sink: mpsc::Sender<DepositEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(block) = blocks.recv().await {
            let events = detector.process_block(&block).await;
            let had_events = !events.is_empty();
            for event in events {
                if sink.send(event).await.is_err() {
                    warn!("Deposit sink closed, dropping event");
                }
            }
            if had_events {
                if let Err(e) = detector.persist_wallet().await {
                    warn!("Failed to persist wallet after deposits: {}", e);
                }
            }
        }
        debug!("Deposit pipeline finished");
    })
}
