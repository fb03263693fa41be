//! Shared application state for the HTTP handlers.

use std::sync::Arc;

use chains::bitcoin::ChainSyncCoordinator;
use custody::{FeeRateTracker, HealthRegistry, StatusSnapshot, WalletSummary};
use ledger::HeightStore;

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub health: Arc<HealthRegistry>,
    pub sync: Arc<ChainSyncCoordinator>,
    pub fee_tracker: Arc<FeeRateTracker>,
    pub height_store: Arc<HeightStore>,
}

impl AppState {
    /// Assemble the read-only status snapshot.
    pub async fn snapshot(&self) -> StatusSnapshot {
        let wallet = {
            let wallet = self.sync.wallet();
            let wallet = wallet.lock().await;
            WalletSummary {
                watched_addresses: wallet.watched_count(),
                utxo_count: wallet.utxos().len(),
                balance_sat: wallet.balance_sat(),
            }
        };

        StatusSnapshot {
            sync_state: self.sync.state().await,
            wallet,
            fee_rate: self.fee_tracker.current(),
            last_ledger_height: self.height_store.get().ok().flatten(),
            services: self.health.snapshot(),
        }
    }
}
