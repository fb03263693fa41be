//! Withdrawal-intent intake from ledger blocks.
//!
//! One consumer drains the ledger block stream strictly in commit order,
//! forwards recognized withdrawal intents and persists the processed
//! height after each block. On restart, blocks at or below the persisted
//! height are skipped instead of replayed. Ordering is per-chain only:
//! nothing here relates ledger blocks to Bitcoin blocks.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use common::WithdrawalRequest;
use ledger::{HeightStore, LedgerBlock};

/// Record kind carrying a withdrawal intent payload.
pub const WITHDRAWAL_RECORD_KIND: &str = "withdrawal";

/// Spawn the single-consumer ledger block listener.
pub fn spawn_intent_listener(
    mut blocks: mpsc::Receiver<LedgerBlock>,
    height_store: Arc<HeightStore>,
    intents: mpsc::Sender<WithdrawalRequest>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_height = match height_store.get() {
            Ok(height) => height,
            Err(e) => {
                warn!("Failed to read persisted ledger height: {}", e);
                None
            }
        };
        if let Some(height) = last_height {
            info!("Resuming ledger stream after height {}", height);
        }

        while let Some(block) = blocks.recv().await {
            if let Some(last) = last_height {
                if block.height <= last {
                    debug!("Skipping already processed ledger block {}", block.height);
                    continue;
                }
            }

            for record in &block.records {
                if record.kind != WITHDRAWAL_RECORD_KIND {
                    continue;
                }
                match serde_json::from_str::<WithdrawalRequest>(&record.payload) {
                    Ok(request) => {
                        debug!(
                            "Withdrawal intent {} at ledger height {}",
                            request.request_id, block.height
                        );
                        if intents.send(request).await.is_err() {
                            warn!("Intent consumer closed, dropping intent");
                        }
                    }
                    // An intent we cannot parse came from outside custody
                    // state; log it and move on.
                    Err(e) => warn!(
                        "Ignoring malformed withdrawal intent at height {}: {}",
                        block.height, e
                    ),
                }
            }

            if let Err(e) = height_store.set(block.height) {
                warn!("Failed to persist ledger height {}: {}", block.height, e);
            }
            last_height = Some(block.height);
        }
        debug!("Ledger intent listener finished");
    })
}
