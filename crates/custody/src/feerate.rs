//! Fee-rate tracking and publication.
//!
//! Block processing records one observation per block (the average fee
//! rate of its transactions). A background task publishes the average of
//! the observations from the last 24 hours on a fixed cadence: every five
//! minutes, after a one-minute initial delay. With no observations yet
//! (cold start) the tick skips silently -- the published rate stays
//! unset and withdrawals fail closed.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::time::{interval_at, Instant};
use tracing::{debug, info};

use common::FeeRate;

/// Publication cadence.
const PUBLISH_INTERVAL_SECS: u64 = 5 * 60;

/// Delay before the first publication attempt.
const INITIAL_DELAY_SECS: u64 = 60;

/// Observations older than this no longer contribute.
const SAMPLE_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy)]
struct FeeObservation {
    sat_per_byte: u64,
    observed_at: DateTime<Utc>,
}

/// Shared fee-rate state: recent per-block observations plus the latest
/// published rate.
#[derive(Default)]
pub struct FeeRateTracker {
    current: RwLock<Option<FeeRate>>,
    samples: Mutex<Vec<FeeObservation>>,
}

impl FeeRateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest published rate, if any.
    pub fn current(&self) -> Option<FeeRate> {
        *self.current.read().expect("fee tracker lock poisoned")
    }

    /// Record one block's average fee rate.
    pub fn record_observation(&self, sat_per_byte: u64, observed_at: DateTime<Utc>) {
        let mut samples = self.samples.lock().expect("fee tracker lock poisoned");
        samples.push(FeeObservation {
            sat_per_byte,
            observed_at,
        });
        debug!(
            "Recorded fee observation {} sat/byte ({} samples)",
            sat_per_byte,
            samples.len()
        );
    }

    /// Derive one observation from a downloaded block.
    ///
    /// A transaction's fee is only computable when every input's previous
    /// output value is known, so `prevout_value` resolves outpoints from
    /// whatever the caller tracks (the wallet's UTXO set). Transactions
    /// with unresolvable inputs and coinbases are skipped; if nothing in
    /// the block resolves, no observation is recorded.
    pub fn observe_block<F>(&self, block: &bitcoin::Block, prevout_value: F)
    where
        F: Fn(&bitcoin::OutPoint) -> Option<u64>,
    {
        let mut rates: Vec<u64> = Vec::new();
        for tx in &block.txdata {
            if tx.is_coinbase() {
                continue;
            }
            let mut input_total: u64 = 0;
            let mut resolved = true;
            for input in &tx.input {
                match prevout_value(&input.previous_output) {
                    Some(value) => input_total += value,
                    None => {
                        resolved = false;
                        break;
                    }
                }
            }
            if !resolved {
                continue;
            }
            let output_total: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
            let fee = input_total.saturating_sub(output_total);
            let vsize = tx.vsize() as u64;
            if vsize > 0 {
                rates.push(fee / vsize);
            }
        }

        if !rates.is_empty() {
            let average = rates.iter().sum::<u64>() / rates.len() as u64;
            let observed_at = Utc
                .timestamp_opt(block.header.time as i64, 0)
                .single()
                .unwrap_or_else(Utc::now);
            self.record_observation(average, observed_at);
        }
    }

    /// Publish the average of the observations inside the sample window.
    ///
    /// Returns false (and leaves the published rate untouched) when no
    /// observation falls inside the window; expected during cold start.
    pub fn publish_from_recent(&self, now: DateTime<Utc>) -> bool {
        let cutoff = now - chrono::Duration::hours(SAMPLE_WINDOW_HOURS);

        let mut samples = self.samples.lock().expect("fee tracker lock poisoned");
        samples.retain(|s| s.observed_at >= cutoff);
        if samples.is_empty() {
            return false;
        }

        let sum: u64 = samples.iter().map(|s| s.sat_per_byte).sum();
        let average = sum / samples.len() as u64;
        drop(samples);

        let rate = FeeRate {
            sat_per_byte: average,
            observed_at: now,
        };
        *self.current.write().expect("fee tracker lock poisoned") = Some(rate);
        info!("Published fee rate: {} sat/byte", average);
        true
    }
}

/// Spawn the periodic fee publisher.
pub fn spawn_fee_publisher(tracker: Arc<FeeRateTracker>) -> tokio::task::JoinHandle<()> {
    info!(
        "Starting fee publisher (interval {}s, initial delay {}s)",
        PUBLISH_INTERVAL_SECS, INITIAL_DELAY_SECS
    );
    tokio::spawn(async move {
        let start = Instant::now() + Duration::from_secs(INITIAL_DELAY_SECS);
        let mut ticker = interval_at(start, Duration::from_secs(PUBLISH_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            if !tracker.publish_from_recent(Utc::now()) {
                debug!("No fee observations in the last {}h, skipping", SAMPLE_WINDOW_HOURS);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::block::{Header, Version as BlockVersion};
    use bitcoin::hashes::Hash;
    use bitcoin::transaction::Version;
    use bitcoin::{
        Amount, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
        TxMerkleNode, TxOut, Witness,
    };
    use std::collections::HashMap;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_unset_until_first_publication() {
        let tracker = FeeRateTracker::new();
        assert!(tracker.current().is_none());

        // A tick with no samples publishes nothing.
        assert!(!tracker.publish_from_recent(at(1_700_000_000)));
        assert!(tracker.current().is_none());
    }

    #[test]
    fn test_publishes_average_of_recent_samples() {
        let tracker = FeeRateTracker::new();
        let now = at(1_700_000_000);
        tracker.record_observation(10, now - chrono::Duration::hours(1));
        tracker.record_observation(20, now - chrono::Duration::hours(2));

        assert!(tracker.publish_from_recent(now));
        let rate = tracker.current().unwrap();
        assert_eq!(rate.sat_per_byte, 15);
        assert_eq!(rate.observed_at, now);
    }

    #[test]
    fn test_observe_block_averages_resolvable_transactions() {
        let tracker = FeeRateTracker::new();

        let funding = OutPoint {
            txid: bitcoin::Txid::all_zeros(),
            vout: 0,
        };
        let spend = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: funding,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::default(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(90_000),
                script_pubkey: ScriptBuf::new(),
            }],
        };
        let vsize = spend.vsize() as u64;

        // An unresolvable spend that must be skipped.
        let unknown = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: bitcoin::Txid::all_zeros(),
                    vout: 9,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::default(),
            }],
            output: vec![],
        };

        let block = bitcoin::Block {
            header: Header {
                version: BlockVersion::TWO,
                prev_blockhash: BlockHash::all_zeros(),
                merkle_root: TxMerkleNode::all_zeros(),
                time: 1_700_000_000,
                bits: CompactTarget::from_consensus(0x1d00ffff),
                nonce: 0,
            },
            txdata: vec![spend, unknown],
        };

        let mut prevouts = HashMap::new();
        prevouts.insert(funding, 100_000u64);
        tracker.observe_block(&block, |outpoint| prevouts.get(outpoint).copied());

        assert!(tracker.publish_from_recent(at(1_700_000_100)));
        assert_eq!(tracker.current().unwrap().sat_per_byte, 10_000 / vsize);
    }

    #[test]
    fn test_samples_outside_window_are_pruned() {
        let tracker = FeeRateTracker::new();
        let now = at(1_700_000_000);
        tracker.record_observation(100, now - chrono::Duration::hours(25));

        assert!(!tracker.publish_from_recent(now));
        assert!(tracker.current().is_none());

        // A fresh sample alongside a stale one: only the fresh counts.
        tracker.record_observation(100, now - chrono::Duration::hours(30));
        tracker.record_observation(8, now - chrono::Duration::minutes(5));
        assert!(tracker.publish_from_recent(now));
        assert_eq!(tracker.current().unwrap().sat_per_byte, 8);
    }
}
