//! The custody protocol.
//!
//! Four tightly coupled subsystems over the ledger and the Bitcoin chain:
//! - Peer-key aggregation: deriving identical multisig addresses across
//!   notaries that never talk to each other
//! - Address allocation: the free / change / registered lifecycle
//! - Deposit detection: matching block outputs against registered addresses
//! - Withdrawal orchestration: UTXO selection, fee gating, threshold-signed
//!   transaction assembly and broadcast
//!
//! Plus the supporting pieces: fee-rate tracking, withdrawal-intent intake
//! from ledger blocks, and per-subsystem health state.

pub mod aggregation;
pub mod allocation;
pub mod deposits;
pub mod feerate;
pub mod health;
pub mod intents;
pub mod registration;
pub mod withdraw;

pub use aggregation::{NotaryDirectory, PeerKeyAggregationProtocol, SessionHandle};
pub use allocation::{AddressAllocationLedger, OwnerFilter};
pub use deposits::{spawn_deposit_pipeline, DepositDetector};
pub use feerate::{spawn_fee_publisher, FeeRateTracker};
pub use health::{HealthRegistry, ServiceHealth, StatusSnapshot, WalletSummary};
pub use intents::spawn_intent_listener;
pub use registration::RegistrationStrategy;
pub use withdraw::{
    estimate_fee, CosignRequest, CosignResponse, LocalCosigner, NotaryCosigner,
    WithdrawalOrchestrator, BYTES_PER_INPUT, BYTES_PER_OUTPUT,
};
