//! External ledger collaborator surface.
//!
//! The ledger is the system of record for custody bookkeeping and the only
//! coordination medium between notaries. This crate defines:
//! - The `LedgerClient` trait (account details, atomic command batches,
//!   co-signed submission, confirmed-block streaming)
//! - The command/expectation model used for compare-and-swap writes
//! - The notary's ed25519 ledger signing identity
//! - The persisted last-processed-height scalar
//! - An in-memory ledger implementation backing tests and local runs

pub mod client;
pub mod height_store;
pub mod memory;
pub mod signer;

pub use client::{
    CommandBatch, CosignerSignature, Expectation, LedgerBlock, LedgerClient, LedgerCommand,
    LedgerRecord,
};
pub use height_store::HeightStore;
pub use memory::MemoryLedger;
pub use signer::NotaryLedgerKey;
