//! Per-subsystem health state and the status snapshot.
//!
//! Each logical sub-service flips a boolean flag here; the process binary
//! serves the flags and a read-only JSON snapshot of wallet and queue
//! state over its HTTP surface.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;
use tracing::{info, warn};

use chains::bitcoin::SyncState;
use common::FeeRate;

/// Health flag of one sub-service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub name: String,
    pub healthy: bool,
}

/// Registry of per-subsystem health flags.
#[derive(Default)]
pub struct HealthRegistry {
    services: Mutex<BTreeMap<String, bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip one service's flag, logging transitions.
    pub fn set(&self, name: &str, healthy: bool) {
        let mut services = self.services.lock().expect("health lock poisoned");
        let previous = services.insert(name.to_string(), healthy);
        if previous != Some(healthy) {
            if healthy {
                info!("Service {} is healthy", name);
            } else {
                warn!("Service {} is unhealthy", name);
            }
        }
    }

    pub fn is_healthy(&self, name: &str) -> bool {
        self.services
            .lock()
            .expect("health lock poisoned")
            .get(name)
            .copied()
            .unwrap_or(false)
    }

    /// True only when every registered service is healthy.
    pub fn all_healthy(&self) -> bool {
        let services = self.services.lock().expect("health lock poisoned");
        !services.is_empty() && services.values().all(|h| *h)
    }

    pub fn snapshot(&self) -> Vec<ServiceHealth> {
        self.services
            .lock()
            .expect("health lock poisoned")
            .iter()
            .map(|(name, healthy)| ServiceHealth {
                name: name.clone(),
                healthy: *healthy,
            })
            .collect()
    }
}

/// Read-only wallet summary inside the status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct WalletSummary {
    pub watched_addresses: usize,
    pub utxo_count: usize,
    pub balance_sat: u64,
}

/// Read-only JSON snapshot served over the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub sync_state: SyncState,
    pub wallet: WalletSummary,
    pub fee_rate: Option<FeeRate>,
    pub last_ledger_height: Option<u64>,
    pub services: Vec<ServiceHealth>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_flags() {
        let registry = HealthRegistry::new();
        assert!(!registry.all_healthy());
        assert!(!registry.is_healthy("chain-sync"));

        registry.set("chain-sync", true);
        registry.set("ledger-listener", true);
        assert!(registry.all_healthy());

        registry.set("chain-sync", false);
        assert!(!registry.all_healthy());
        assert!(registry.is_healthy("ledger-listener"));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "chain-sync");
        assert!(!snapshot[0].healthy);
    }
}
