//! Client registration.
//!
//! Claims one free address and converts it to registered, bound to one
//! ledger client. Claim and register span two ledger round-trips, so a
//! concurrent claimant may race us to the same address; the loser's
//! registration batch fails validation and we retry against a freshly
//! claimed address.

use tracing::{info, warn};

use common::{BridgeError, BtcAddress};

use crate::allocation::AddressAllocationLedger;

/// How many conflict retries before giving up on a registration.
const MAX_CLAIM_ATTEMPTS: usize = 3;

/// Claims free addresses and binds them to clients.
pub struct RegistrationStrategy {
    allocation: AddressAllocationLedger,
}

impl RegistrationStrategy {
    pub fn new(allocation: AddressAllocationLedger) -> Self {
        Self { allocation }
    }

    /// Bind one free address to `client_id`.
    ///
    /// `NoFreeAddress` propagates untouched: it is capacity exhaustion the
    /// caller handles (generate more addresses), not a bug here.
    pub async fn register_client(
        &self,
        client_id: &str,
        whitelist: &[String],
    ) -> Result<BtcAddress, BridgeError> {
        let mut last_conflict = None;

        for attempt in 1..=MAX_CLAIM_ATTEMPTS {
            let candidate = self.allocation.claim_free_address().await?;
            match self
                .allocation
                .register(&candidate, client_id, whitelist)
                .await
            {
                Ok(()) => {
                    info!(
                        "Client {} registered to address {} (attempt {})",
                        client_id, candidate.address, attempt
                    );
                    return Ok(candidate);
                }
                Err(e @ BridgeError::Conflict(_)) => {
                    warn!(
                        "Lost claim race for address {} (attempt {}/{}), re-querying",
                        candidate.address, attempt, MAX_CLAIM_ATTEMPTS
                    );
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_conflict.unwrap_or_else(|| {
            BridgeError::Conflict("registration retries exhausted".into())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::OwnerFilter;
    use common::{AddressInfo, OwnerType};
    use ledger::MemoryLedger;
    use std::sync::Arc;

    const ACCOUNT: &str = "btc-addresses";

    fn free_address(address: &str) -> BtcAddress {
        BtcAddress {
            address: address.to_string(),
            info: AddressInfo::new(OwnerType::Free, vec!["02aa".into()], "node-1".into()),
        }
    }

    async fn setup(free: &[&str]) -> (Arc<MemoryLedger>, RegistrationStrategy) {
        let ledger = Arc::new(MemoryLedger::with_accounts(&[ACCOUNT]));
        let allocation = AddressAllocationLedger::new(ledger.clone(), ACCOUNT);
        for address in free {
            allocation.publish(&free_address(address)).await.unwrap();
        }
        (ledger, RegistrationStrategy::new(allocation))
    }

    #[tokio::test]
    async fn test_register_client_happy_path() {
        let (ledger, strategy) = setup(&["3abc"]).await;
        let address = strategy.register_client("client-1", &[]).await.unwrap();
        assert_eq!(address.address, "3abc");

        let allocation = AddressAllocationLedger::new(ledger, ACCOUNT);
        let registered = allocation
            .list_addresses(OwnerFilter::Registered)
            .await
            .unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].info.owner.client_id(), Some("client-1"));
    }

    #[tokio::test]
    async fn test_no_free_address_propagates() {
        let (_ledger, strategy) = setup(&[]).await;
        let err = strategy.register_client("client-1", &[]).await.unwrap_err();
        assert!(matches!(err, BridgeError::NoFreeAddress));
    }

    #[tokio::test]
    async fn test_conflict_retries_with_fresh_address() {
        let (_ledger, strategy) = setup(&["3aaa", "3bbb"]).await;

        // First client takes the first free address out from under the
        // second one's initial claim.
        strategy.register_client("client-1", &[]).await.unwrap();
        let second = strategy.register_client("client-2", &[]).await.unwrap();
        assert_eq!(second.address, "3bbb");
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        // One free address, many racers: exactly one succeeds, the rest
        // surface Conflict (the pool is empty by the time they retry, so a
        // NoFreeAddress retry outcome also counts as a loss).
        let (ledger, _strategy) = setup(&["3only"]).await;
        let allocation = AddressAllocationLedger::new(ledger.clone(), ACCOUNT);

        // All racers read the same free record before anyone writes.
        let candidate = allocation.claim_free_address().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..5 {
            let allocation = allocation.clone();
            let candidate = candidate.clone();
            handles.push(tokio::spawn(async move {
                allocation
                    .register(&candidate, &format!("client-{}", i), &[])
                    .await
            }));
        }

        let mut winners = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => winners += 1,
                Err(BridgeError::Conflict(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(conflicts, 4);

        let registered = allocation
            .list_addresses(OwnerFilter::Registered)
            .await
            .unwrap();
        assert_eq!(registered.len(), 1, "exactly one registered owner");
    }
}
