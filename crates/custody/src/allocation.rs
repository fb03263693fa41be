//! Address allocation ledger.
//!
//! The source of truth for which multisig addresses exist and who owns
//! them. Every read goes fresh to the ledger account that stores one
//! detail per address; nothing here is cached, so a claim always sees the
//! latest owner state. Registration is one atomic batch: the address
//! flips `Free -> Registered` under a compare-and-swap on its previous
//! serialized record, and the client account is created in the same
//! batch, so a partial claim cannot exist.

use std::sync::Arc;

use tracing::{debug, info};

use common::{AddressInfo, BridgeError, BtcAddress, OwnerType};
use ledger::{CommandBatch, Expectation, LedgerClient, LedgerCommand};

/// Filter over the owner lifecycle for listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerFilter {
    Any,
    Free,
    Change,
    Registered,
}

impl OwnerFilter {
    fn matches(&self, owner: &OwnerType) -> bool {
        match self {
            OwnerFilter::Any => true,
            OwnerFilter::Free => matches!(owner, OwnerType::Free),
            OwnerFilter::Change => matches!(owner, OwnerType::Change),
            OwnerFilter::Registered => matches!(owner, OwnerType::Registered { .. }),
        }
    }
}

/// Handle to the allocation account on the ledger.
#[derive(Clone)]
pub struct AddressAllocationLedger {
    ledger: Arc<dyn LedgerClient>,
    /// Ledger account holding one detail per generated address.
    account: String,
}

impl AddressAllocationLedger {
    pub fn new(ledger: Arc<dyn LedgerClient>, account: impl Into<String>) -> Self {
        Self {
            ledger,
            account: account.into(),
        }
    }

    /// Ledger account name for a registered client.
    pub fn client_account(client_id: &str) -> String {
        format!("client:{}", client_id)
    }

    /// Read all addresses, optionally filtered by owner type.
    ///
    /// A malformed record is a hard error: it indicates divergent custody
    /// state and must never be silently skipped.
    pub async fn list_addresses(
        &self,
        filter: OwnerFilter,
    ) -> Result<Vec<BtcAddress>, BridgeError> {
        let details = self.ledger.get_details(&self.account).await?;

        let mut addresses = Vec::new();
        for (address, raw) in details {
            let info = AddressInfo::from_json(&self.account, &address, &raw)?;
            if filter.matches(&info.owner) {
                addresses.push(BtcAddress { address, info });
            }
        }
        Ok(addresses)
    }

    /// Return the first free address from a fresh read.
    pub async fn claim_free_address(&self) -> Result<BtcAddress, BridgeError> {
        let free = self.list_addresses(OwnerFilter::Free).await?;
        free.into_iter()
            .next()
            .ok_or(BridgeError::NoFreeAddress)
    }

    /// Return the single change address for this federation.
    ///
    /// Exactly one must exist; anything else is a configuration error and
    /// not retryable.
    pub async fn change_address(&self) -> Result<BtcAddress, BridgeError> {
        let mut change = self.list_addresses(OwnerFilter::Change).await?;
        match change.len() {
            0 => Err(BridgeError::Configuration(
                "no change address configured".into(),
            )),
            1 => Ok(change.remove(0)),
            n => Err(BridgeError::Configuration(format!(
                "expected exactly one change address, found {}",
                n
            ))),
        }
    }

    /// Publish a newly derived address. Unconditional: the record is a
    /// pure function of the key set, so concurrent finalizers write the
    /// same bytes.
    pub async fn publish(&self, address: &BtcAddress) -> Result<(), BridgeError> {
        let value = address.info.to_json()?;
        self.ledger
            .put_detail(&self.account, &address.address, &value)
            .await?;
        debug!(
            "Published address {} ({})",
            address.address, address.info.owner
        );
        Ok(())
    }

    /// Atomically convert a free address to registered and create the
    /// owning client account with its withdrawal whitelist.
    ///
    /// The compare-and-swap on the previous record is the race
    /// tie-breaker: a concurrent claimant that read the same free address
    /// loses validation and gets `Conflict`.
    pub async fn register(
        &self,
        address: &BtcAddress,
        client_id: &str,
        whitelist: &[String],
    ) -> Result<(), BridgeError> {
        if !matches!(address.info.owner, OwnerType::Free) {
            return Err(BridgeError::Protocol(format!(
                "address {} is {}, not free",
                address.address, address.info.owner
            )));
        }

        let previous = address.info.to_json()?;
        let registered = AddressInfo::new(
            OwnerType::Registered {
                client_id: client_id.to_string(),
            },
            address.info.notary_keys.clone(),
            address.info.node_id.clone(),
        );
        let client_account = Self::client_account(client_id);
        let whitelist_json = serde_json::to_string(whitelist)
            .map_err(|e| BridgeError::Serialization(e.to_string()))?;

        let batch = CommandBatch::new(vec![
            LedgerCommand::PutDetail {
                account: self.account.clone(),
                key: address.address.clone(),
                value: registered.to_json()?,
                expect: Expectation::Equals(previous),
            },
            LedgerCommand::CreateAccount {
                account: client_account.clone(),
                quorum: None,
            },
            LedgerCommand::PutDetail {
                account: client_account.clone(),
                key: "btc_address".into(),
                value: address.address.clone(),
                expect: Expectation::Absent,
            },
            LedgerCommand::PutDetail {
                account: client_account,
                key: "withdrawal_whitelist".into(),
                value: whitelist_json,
                expect: Expectation::Absent,
            },
        ]);

        self.ledger.execute(batch).await?;
        info!(
            "Registered address {} to client {}",
            address.address, client_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::MemoryLedger;

    const ACCOUNT: &str = "btc-addresses";

    fn free_address(address: &str) -> BtcAddress {
        BtcAddress {
            address: address.to_string(),
            info: AddressInfo::new(
                OwnerType::Free,
                vec!["02aa".into(), "03bb".into()],
                "node-1".into(),
            ),
        }
    }

    async fn setup() -> (Arc<MemoryLedger>, AddressAllocationLedger) {
        let ledger = Arc::new(MemoryLedger::with_accounts(&[ACCOUNT]));
        let allocation = AddressAllocationLedger::new(ledger.clone(), ACCOUNT);
        (ledger, allocation)
    }

    #[tokio::test]
    async fn test_list_and_claim() {
        let (_ledger, allocation) = setup().await;
        allocation.publish(&free_address("3abc")).await.unwrap();

        let all = allocation.list_addresses(OwnerFilter::Any).await.unwrap();
        assert_eq!(all.len(), 1);

        let claimed = allocation.claim_free_address().await.unwrap();
        assert_eq!(claimed.address, "3abc");
    }

    #[tokio::test]
    async fn test_claim_with_no_free_address_is_exhaustion() {
        let (_ledger, allocation) = setup().await;
        let err = allocation.claim_free_address().await.unwrap_err();
        assert!(matches!(err, BridgeError::NoFreeAddress));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_register_flips_owner_and_creates_client() {
        let (ledger, allocation) = setup().await;
        let address = free_address("3abc");
        allocation.publish(&address).await.unwrap();

        allocation
            .register(&address, "client-1", &["1dest".into()])
            .await
            .unwrap();

        let registered = allocation
            .list_addresses(OwnerFilter::Registered)
            .await
            .unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].info.owner.client_id(), Some("client-1"));
        // Notary keys survive the reclassification.
        assert_eq!(registered[0].info.notary_keys, address.info.notary_keys);

        let client = ledger
            .get_details(&AddressAllocationLedger::client_account("client-1"))
            .await
            .unwrap();
        assert_eq!(client.get("btc_address").map(String::as_str), Some("3abc"));
        assert_eq!(
            client.get("withdrawal_whitelist").map(String::as_str),
            Some(r#"["1dest"]"#)
        );
    }

    #[tokio::test]
    async fn test_register_loser_gets_conflict_and_no_partial_state() {
        let (ledger, allocation) = setup().await;
        let address = free_address("3abc");
        allocation.publish(&address).await.unwrap();

        allocation
            .register(&address, "client-1", &[])
            .await
            .unwrap();
        // Second claimant read the same free record before the first wrote.
        let err = allocation
            .register(&address, "client-2", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Conflict(_)));

        // The loser's client account must not exist.
        assert!(ledger
            .get_details(&AddressAllocationLedger::client_account("client-2"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_malformed_record_is_hard_error() {
        let (ledger, allocation) = setup().await;
        ledger
            .put_detail(ACCOUNT, "3bad", "{not json")
            .await
            .unwrap();
        let err = allocation
            .list_addresses(OwnerFilter::Any)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::CorruptRecord { .. }));
    }

    #[tokio::test]
    async fn test_change_address_configuration_errors() {
        let (_ledger, allocation) = setup().await;
        let err = allocation.change_address().await.unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));

        let mut change = free_address("3chg");
        change.info.owner = OwnerType::Change;
        allocation.publish(&change).await.unwrap();
        assert_eq!(allocation.change_address().await.unwrap().address, "3chg");

        let mut second = free_address("3chg2");
        second.info.owner = OwnerType::Change;
        allocation.publish(&second).await.unwrap();
        let err = allocation.change_address().await.unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }
}
