//! Multisig redeem script and P2SH address derivation.
//!
//! Every notary derives the same address from the same key set without
//! talking to any other notary, so derivation must be a pure function of
//! the keys: the contributed public keys are normalized to lowercase hex
//! and sorted lexicographically before the redeem script is built. Two
//! notaries finalizing the same session therefore produce byte-identical
//! scripts and identical addresses.

use bitcoin::blockdata::opcodes::all::OP_CHECKMULTISIG;
use bitcoin::blockdata::script::Builder;
use bitcoin::script::PushBytesBuf;
use bitcoin::{Address, CompressedPublicKey, Network, ScriptBuf};
use tracing::debug;

use common::{signing_threshold, BridgeError};

/// A fully determined multisig: sorted keys plus the derived threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigSpec {
    /// Hex-encoded compressed public keys in canonical order.
    pub keys: Vec<String>,
    /// Number of signatures required to spend.
    pub threshold: usize,
}

impl MultisigSpec {
    /// Build a multisig from an unordered key set.
    pub fn from_keys(keys: &[String]) -> Result<Self, BridgeError> {
        if keys.is_empty() {
            return Err(BridgeError::InvalidPublicKey(
                "multisig requires at least one key".into(),
            ));
        }
        let keys = canonical_key_order(keys);
        let threshold = signing_threshold(keys.len());
        Ok(Self { keys, threshold })
    }

    pub fn redeem_script(&self) -> Result<ScriptBuf, BridgeError> {
        multisig_redeem_script(self.threshold, &self.keys)
    }

    /// Derive the P2SH address for this spec.
    pub fn address(&self, network: Network) -> Result<String, BridgeError> {
        derive_multisig_address(self, network)
    }
}

/// Sort hex-encoded keys into the canonical order: lowercase, then
/// lexicographic. For compressed keys this equals byte order.
pub fn canonical_key_order(keys: &[String]) -> Vec<String> {
    let mut keys: Vec<String> = keys.iter().map(|k| k.to_lowercase()).collect();
    keys.sort();
    keys.dedup();
    keys
}

/// Build an M-of-N `OP_CHECKMULTISIG` redeem script over already-sorted
/// keys.
pub fn multisig_redeem_script(
    threshold: usize,
    sorted_keys: &[String],
) -> Result<ScriptBuf, BridgeError> {
    if threshold == 0 || threshold > sorted_keys.len() {
        return Err(BridgeError::Script(format!(
            "invalid threshold {} for {} keys",
            threshold,
            sorted_keys.len()
        )));
    }

    let mut builder = Builder::new().push_int(threshold as i64);
    for key_hex in sorted_keys {
        let bytes = hex::decode(key_hex)
            .map_err(|e| BridgeError::InvalidPublicKey(format!("bad hex '{}': {}", key_hex, e)))?;
        if bytes.len() != 33 {
            return Err(BridgeError::InvalidPublicKey(format!(
                "expected 33 bytes, got {}",
                bytes.len()
            )));
        }
        // Validate the key actually lies on the curve before committing it
        // into a script that can never change.
        CompressedPublicKey::from_slice(&bytes)
            .map_err(|e| BridgeError::InvalidPublicKey(e.to_string()))?;
        let push = PushBytesBuf::try_from(bytes)
            .map_err(|e| BridgeError::Script(format!("push error: {}", e)))?;
        builder = builder.push_slice(push);
    }
    let script = builder
        .push_int(sorted_keys.len() as i64)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script();

    Ok(script)
}

/// Derive the base58 P2SH address for a multisig spec.
pub fn derive_multisig_address(
    spec: &MultisigSpec,
    network: Network,
) -> Result<String, BridgeError> {
    let script = spec.redeem_script()?;
    let address = Address::p2sh(&script, network)
        .map_err(|e| BridgeError::Script(format!("p2sh derivation failed: {}", e)))?;
    debug!(
        "Derived {}-of-{} multisig address {}",
        spec.threshold,
        spec.keys.len(),
        address
    );
    Ok(address.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Three valid compressed secp256k1 keys (generator multiples).
    const KEY_G: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
    const KEY_2G: &str = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";
    const KEY_3G: &str = "02f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9";

    fn keys() -> Vec<String> {
        vec![KEY_2G.to_string(), KEY_G.to_string(), KEY_3G.to_string()]
    }

    #[test]
    fn test_canonical_order_is_input_order_independent() {
        let a = canonical_key_order(&keys());
        let mut shuffled = keys();
        shuffled.reverse();
        let b = canonical_key_order(&shuffled);
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_canonical_order_normalizes_case() {
        let mixed = vec![KEY_G.to_uppercase(), KEY_2G.to_string()];
        let ordered = canonical_key_order(&mixed);
        assert!(ordered.contains(&KEY_G.to_string()));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let spec_a = MultisigSpec::from_keys(&keys()).unwrap();
        let mut reversed = keys();
        reversed.reverse();
        let spec_b = MultisigSpec::from_keys(&reversed).unwrap();

        assert_eq!(spec_a, spec_b);
        assert_eq!(spec_a.threshold, 3);

        let script_a = spec_a.redeem_script().unwrap();
        let script_b = spec_b.redeem_script().unwrap();
        assert_eq!(script_a.as_bytes(), script_b.as_bytes());

        let addr_a = spec_a.address(Network::Bitcoin).unwrap();
        let addr_b = spec_b.address(Network::Bitcoin).unwrap();
        assert_eq!(addr_a, addr_b);
        assert!(addr_a.starts_with('3'));
    }

    #[test]
    fn test_redeem_script_shape() {
        let spec = MultisigSpec::from_keys(&keys()).unwrap();
        let script = spec.redeem_script().unwrap();
        let bytes = script.as_bytes();
        // OP_3 <33-byte push> x3 OP_3 OP_CHECKMULTISIG
        assert_eq!(bytes.len(), 1 + 3 * 34 + 1 + 1);
        assert_eq!(*bytes.last().unwrap(), OP_CHECKMULTISIG.to_u8());
    }

    #[test]
    fn test_rejects_invalid_keys() {
        assert!(MultisigSpec::from_keys(&[]).is_err());
        assert!(MultisigSpec::from_keys(&["zz".into()])
            .unwrap()
            .redeem_script()
            .is_err());
        // Wrong length.
        assert!(multisig_redeem_script(1, &["02aabb".into()]).is_err());
    }
}
