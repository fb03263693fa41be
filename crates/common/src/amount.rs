//! Exact satoshi / BTC conversion.
//!
//! Deposit amounts are forwarded to the ledger as decimal BTC strings, so
//! the conversion is pure integer arithmetic with a fixed 8-decimal scale.
//! No floating point anywhere on this path.

use crate::BridgeError;

/// Satoshis per BTC.
pub const SATS_PER_BTC: u64 = 100_000_000;

/// Format a satoshi amount as a decimal BTC string with exactly 8
/// fractional digits, e.g. `123450000 -> "1.23450000"`.
pub fn format_btc(sats: u64) -> String {
    format!("{}.{:08}", sats / SATS_PER_BTC, sats % SATS_PER_BTC)
}

/// Parse a decimal BTC string back into satoshis.
///
/// Accepts up to 8 fractional digits; anything beyond that would lose
/// precision and is rejected.
pub fn parse_btc(s: &str) -> Result<u64, BridgeError> {
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };

    if whole.is_empty() && frac.is_empty() {
        return Err(BridgeError::Serialization(format!(
            "invalid BTC amount: '{}'",
            s
        )));
    }
    if frac.len() > 8 {
        return Err(BridgeError::Serialization(format!(
            "too many decimal places in BTC amount: '{}'",
            s
        )));
    }

    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|e| BridgeError::Serialization(format!("invalid BTC amount '{}': {}", s, e)))?
    };

    let mut frac_sats: u64 = 0;
    if !frac.is_empty() {
        let digits: u64 = frac
            .parse()
            .map_err(|e| BridgeError::Serialization(format!("invalid BTC amount '{}': {}", s, e)))?;
        frac_sats = digits * 10u64.pow(8 - frac.len() as u32);
    }

    whole
        .checked_mul(SATS_PER_BTC)
        .and_then(|w| w.checked_add(frac_sats))
        .ok_or_else(|| BridgeError::Serialization(format!("BTC amount overflow: '{}'", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_btc_exact() {
        assert_eq!(format_btc(0), "0.00000000");
        assert_eq!(format_btc(1), "0.00000001");
        assert_eq!(format_btc(SATS_PER_BTC), "1.00000000");
        assert_eq!(format_btc(123_450_000), "1.23450000");
        assert_eq!(format_btc(2_100_000_000_000_000), "21000000.00000000");
    }

    #[test]
    fn test_parse_btc_round_trip() {
        for sats in [0u64, 1, 546, 99_999_999, SATS_PER_BTC, 123_450_000] {
            assert_eq!(parse_btc(&format_btc(sats)).unwrap(), sats);
        }
    }

    #[test]
    fn test_parse_btc_partial_fractions() {
        assert_eq!(parse_btc("1.5").unwrap(), 150_000_000);
        assert_eq!(parse_btc("0.001").unwrap(), 100_000);
        assert_eq!(parse_btc("3").unwrap(), 300_000_000);
        assert_eq!(parse_btc(".5").unwrap(), 50_000_000);
    }

    #[test]
    fn test_parse_btc_rejects_excess_precision() {
        assert!(parse_btc("0.000000001").is_err());
        assert!(parse_btc("abc").is_err());
        assert!(parse_btc(".").is_err());
    }
}
