use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::constants::{ADDRESS_HASH_LEN, ADDRESS_LEN, ADDRESS_PREFIX};

/// Balance in pals (1 TMPL = 100_000_000 pals). Transfer amounts are further
/// capped below 2^63 at validation time.
pub type Balance = u64;

/// Unix timestamp in seconds (UTC). Fractional: the window scheduler works
/// at sub-second resolution.
pub type Timestamp = f64;

/// Transaction sequence number per account (monotonically increasing).
pub type Nonce = u64;

// ── Address ──────────────────────────────────────────────────────────────────

/// A 48-character TIMPAL address: `"tmpl"` followed by the first 44 hex
/// characters of double-SHA-256 of the public key bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    /// Derive the address for a 128-hex uncompressed public key.
    ///
    /// Falls back to hashing the raw string bytes when the key is not valid
    /// hex; the result then matches no honestly derived address.
    pub fn from_public_key_hex(public_key_hex: &str) -> Self {
        let pub_bytes = hex::decode(public_key_hex).unwrap_or_else(|_| public_key_hex.as_bytes().to_vec());
        let first = Sha256::digest(&pub_bytes);
        let second = Sha256::digest(first);
        Self(format!("{ADDRESS_PREFIX}{}", &hex::encode(second)[..ADDRESS_HASH_LEN]))
    }

    /// Structural check: correct prefix, correct length, hex tail.
    pub fn is_well_formed(s: &str) -> bool {
        s.len() == ADDRESS_LEN
            && s.starts_with(ADDRESS_PREFIX)
            && s[ADDRESS_PREFIX.len()..].chars().all(|c| c.is_ascii_hexdigit())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}…)", &self.0[..12.min(self.0.len())])
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── TxHash ───────────────────────────────────────────────────────────────────

/// 64-hex transaction identifier: SHA-256 of the canonical variant preimage.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl TxHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({}…)", &self.0[..16.min(self.0.len())])
    }
}

/// SHA-256 of arbitrary bytes as a lowercase hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Current Unix time in fractional seconds.
pub fn unix_now() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_has_prefix_and_length() {
        let addr = Address::from_public_key_hex(&"ab".repeat(64));
        assert!(addr.0.starts_with("tmpl"));
        assert_eq!(addr.0.len(), 48);
        assert!(Address::is_well_formed(addr.as_str()));
    }

    #[test]
    fn address_is_deterministic() {
        let pk = "11".repeat(64);
        assert_eq!(Address::from_public_key_hex(&pk), Address::from_public_key_hex(&pk));
    }

    #[test]
    fn malformed_addresses_rejected() {
        assert!(!Address::is_well_formed("tmplzz"));
        assert!(!Address::is_well_formed(&format!("xxxx{}", "0".repeat(44))));
        // 'z' is not hex
        assert!(!Address::is_well_formed(&format!("tmpl{}", "z".repeat(44))));
    }
}
