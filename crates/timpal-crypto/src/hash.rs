use sha2::{Digest, Sha256};
use timpal_core::types::Address;

/// SHA-256 of arbitrary bytes → 32-byte array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 applied twice, as used for address derivation.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// Derive a TIMPAL address from a 128-hex uncompressed public key.
pub fn address_from_pubkey_hex(public_key_hex: &str) -> Address {
    Address::from_public_key_hex(public_key_hex)
}
