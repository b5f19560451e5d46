//! timpal-crypto — hashing and secp256k1 signatures for the TIMPAL protocol.

pub mod hash;
pub mod keypair;
pub mod validation;

pub use hash::{address_from_pubkey_hex, double_sha256, sha256};
pub use keypair::{verify_digest, KeyPair};
pub use validation::{sign_transaction, verify_transaction};
