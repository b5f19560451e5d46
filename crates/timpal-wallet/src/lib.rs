//! timpal-wallet — hierarchical deterministic wallet for TIMPAL.
//!
//! BIP-39 recovery phrases, SLIP-0010 secp256k1 key derivation at
//! `m/44'/4007'/account'/change/index`, and an encrypted at-rest vault
//! (Argon2id password hardening → PBKDF2-HMAC-SHA512 key stretch →
//! ChaCha20-Poly1305). A separate numeric PIN authorizes outgoing
//! transfers; it never decrypts anything.

pub mod error;
pub mod hd;
pub mod vault;

pub use error::WalletError;
pub use hd::{derive_key, generate_phrase, parse_path, validate_phrase};
pub use vault::{DerivedAccount, SeedVault};
