//! SLIP-0010 secp256k1 key derivation on top of BIP-39 seeds.
//!
//! The seed is the standard BIP-39 construction: PBKDF2-HMAC-SHA512 over
//! the phrase with salt `"mnemonic" || passphrase` and 2048 iterations
//! (that is exactly what `Mnemonic::to_seed` computes). The master key and
//! child derivation follow SLIP-0010 for the secp256k1 curve.

use bip39::{Language, Mnemonic};
use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey};
use sha2::Sha512;
use timpal_core::constants::COIN_TYPE;
use zeroize::Zeroize;

use crate::error::WalletError;
use timpal_crypto::KeyPair;

type HmacSha512 = Hmac<Sha512>;

const MASTER_HMAC_KEY: &[u8] = b"Bitcoin seed";
const HARDENED_OFFSET: u32 = 0x8000_0000;

/// Generate a fresh BIP-39 recovery phrase with checksum. `words` must be
/// 12 or 24.
pub fn generate_phrase(words: usize) -> Result<String, WalletError> {
    if words != 12 && words != 24 {
        return Err(WalletError::CryptoError(format!("word count must be 12 or 24, got {words}")));
    }
    let mnemonic = Mnemonic::generate_in(Language::English, words)
        .map_err(|e| WalletError::CryptoError(e.to_string()))?;
    Ok(mnemonic.to_string())
}

/// Verify the BIP-39 checksum of a phrase.
pub fn validate_phrase(phrase: &str) -> bool {
    Mnemonic::parse_in_normalized(Language::English, phrase).is_ok()
}

/// A derivation step: child index plus hardened flag.
pub type PathStep = (u32, bool);

/// Parse a path of the form `m/44'/4007'/0'/0/0`.
pub fn parse_path(path: &str) -> Result<Vec<PathStep>, WalletError> {
    let mut parts = path.split('/');
    if parts.next() != Some("m") {
        return Err(WalletError::InvalidPath(path.to_string()));
    }
    let mut steps = Vec::new();
    for part in parts {
        let (digits, hardened) = match part.strip_suffix('\'').or_else(|| part.strip_suffix('h')) {
            Some(d) => (d, true),
            None => (part, false),
        };
        let index: u32 = digits
            .parse()
            .map_err(|_| WalletError::InvalidPath(path.to_string()))?;
        if index >= HARDENED_OFFSET {
            return Err(WalletError::InvalidPath(path.to_string()));
        }
        steps.push((index, hardened));
    }
    if steps.is_empty() {
        return Err(WalletError::InvalidPath(path.to_string()));
    }
    Ok(steps)
}

/// The canonical TIMPAL account path: `m/44'/4007'/account'/change/index`.
/// Hardened through the account level, non-hardened below it.
pub fn account_path(account: u32, change: u32, index: u32) -> String {
    format!("m/44'/{COIN_TYPE}'/{account}'/{change}/{index}")
}

// ── Extended keys ────────────────────────────────────────────────────────────

/// An extended private key: secret scalar plus chain code.
struct ExtendedKey {
    secret: [u8; 32],
    chain_code: [u8; 32],
}

impl ExtendedKey {
    /// SLIP-0010 master key: HMAC-SHA512("Bitcoin seed", seed), retrying on
    /// the (astronomically unlikely) invalid-scalar case.
    fn master(seed: &[u8]) -> Result<Self, WalletError> {
        let mut data = seed.to_vec();
        loop {
            let mut mac = HmacSha512::new_from_slice(MASTER_HMAC_KEY)
                .map_err(|e| WalletError::CryptoError(e.to_string()))?;
            mac.update(&data);
            let digest = mac.finalize().into_bytes();
            let (il, ir) = digest.split_at(32);
            if SecretKey::from_slice(il).is_ok() {
                let mut secret = [0u8; 32];
                let mut chain_code = [0u8; 32];
                secret.copy_from_slice(il);
                chain_code.copy_from_slice(ir);
                data.zeroize();
                return Ok(Self { secret, chain_code });
            }
            data = digest.to_vec();
        }
    }

    fn derive_child(&self, index: u32, hardened: bool) -> Result<Self, WalletError> {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&self.secret)
            .map_err(|e| WalletError::CryptoError(e.to_string()))?;

        let child_number = if hardened { index + HARDENED_OFFSET } else { index };
        let mut data = Vec::with_capacity(37);
        if hardened {
            data.push(0x00);
            data.extend_from_slice(&self.secret);
        } else {
            let pk = PublicKey::from_secret_key(&secp, &sk);
            data.extend_from_slice(&pk.serialize());
        }
        data.extend_from_slice(&child_number.to_be_bytes());

        loop {
            let mut mac = HmacSha512::new_from_slice(&self.chain_code)
                .map_err(|e| WalletError::CryptoError(e.to_string()))?;
            mac.update(&data);
            let digest = mac.finalize().into_bytes();
            let (il, ir) = digest.split_at(32);

            let mut il_arr = [0u8; 32];
            il_arr.copy_from_slice(il);
            let tweaked = Scalar::from_be_bytes(il_arr)
                .ok()
                .and_then(|tweak| sk.add_tweak(&tweak).ok());

            match tweaked {
                Some(child_sk) => {
                    let mut chain_code = [0u8; 32];
                    chain_code.copy_from_slice(ir);
                    return Ok(Self { secret: child_sk.secret_bytes(), chain_code });
                }
                // SLIP-0010: on an invalid child, continue with
                // HMAC(cc, 0x01 || IR || index).
                None => {
                    data.clear();
                    data.push(0x01);
                    data.extend_from_slice(ir);
                    data.extend_from_slice(&child_number.to_be_bytes());
                }
            }
        }
    }
}

impl Drop for ExtendedKey {
    fn drop(&mut self) {
        self.secret.zeroize();
        self.chain_code.zeroize();
    }
}

/// Derive the keypair at `path` from a recovery phrase and passphrase.
/// Deterministic: identical inputs yield the identical private scalar on
/// every run.
pub fn derive_key(phrase: &str, passphrase: &str, path: &str) -> Result<KeyPair, WalletError> {
    let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
        .map_err(|_| WalletError::InvalidPhrase)?;
    let mut seed = mnemonic.to_seed(passphrase);

    let steps = parse_path(path)?;
    let mut key = ExtendedKey::master(&seed)?;
    seed.zeroize();
    for (index, hardened) in steps {
        key = key.derive_child(index, hardened)?;
    }
    KeyPair::from_secret_bytes(&key.secret).map_err(|e| WalletError::CryptoError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn reference_phrase_is_valid() {
        assert!(validate_phrase(TEST_PHRASE));
    }

    #[test]
    fn corrupted_phrase_fails_checksum() {
        let bad = TEST_PHRASE.replace("about", "abandon");
        assert!(!validate_phrase(&bad));
    }

    #[test]
    fn generated_phrases_validate() {
        for words in [12, 24] {
            let phrase = generate_phrase(words).unwrap();
            assert_eq!(phrase.split_whitespace().count(), words);
            assert!(validate_phrase(&phrase));
        }
        assert!(generate_phrase(13).is_err());
    }

    #[test]
    fn derivation_is_deterministic() {
        let path = account_path(0, 0, 0);
        let a = derive_key(TEST_PHRASE, "", &path).unwrap();
        let b = derive_key(TEST_PHRASE, "", &path).unwrap();
        assert_eq!(a.secret_hex(), b.secret_hex());
        assert_eq!(a.address, b.address);
    }

    #[test]
    fn passphrase_changes_keys() {
        let path = account_path(0, 0, 0);
        let plain = derive_key(TEST_PHRASE, "", &path).unwrap();
        let extra = derive_key(TEST_PHRASE, "trezor", &path).unwrap();
        assert_ne!(plain.secret_hex(), extra.secret_hex());
    }

    #[test]
    fn sibling_paths_diverge() {
        let a = derive_key(TEST_PHRASE, "", &account_path(0, 0, 0)).unwrap();
        let b = derive_key(TEST_PHRASE, "", &account_path(0, 0, 1)).unwrap();
        let c = derive_key(TEST_PHRASE, "", &account_path(1, 0, 0)).unwrap();
        assert_ne!(a.address, b.address);
        assert_ne!(a.address, c.address);
    }

    #[test]
    fn path_parsing() {
        assert_eq!(
            parse_path("m/44'/4007'/0'/0/0").unwrap(),
            vec![(44, true), (4007, true), (0, true), (0, false), (0, false)]
        );
        assert!(parse_path("44'/0'").is_err());
        assert!(parse_path("m/abc").is_err());
        assert!(parse_path("m").is_err());
    }
}
