//! Transaction signing and verification.
//!
//! The signature covers SHA-256 of the transaction hash string; the hash
//! itself already commits to every semantic field of the variant.

use timpal_core::error::TimpalError;
use timpal_core::transaction::Transaction;
use timpal_core::types::Address;

use crate::hash::sha256;
use crate::keypair::{verify_digest, KeyPair};

/// Sign `tx` in place with `keypair`. The envelope public key is stamped so
/// verifiers can rederive the sender address.
pub fn sign_transaction(tx: &mut Transaction, keypair: &KeyPair) -> Result<(), TimpalError> {
    let digest = sha256(tx.tx_hash.as_str().as_bytes());
    tx.signature = Some(keypair.sign_digest(digest)?);
    if tx.public_key.is_none() {
        tx.public_key = Some(keypair.public_key_hex.clone());
    }
    Ok(())
}

/// Verify a transaction's authenticity:
/// 1. signature and public key present,
/// 2. the sender address is the one derived from the public key,
/// 3. the ECDSA signature verifies over the hash digest.
pub fn verify_transaction(tx: &Transaction) -> bool {
    let (signature, public_key) = match (&tx.signature, &tx.public_key) {
        (Some(s), Some(p)) => (s, p),
        _ => return false,
    };
    if Address::from_public_key_hex(public_key) != tx.sender {
        return false;
    }
    let digest = sha256(tx.tx_hash.as_str().as_bytes());
    verify_digest(public_key, digest, signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use timpal_core::constants::FEE;

    fn signed_transfer(kp: &KeyPair, recipient: Address) -> Transaction {
        let mut tx = Transaction::new_transfer(
            kp.address.clone(),
            recipient,
            1_000,
            FEE,
            1_700_000_000.5,
            0,
            kp.public_key_hex.clone(),
        );
        sign_transaction(&mut tx, kp).unwrap();
        tx
    }

    #[test]
    fn signed_transfer_verifies() {
        let kp = KeyPair::generate();
        let tx = signed_transfer(&kp, KeyPair::generate().address.clone());
        assert!(verify_transaction(&tx));
    }

    #[test]
    fn unsigned_transfer_fails() {
        let kp = KeyPair::generate();
        let mut tx = signed_transfer(&kp, KeyPair::generate().address.clone());
        tx.signature = None;
        assert!(!verify_transaction(&tx));
    }

    #[test]
    fn sender_spoofing_fails() {
        let kp = KeyPair::generate();
        let mut tx = signed_transfer(&kp, KeyPair::generate().address.clone());
        // A signature from someone else's key does not match the sender.
        tx.sender = KeyPair::generate().address.clone();
        assert!(!verify_transaction(&tx));
    }

    #[test]
    fn tampered_hash_fails() {
        let kp = KeyPair::generate();
        let mut tx = signed_transfer(&kp, KeyPair::generate().address.clone());
        tx.tx_hash = timpal_core::types::TxHash("0".repeat(64));
        assert!(!verify_transaction(&tx));
    }
}
