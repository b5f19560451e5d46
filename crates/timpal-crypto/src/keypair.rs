use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use timpal_core::error::TimpalError;
use timpal_core::types::Address;
use zeroize::Zeroize;

use crate::hash::address_from_pubkey_hex;

/// A TIMPAL keypair: 32-byte secp256k1 secret scalar plus the derived
/// 128-hex uncompressed public key and address.
///
/// The secret bytes are wiped on drop. Public keys travel without the `04`
/// uncompressed-point prefix (64 raw bytes, 128 hex chars); the prefix is
/// added and stripped at the secp256k1 boundary.
pub struct KeyPair {
    secret: [u8; 32],
    pub public_key_hex: String,
    pub address: Address,
}

impl KeyPair {
    /// Generate a fresh keypair from OS entropy.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (sk, pk) = secp.generate_keypair(&mut rand::thread_rng());
        Self::from_parts(sk.secret_bytes(), &pk)
    }

    /// Restore a keypair from a 64-hex private scalar.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, TimpalError> {
        let bytes = hex::decode(secret_hex)
            .map_err(|_| TimpalError::InvalidTransaction("private key is not hex".into()))?;
        Self::from_secret_bytes(&bytes)
    }

    /// Restore a keypair from 32 raw secret bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, TimpalError> {
        let sk = SecretKey::from_slice(bytes).map_err(|_| TimpalError::InvalidSignature)?;
        let secp = Secp256k1::new();
        let pk = PublicKey::from_secret_key(&secp, &sk);
        Ok(Self::from_parts(sk.secret_bytes(), &pk))
    }

    fn from_parts(secret: [u8; 32], pk: &PublicKey) -> Self {
        // serialize_uncompressed() yields 65 bytes led by 0x04.
        let public_key_hex = hex::encode(&pk.serialize_uncompressed()[1..]);
        let address = address_from_pubkey_hex(&public_key_hex);
        Self { secret, public_key_hex, address }
    }

    /// Hex of the private scalar. Handle with care; primarily for the wallet
    /// vault which re-encrypts it at rest.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret)
    }

    /// Sign a 32-byte digest. Returns the 128-hex compact r||s signature,
    /// low-S normalised.
    pub fn sign_digest(&self, digest: [u8; 32]) -> Result<String, TimpalError> {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&self.secret).map_err(|_| TimpalError::InvalidSignature)?;
        let msg = Message::from_digest(digest);
        let sig = secp.sign_ecdsa(&msg, &sk);
        Ok(hex::encode(sig.serialize_compact()))
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ address: {} }}", self.address)
    }
}

/// Verify a 128-hex compact signature over `digest` against a 128-hex
/// uncompressed public key. Any decoding failure is a plain `false`.
pub fn verify_digest(public_key_hex: &str, digest: [u8; 32], signature_hex: &str) -> bool {
    let pk_bytes = match hex::decode(public_key_hex) {
        Ok(b) if b.len() == 64 => b,
        _ => return false,
    };
    let mut uncompressed = vec![0x04u8];
    uncompressed.extend_from_slice(&pk_bytes);
    let pk = match PublicKey::from_slice(&uncompressed) {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let sig_bytes = match hex::decode(signature_hex) {
        Ok(b) if b.len() == 64 => b,
        _ => return false,
    };
    let mut sig = match Signature::from_compact(&sig_bytes) {
        Ok(s) => s,
        Err(_) => return false,
    };
    // Accept only canonical low-S encodings after normalisation.
    sig.normalize_s();
    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest(digest);
    secp.verify_ecdsa(&msg, &sig, &pk).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256;

    #[test]
    fn sign_verify_roundtrip() {
        let kp = KeyPair::generate();
        let digest = sha256(b"hello timpal");
        let sig = kp.sign_digest(digest).unwrap();
        assert!(verify_digest(&kp.public_key_hex, digest, &sig));
    }

    #[test]
    fn verify_rejects_mutations() {
        let kp = KeyPair::generate();
        let digest = sha256(b"payload");
        let sig = kp.sign_digest(digest).unwrap();

        // Flip one bit of the message.
        let mut other = digest;
        other[0] ^= 1;
        assert!(!verify_digest(&kp.public_key_hex, other, &sig));

        // Flip one hex char of the signature.
        let mut chars: Vec<char> = sig.chars().collect();
        chars[10] = if chars[10] == '0' { '1' } else { '0' };
        let tampered: String = chars.into_iter().collect();
        assert!(!verify_digest(&kp.public_key_hex, digest, &tampered));

        // Wrong key.
        let stranger = KeyPair::generate();
        assert!(!verify_digest(&stranger.public_key_hex, digest, &sig));
    }

    #[test]
    fn public_key_is_128_hex_and_address_48_chars() {
        let kp = KeyPair::generate();
        assert_eq!(kp.public_key_hex.len(), 128);
        assert_eq!(kp.address.as_str().len(), 48);
        assert!(kp.address.as_str().starts_with("tmpl"));
    }

    #[test]
    fn secret_roundtrip_preserves_identity() {
        let kp = KeyPair::generate();
        let restored = KeyPair::from_secret_hex(&kp.secret_hex()).unwrap();
        assert_eq!(restored.public_key_hex, kp.public_key_hex);
        assert_eq!(restored.address, kp.address);
    }
}
