//! The signed JSON envelope.
//!
//! Wire shape: `{type, …payload…, timestamp, nonce, public_key, signature}`.
//! The signature covers SHA-256 of the canonical serialization with
//! `signature` removed. Canonical = sorted keys, compact separators (the
//! serde_json default map ordering, no added whitespace).

use rand::RngCore;
use serde_json::Value;
use timpal_core::types::{sha256_hex, unix_now};
use timpal_crypto::hash::sha256;
use timpal_crypto::keypair::verify_digest;
use timpal_crypto::KeyPair;

/// Compact JSON with sorted object keys.
pub fn canonical_json(value: &Value) -> String {
    // serde_json's default Map is BTree-backed, so key order is already
    // canonical; to_string emits no extraneous whitespace.
    value.to_string()
}

/// Digest an envelope signs or is verified against: canonical JSON of the
/// object minus its `signature` field.
pub fn signing_digest(message: &Value) -> [u8; 32] {
    let mut stripped = message.clone();
    if let Some(obj) = stripped.as_object_mut() {
        obj.remove("signature");
    }
    sha256(canonical_json(&stripped).as_bytes())
}

/// Stamp an outgoing message with its replay-protection fields:
/// `timestamp = now` and a 16-hex nonce derived from the type, the time and
/// fresh randomness.
pub fn stamp_message(msg_type: &str, payload: Value) -> Value {
    let mut message = payload;
    let now = unix_now();
    let mut fresh = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut fresh);
    let nonce = sha256_hex(format!("{msg_type}_{now}_{}", hex::encode(fresh)).as_bytes())
        [..16]
        .to_string();
    if let Some(obj) = message.as_object_mut() {
        obj.insert("type".into(), Value::String(msg_type.to_string()));
        obj.insert("timestamp".into(), serde_json::json!(now));
        obj.insert("nonce".into(), Value::String(nonce));
    }
    message
}

/// Attach `public_key` and `signature` to a stamped message.
pub fn sign_envelope(message: &mut Value, keypair: &KeyPair) {
    if let Some(obj) = message.as_object_mut() {
        obj.insert("public_key".into(), Value::String(keypair.public_key_hex.clone()));
    }
    let digest = signing_digest(message);
    if let Ok(signature) = keypair.sign_digest(digest) {
        if let Some(obj) = message.as_object_mut() {
            obj.insert("signature".into(), Value::String(signature));
        }
    }
}

/// Built-in envelope verification against the embedded public key.
pub fn verify_envelope(message: &Value) -> bool {
    let (signature, public_key) = match (
        message.get("signature").and_then(Value::as_str),
        message.get("public_key").and_then(Value::as_str),
    ) {
        (Some(s), Some(p)) => (s, p),
        _ => return false,
    };
    verify_digest(public_key, signing_digest(message), signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_sorts_keys() {
        let v: Value = serde_json::from_str(r#"{"zeta": 1, "alpha": 2}"#).unwrap();
        assert_eq!(canonical_json(&v), r#"{"alpha":2,"zeta":1}"#);
    }

    #[test]
    fn stamped_and_signed_envelope_verifies() {
        let kp = KeyPair::generate();
        let mut msg = stamp_message("block_announce", serde_json::json!({"height": 7}));
        sign_envelope(&mut msg, &kp);

        assert!(msg.get("timestamp").is_some());
        assert_eq!(msg["nonce"].as_str().unwrap().len(), 16);
        assert!(verify_envelope(&msg));
    }

    #[test]
    fn payload_mutation_breaks_signature() {
        let kp = KeyPair::generate();
        let mut msg = stamp_message("tx", serde_json::json!({"amount": 5}));
        sign_envelope(&mut msg, &kp);

        msg["amount"] = serde_json::json!(6);
        assert!(!verify_envelope(&msg));
    }

    #[test]
    fn nonces_are_fresh_per_message() {
        let a = stamp_message("ping", serde_json::json!({}));
        let b = stamp_message("ping", serde_json::json!({}));
        assert_ne!(a["nonce"], b["nonce"]);
    }
}
