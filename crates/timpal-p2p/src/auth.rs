//! Replay- and forgery-resistant peer authentication.
//!
//! Validation order is fixed, and the first failure is fatal for the
//! message: ban list, required fields, signature, timestamp bounds, nonce
//! replay. The timestamp bounds are deliberately wide (±24 h) so nodes with
//! badly drifting clocks can still sync; the per-peer nonce ring is what
//! actually stops replays.

use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use timpal_core::constants::{
    CLOCK_DRIFT_WARNING_SECS, MAX_AUTH_FAILURES, MAX_MESSAGE_AGE_SECS, MAX_TIME_DRIFT_SECS,
    NONCE_CACHE_SIZE,
};
use timpal_core::error::TimpalError;
use timpal_core::types::Timestamp;
use tracing::{debug, warn};

use crate::message::verify_envelope;

const REQUIRED_AUTH_FIELDS: [&str; 4] = ["signature", "public_key", "timestamp", "nonce"];

/// Snapshot of the authenticator's counters, for monitoring.
#[derive(Debug, Clone)]
pub struct SecurityStats {
    pub tracked_peers: usize,
    pub banned_peers: usize,
    pub auth_failures: u32,
    pub nonce_cache_sizes: HashMap<String, usize>,
}

/// Pluggable signature check; defaults to the built-in secp256k1 verifier.
pub type SignatureVerifier = Box<dyn Fn(&Value) -> bool + Send + Sync>;

/// Per-peer authentication state: nonce rings, pinned public keys, failure
/// counters and the ban set.
pub struct PeerAuthenticator {
    seen_nonces: HashMap<String, VecDeque<String>>,
    peer_public_keys: HashMap<String, String>,
    banned_peers: HashSet<String>,
    auth_failures: HashMap<String, u32>,
    nonce_cache_size: usize,
    verifier: Option<SignatureVerifier>,
}

impl Default for PeerAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerAuthenticator {
    pub fn new() -> Self {
        Self::with_capacity(NONCE_CACHE_SIZE)
    }

    pub fn with_capacity(nonce_cache_size: usize) -> Self {
        Self {
            seen_nonces: HashMap::new(),
            peer_public_keys: HashMap::new(),
            banned_peers: HashSet::new(),
            auth_failures: HashMap::new(),
            nonce_cache_size,
            verifier: None,
        }
    }

    /// Inject a transport-level signature verifier in place of the built-in
    /// secp256k1 one.
    pub fn with_verifier(mut self, verifier: SignatureVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Run the full validation sequence on an inbound message. An error
    /// counts as an authentication failure for `peer_id` (except the ban
    /// check itself) and may tip the peer into the ban set.
    pub fn validate_message_auth(
        &mut self,
        message: &Value,
        peer_id: &str,
        now: Timestamp,
    ) -> Result<(), TimpalError> {
        if self.banned_peers.contains(peer_id) {
            return Err(TimpalError::PeerBanned(peer_id.to_string()));
        }

        let missing: Vec<&str> = REQUIRED_AUTH_FIELDS
            .iter()
            .filter(|f| message.get(**f).is_none())
            .copied()
            .collect();
        if !missing.is_empty() {
            self.record_auth_failure(peer_id);
            return Err(TimpalError::MissingAuthFields(missing.join(", ")));
        }

        let signature_ok = match &self.verifier {
            Some(verify) => verify(message),
            None => verify_envelope(message),
        };
        if !signature_ok {
            self.record_auth_failure(peer_id);
            return Err(TimpalError::AuthFailure("invalid signature".into()));
        }

        if let Err(e) = self.validate_timestamp(message.get("timestamp"), peer_id, now) {
            self.record_auth_failure(peer_id);
            return Err(e);
        }

        let nonce = message
            .get("nonce")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if nonce.is_empty() {
            self.record_auth_failure(peer_id);
            return Err(TimpalError::MissingAuthFields("nonce".into()));
        }
        if self
            .seen_nonces
            .get(peer_id)
            .map(|ring| ring.contains(&nonce.to_string()))
            .unwrap_or(false)
        {
            self.record_auth_failure(peer_id);
            return Err(TimpalError::DuplicateMessageNonce);
        }

        Ok(())
    }

    fn validate_timestamp(
        &self,
        timestamp: Option<&Value>,
        peer_id: &str,
        now: Timestamp,
    ) -> Result<(), TimpalError> {
        let ts = timestamp
            .and_then(Value::as_f64)
            .ok_or_else(|| TimpalError::AuthFailure("timestamp must be a number".into()))?;
        let age = now - ts;

        // Noticeable drift is an operator signal, not a rejection.
        if age.abs() > CLOCK_DRIFT_WARNING_SECS {
            let direction = if age > 0.0 { "behind" } else { "ahead" };
            warn!(peer = peer_id, drift_secs = age.abs(), direction, "peer clock drift");
        }

        if age < -MAX_TIME_DRIFT_SECS || age > MAX_MESSAGE_AGE_SECS {
            return Err(TimpalError::StaleTimestamp { age });
        }
        Ok(())
    }

    /// Record a message that passed validation: remember its nonce, reset
    /// the peer's failure counter, and pin the peer's public key. A key that
    /// differs from the pinned one is never adopted: the peer may be
    /// MITM'd, so the original key stays.
    pub fn record_verified_message(&mut self, message: &Value, peer_id: &str) {
        if let Some(nonce) = message.get("nonce").and_then(Value::as_str) {
            let ring = self.seen_nonces.entry(peer_id.to_string()).or_default();
            if ring.len() == self.nonce_cache_size {
                ring.pop_front();
            }
            ring.push_back(nonce.to_string());
        }

        self.auth_failures.remove(peer_id);

        if let Some(public_key) = message.get("public_key").and_then(Value::as_str) {
            match self.peer_public_keys.get(peer_id) {
                Some(pinned) if pinned != public_key => {
                    warn!(peer = peer_id, "peer changed public key, keeping original (possible MITM)");
                }
                Some(_) => {}
                None => {
                    self.peer_public_keys.insert(peer_id.to_string(), public_key.to_string());
                }
            }
        }
    }

    fn record_auth_failure(&mut self, peer_id: &str) {
        let failures = self.auth_failures.entry(peer_id.to_string()).or_insert(0);
        *failures += 1;
        debug!(peer = peer_id, failures = *failures, "authentication failure");
        if *failures >= MAX_AUTH_FAILURES {
            self.banned_peers.insert(peer_id.to_string());
            warn!(peer = peer_id, failures = *failures, "peer banned");
        }
    }

    pub fn is_peer_trusted(&self, peer_id: &str) -> bool {
        !self.banned_peers.contains(peer_id)
    }

    pub fn get_peer_public_key(&self, peer_id: &str) -> Option<&str> {
        self.peer_public_keys.get(peer_id).map(|s| s.as_str())
    }

    pub fn security_stats(&self) -> SecurityStats {
        SecurityStats {
            tracked_peers: self.peer_public_keys.len(),
            banned_peers: self.banned_peers.len(),
            auth_failures: self.auth_failures.values().sum(),
            nonce_cache_sizes: self
                .seen_nonces
                .iter()
                .map(|(peer, ring)| (peer.clone(), ring.len()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{sign_envelope, stamp_message};
    use timpal_crypto::KeyPair;

    const NOW: f64 = 1_700_000_000.0;

    fn signed(kp: &KeyPair, payload: Value) -> Value {
        let mut msg = stamp_message("test", payload);
        // Pin a deterministic timestamp for bound tests.
        msg["timestamp"] = serde_json::json!(NOW);
        sign_envelope(&mut msg, kp);
        msg
    }

    fn signed_at(kp: &KeyPair, ts: f64) -> Value {
        let mut msg = stamp_message("test", serde_json::json!({}));
        msg["timestamp"] = serde_json::json!(ts);
        sign_envelope(&mut msg, kp);
        msg
    }

    #[test]
    fn valid_message_passes_and_replay_fails() {
        let kp = KeyPair::generate();
        let mut auth = PeerAuthenticator::new();
        let msg = signed(&kp, serde_json::json!({"height": 1}));

        auth.validate_message_auth(&msg, "peer1", NOW).unwrap();
        auth.record_verified_message(&msg, "peer1");

        // The identical message (same nonce) is a replay.
        let err = auth.validate_message_auth(&msg, "peer1", NOW).unwrap_err();
        assert!(matches!(err, TimpalError::DuplicateMessageNonce));
        assert_eq!(auth.security_stats().auth_failures, 1);

        // The same nonce from a different peer is fine: rings are per-peer.
        auth.validate_message_auth(&msg, "peer2", NOW).unwrap();
    }

    #[test]
    fn missing_fields_rejected() {
        let kp = KeyPair::generate();
        let mut auth = PeerAuthenticator::new();
        let mut msg = signed(&kp, serde_json::json!({}));
        msg.as_object_mut().unwrap().remove("nonce");

        let err = auth.validate_message_auth(&msg, "peer1", NOW).unwrap_err();
        assert!(matches!(err, TimpalError::MissingAuthFields(_)));
    }

    #[test]
    fn forged_signature_rejected() {
        let kp = KeyPair::generate();
        let mut auth = PeerAuthenticator::new();
        let mut msg = signed(&kp, serde_json::json!({"height": 1}));
        msg["height"] = serde_json::json!(2);

        let err = auth.validate_message_auth(&msg, "peer1", NOW).unwrap_err();
        assert!(matches!(err, TimpalError::AuthFailure(_)));
    }

    #[test]
    fn timestamp_bounds_are_exact() {
        let kp = KeyPair::generate();
        let mut auth = PeerAuthenticator::new();

        // Exactly 24 h old passes; one second older does not.
        auth.validate_message_auth(&signed_at(&kp, NOW - 86_400.0), "p", NOW)
            .unwrap();
        let err = auth
            .validate_message_auth(&signed_at(&kp, NOW - 86_401.0), "p", NOW)
            .unwrap_err();
        assert!(matches!(err, TimpalError::StaleTimestamp { .. }));

        // Future drift has the same extreme bound.
        auth.validate_message_auth(&signed_at(&kp, NOW + 86_400.0), "p", NOW)
            .unwrap();
        assert!(auth
            .validate_message_auth(&signed_at(&kp, NOW + 86_401.0), "p", NOW)
            .is_err());
    }

    #[test]
    fn tenth_failure_bans_the_peer() {
        let kp = KeyPair::generate();
        let mut auth = PeerAuthenticator::new();
        let mut bad = signed(&kp, serde_json::json!({}));
        bad["timestamp"] = serde_json::json!(0.0); // breaks the signature too

        for _ in 0..9 {
            let err = auth.validate_message_auth(&bad, "mallory", NOW).unwrap_err();
            assert!(!matches!(err, TimpalError::PeerBanned(_)));
        }
        assert!(auth.is_peer_trusted("mallory"));

        // Tenth failure crosses the threshold.
        auth.validate_message_auth(&bad, "mallory", NOW).unwrap_err();
        assert!(!auth.is_peer_trusted("mallory"));

        // Banned peers fail at step one, even with a valid message.
        let good = signed(&kp, serde_json::json!({}));
        let err = auth.validate_message_auth(&good, "mallory", NOW).unwrap_err();
        assert!(matches!(err, TimpalError::PeerBanned(_)));
    }

    #[test]
    fn success_resets_failure_counter() {
        let kp = KeyPair::generate();
        let mut auth = PeerAuthenticator::new();
        let mut bad = signed(&kp, serde_json::json!({}));
        bad["timestamp"] = serde_json::json!(0.0);

        for _ in 0..5 {
            auth.validate_message_auth(&bad, "peer", NOW).unwrap_err();
        }
        let good = signed(&kp, serde_json::json!({"n": 1}));
        auth.validate_message_auth(&good, "peer", NOW).unwrap();
        auth.record_verified_message(&good, "peer");
        assert_eq!(auth.security_stats().auth_failures, 0);
    }

    #[test]
    fn peer_key_continuity_pins_first_key() {
        let k1 = KeyPair::generate();
        let k2 = KeyPair::generate();
        let mut auth = PeerAuthenticator::new();

        let m1 = signed(&k1, serde_json::json!({"n": 1}));
        auth.validate_message_auth(&m1, "peer", NOW).unwrap();
        auth.record_verified_message(&m1, "peer");
        assert_eq!(auth.get_peer_public_key("peer"), Some(k1.public_key_hex.as_str()));

        // A message under a new key still validates (its signature is
        // self-consistent), but the pinned key never changes.
        let m2 = signed(&k2, serde_json::json!({"n": 2}));
        auth.validate_message_auth(&m2, "peer", NOW).unwrap();
        auth.record_verified_message(&m2, "peer");
        assert_eq!(auth.get_peer_public_key("peer"), Some(k1.public_key_hex.as_str()));
    }

    #[test]
    fn nonce_ring_evicts_oldest() {
        let kp = KeyPair::generate();
        let mut auth = PeerAuthenticator::with_capacity(2);

        let m1 = signed(&kp, serde_json::json!({"n": 1}));
        let m2 = signed(&kp, serde_json::json!({"n": 2}));
        let m3 = signed(&kp, serde_json::json!({"n": 3}));
        for m in [&m1, &m2, &m3] {
            auth.validate_message_auth(m, "peer", NOW).unwrap();
            auth.record_verified_message(m, "peer");
        }

        // m1's nonce has been evicted from the ring of 2, so the replay
        // window has passed it by.
        auth.validate_message_auth(&m1, "peer", NOW).unwrap();
        // m3 is still in the ring.
        assert!(auth.validate_message_auth(&m3, "peer", NOW).is_err());
    }

    #[test]
    fn injected_verifier_overrides_builtin() {
        let kp = KeyPair::generate();
        let mut auth = PeerAuthenticator::new().with_verifier(Box::new(|_| false));
        let msg = signed(&kp, serde_json::json!({}));
        let err = auth.validate_message_auth(&msg, "peer", NOW).unwrap_err();
        assert!(matches!(err, TimpalError::AuthFailure(_)));
    }
}
