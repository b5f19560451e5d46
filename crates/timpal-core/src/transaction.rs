use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::constants::{FEE, MAX_TRANSACTION_AMOUNT};
use crate::types::{Address, Balance, Nonce, Timestamp, TxHash};

// ── Timeout consensus payloads ───────────────────────────────────────────────

/// A single validator's vote that the proposer for (height, round) has
/// stalled. The vote signature covers
/// `(height, round, proposer, voter, vote_timestamp)` and is checked by the
/// ledger, not here.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimeoutVote {
    pub height: u64,
    pub round: u64,
    pub proposer: Address,
    pub voter: Address,
    pub vote_timestamp: Timestamp,
    pub voter_public_key: String,
    pub vote_signature: String,
}

impl TimeoutVote {
    /// The exact byte string each voter signs (after SHA-256).
    pub fn signing_preimage(&self) -> String {
        format!(
            "timeout_vote{}{}{}{}{}",
            self.height, self.round, self.proposer, self.voter, self.vote_timestamp
        )
    }
}

/// Aggregation of timeout votes representing at least 2/3 of validator
/// power. The quorum and per-vote signature checks happen inside the ledger;
/// this struct only carries the data.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimeoutCertificate {
    pub height: u64,
    pub round: u64,
    pub proposer: Address,
    pub votes: Vec<TimeoutVote>,
    pub aggregated_power: u64,
    pub issuer: Address,
}

// ── TxKind ───────────────────────────────────────────────────────────────────

/// Every transaction on the TIMPAL chain is one of these seven shapes,
/// tagged on the wire by `tx_type`.
///
/// The zero-amount rule for heartbeats, attestations and timeout messages is
/// modelled by the variant shape itself: those variants carry no amount or
/// fee fields at all.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "tx_type", rename_all = "snake_case")]
pub enum TxKind {
    /// Move pals between two accounts. Pays the flat protocol fee.
    Transfer {
        recipient: Address,
        amount: Balance,
        fee: Balance,
    },

    /// Join the validator set. Free; the envelope public key must be the
    /// registrant's, and `device_id` enforces one node per device.
    ValidatorRegistration { device_id: String },

    /// Liveness ping from a registered validator. No nonce.
    ValidatorHeartbeat,

    /// Committee-signed liveness acknowledgment for an epoch. No nonce.
    EpochAttestation { epoch_number: u64 },

    /// Vote that the proposer for (height, round) has stalled.
    TimeoutVote { timeout_vote_data: TimeoutVote },

    /// ≥2/3-power aggregation of timeout votes authorizing a proposer skip.
    TimeoutCertificate { timeout_cert_data: TimeoutCertificate },

    /// Block-reward emission to the proposer. Created by consensus during
    /// block assembly; never signed, never admitted to the mempool.
    Reward { recipient: Address, amount: Balance },
}

impl TxKind {
    /// Wire tag for this variant.
    pub fn tx_type(&self) -> &'static str {
        match self {
            TxKind::Transfer { .. } => "transfer",
            TxKind::ValidatorRegistration { .. } => "validator_registration",
            TxKind::ValidatorHeartbeat => "validator_heartbeat",
            TxKind::EpochAttestation { .. } => "epoch_attestation",
            TxKind::TimeoutVote { .. } => "timeout_vote",
            TxKind::TimeoutCertificate { .. } => "timeout_certificate",
            TxKind::Reward { .. } => "reward",
        }
    }
}

// ── Transaction ──────────────────────────────────────────────────────────────

/// A fully-formed TIMPAL transaction: envelope fields shared by every
/// variant plus the variant payload, flattened on the wire.
///
/// `tx_hash` is SHA-256 over a canonical per-variant concatenation of
/// semantic fields only; the signature is never part of the preimage. The
/// signature is ECDSA over SHA-256 of the hash string and is stored hex.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub sender: Address,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub nonce: Nonce,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    pub tx_hash: TxHash,
    #[serde(flatten)]
    pub kind: TxKind,
}

impl Transaction {
    fn assemble(
        sender: Address,
        timestamp: Timestamp,
        nonce: Nonce,
        public_key: Option<String>,
        kind: TxKind,
    ) -> Self {
        let mut tx = Self {
            sender,
            timestamp,
            nonce,
            signature: None,
            public_key,
            tx_hash: TxHash(String::new()),
            kind,
        };
        tx.tx_hash = tx.compute_hash();
        tx
    }

    pub fn new_transfer(
        sender: Address,
        recipient: Address,
        amount: Balance,
        fee: Balance,
        timestamp: Timestamp,
        nonce: Nonce,
        public_key: String,
    ) -> Self {
        Self::assemble(
            sender,
            timestamp,
            nonce,
            Some(public_key),
            TxKind::Transfer { recipient, amount, fee },
        )
    }

    pub fn new_validator_registration(
        sender: Address,
        public_key: String,
        device_id: String,
        timestamp: Timestamp,
        nonce: Nonce,
    ) -> Self {
        Self::assemble(
            sender,
            timestamp,
            nonce,
            Some(public_key),
            TxKind::ValidatorRegistration { device_id },
        )
    }

    pub fn new_validator_heartbeat(sender: Address, timestamp: Timestamp) -> Self {
        // Heartbeats carry no nonce.
        Self::assemble(sender, timestamp, 0, None, TxKind::ValidatorHeartbeat)
    }

    pub fn new_epoch_attestation(sender: Address, epoch_number: u64, timestamp: Timestamp) -> Self {
        Self::assemble(sender, timestamp, 0, None, TxKind::EpochAttestation { epoch_number })
    }

    pub fn new_timeout_vote(sender: Address, vote: TimeoutVote, timestamp: Timestamp) -> Self {
        Self::assemble(sender, timestamp, 0, None, TxKind::TimeoutVote { timeout_vote_data: vote })
    }

    pub fn new_timeout_certificate(
        sender: Address,
        cert: TimeoutCertificate,
        timestamp: Timestamp,
    ) -> Self {
        Self::assemble(sender, timestamp, 0, None, TxKind::TimeoutCertificate {
            timeout_cert_data: cert,
        })
    }

    pub fn new_reward(
        network: Address,
        recipient: Address,
        amount: Balance,
        timestamp: Timestamp,
    ) -> Self {
        Self::assemble(network, timestamp, 0, None, TxKind::Reward { recipient, amount })
    }

    // ── Canonical hash ───────────────────────────────────────────────────────

    /// The canonical preimage hashed to produce `tx_hash`. Per-variant
    /// concatenation of semantic fields; the signature never appears.
    pub fn hash_preimage(&self) -> String {
        let t = self.kind.tx_type();
        match &self.kind {
            TxKind::Transfer { recipient, amount, fee } => format!(
                "{t}{}{}{}{}{}{}",
                self.sender, recipient, amount, fee, self.timestamp, self.nonce
            ),
            TxKind::ValidatorRegistration { device_id } => format!(
                "{t}{}{}{}{}{}",
                self.sender,
                self.public_key.as_deref().unwrap_or(""),
                device_id,
                self.timestamp,
                self.nonce
            ),
            TxKind::ValidatorHeartbeat => format!("{t}{}{}", self.sender, self.timestamp),
            TxKind::EpochAttestation { epoch_number } => {
                format!("{t}{}{}{}", self.sender, epoch_number, self.timestamp)
            }
            TxKind::TimeoutVote { timeout_vote_data: v } => format!(
                "{t}{}{}{}{}{}",
                v.height, v.round, v.proposer, v.voter, v.vote_timestamp
            ),
            TxKind::TimeoutCertificate { timeout_cert_data: c } => {
                let mut sigs: Vec<&str> =
                    c.votes.iter().map(|v| v.vote_signature.as_str()).collect();
                sigs.sort_unstable();
                format!(
                    "{t}{}{}{}{}{}",
                    c.height,
                    c.round,
                    c.proposer,
                    sigs.concat(),
                    c.aggregated_power
                )
            }
            TxKind::Reward { recipient, amount } => {
                format!("{t}{}{}{}{}", self.sender, recipient, amount, self.timestamp)
            }
        }
    }

    pub fn compute_hash(&self) -> TxHash {
        TxHash(hex::encode(Sha256::digest(self.hash_preimage().as_bytes())))
    }

    /// True when the stored hash matches the canonical preimage.
    pub fn hash_is_canonical(&self) -> bool {
        self.tx_hash == self.compute_hash()
    }

    // ── Nonce discipline ─────────────────────────────────────────────────────

    /// Heartbeats, attestations, timeout votes, timeout certificates and
    /// rewards never advance the sender's nonce.
    pub fn advances_nonce(&self) -> bool {
        matches!(
            self.kind,
            TxKind::Transfer { .. } | TxKind::ValidatorRegistration { .. }
        )
    }

    // ── Validity ─────────────────────────────────────────────────────────────

    /// Variant-dispatched validity against current balances and (optionally)
    /// expected nonces. A plain decision: the caller decides the
    /// disposition of invalid transactions.
    pub fn is_valid(
        &self,
        balances: &HashMap<Address, Balance>,
        nonces: Option<&HashMap<Address, Nonce>>,
    ) -> bool {
        match &self.kind {
            TxKind::Transfer { recipient, amount, fee } => {
                self.is_valid_transfer(recipient, *amount, *fee, balances, nonces)
            }
            TxKind::ValidatorRegistration { device_id } => {
                self.is_valid_registration(device_id, nonces)
            }
            // Heartbeats never compare their timestamp against wall-clock
            // time: historical blocks must replay cleanly during sync.
            TxKind::ValidatorHeartbeat => true,
            TxKind::EpochAttestation { .. } => true,
            TxKind::TimeoutVote { timeout_vote_data } => timeout_vote_data.voter == self.sender,
            TxKind::TimeoutCertificate { timeout_cert_data: c } => {
                // Quorum and per-vote signatures are checked by the ledger.
                !c.votes.is_empty() && c.aggregated_power > 0 && c.issuer == self.sender
            }
            TxKind::Reward { amount, .. } => *amount > 0,
        }
    }

    fn is_valid_transfer(
        &self,
        recipient: &Address,
        amount: Balance,
        fee: Balance,
        balances: &HashMap<Address, Balance>,
        nonces: Option<&HashMap<Address, Nonce>>,
    ) -> bool {
        if amount == 0 {
            return false;
        }
        // Cap plus overflow guard: amounts must stay below 2^63.
        if amount > MAX_TRANSACTION_AMOUNT || amount > i64::MAX as u64 {
            return false;
        }
        if fee != FEE {
            return false;
        }
        if self.sender == *recipient {
            return false;
        }
        let sender_balance = balances.get(&self.sender).copied().unwrap_or(0);
        let need = match amount.checked_add(fee) {
            Some(n) => n,
            None => return false,
        };
        if sender_balance < need {
            return false;
        }
        if let Some(nonces) = nonces {
            let expected = nonces.get(&self.sender).copied().unwrap_or(0);
            if self.nonce != expected {
                return false;
            }
        }
        true
    }

    fn is_valid_registration(
        &self,
        device_id: &str,
        nonces: Option<&HashMap<Address, Nonce>>,
    ) -> bool {
        let public_key = match &self.public_key {
            Some(pk) => pk,
            None => return false,
        };
        if public_key.len() != 128 || !public_key.chars().all(|c| c.is_ascii_hexdigit()) {
            return false;
        }
        if Address::from_public_key_hex(public_key) != self.sender {
            return false;
        }
        if !is_valid_device_id(device_id) {
            return false;
        }
        if let Some(nonces) = nonces {
            let expected = nonces.get(&self.sender).copied().unwrap_or(0);
            if self.nonce != expected {
                return false;
            }
        }
        // Registration is free: no balance requirement.
        true
    }
}

/// A device id is either a 64-hex SHA-256 digest (canonical) or a legacy
/// 48-char wallet address, `"tmpl"` + 44 hex.
pub fn is_valid_device_id(device_id: &str) -> bool {
    match device_id.len() {
        64 => device_id.chars().all(|c| c.is_ascii_hexdigit()),
        48 => Address::is_well_formed(device_id),
        _ => false,
    }
}
