use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use timpal_core::types::{Address, Timestamp};

/// Validators attesting per epoch: the committee is a deterministic subset
/// of the registered set, rotated by epoch number.
pub const EPOCH_COMMITTEE_SIZE: usize = 16;

/// Registry entry created by a `validator_registration` transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidatorRecord {
    pub address: Address,
    pub public_key: String,
    /// Unique per physical device; the Sybil guard.
    pub device_id: String,
    pub registered_at: Timestamp,
    /// Last heartbeat or attestation seen (liveness tracking only).
    #[serde(default)]
    pub last_seen: Option<Timestamp>,
}

/// The registered validator set.
///
/// Proposer order for a height is a deterministic hash ranking: every honest
/// node computes the identical queue from the identical registry, with no
/// communication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: HashMap<Address, ValidatorRecord>,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: ValidatorRecord) {
        self.validators.insert(record.address.clone(), record);
    }

    pub fn remove(&mut self, address: &Address) {
        self.validators.remove(address);
    }

    pub fn get(&self, address: &Address) -> Option<&ValidatorRecord> {
        self.validators.get(address)
    }

    pub fn is_validator(&self, address: &Address) -> bool {
        self.validators.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.validators.keys()
    }

    /// A device id may back at most one validator.
    pub fn device_id_in_use(&self, device_id: &str) -> bool {
        self.validators.values().any(|v| v.device_id == device_id)
    }

    /// Record a liveness signal from a validator.
    pub fn mark_seen(&mut self, address: &Address, now: Timestamp) {
        if let Some(v) = self.validators.get_mut(address) {
            v.last_seen = Some(now);
        }
    }

    /// Proposer queue for `height`: all registered validators ordered by
    /// `sha256(height || address)`, lowest digest first. Rank 0 is the
    /// primary, ranks 1.. are the fallbacks.
    pub fn ranked_proposers(&self, height: u64) -> Vec<Address> {
        let mut ranked: Vec<(String, Address)> = self
            .validators
            .keys()
            .map(|addr| {
                let digest = Sha256::digest(format!("{height}{addr}").as_bytes());
                (hex::encode(digest), addr.clone())
            })
            .collect();
        ranked.sort();
        ranked.into_iter().map(|(_, addr)| addr).collect()
    }

    /// Attestation committee for `epoch`: the first
    /// [`EPOCH_COMMITTEE_SIZE`] validators under the epoch's hash ranking.
    pub fn committee_for_epoch(&self, epoch: u64) -> Vec<Address> {
        let mut ranked: Vec<(String, Address)> = self
            .validators
            .keys()
            .map(|addr| {
                let digest = Sha256::digest(format!("epoch{epoch}{addr}").as_bytes());
                (hex::encode(digest), addr.clone())
            })
            .collect();
        ranked.sort();
        ranked
            .into_iter()
            .take(EPOCH_COMMITTEE_SIZE)
            .map(|(_, addr)| addr)
            .collect()
    }

    pub fn in_committee(&self, address: &Address, epoch: u64) -> bool {
        self.committee_for_epoch(epoch).contains(address)
    }
}
