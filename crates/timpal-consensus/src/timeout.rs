//! Timeout votes and certificates: the authorised way to skip a stalled
//! proposer.
//!
//! Each vote is an ECDSA signature over
//! `(height, round, proposer, voter, vote_timestamp)`. A certificate is
//! admissible once distinct, signature-valid votes from registered
//! validators represent at least 2/3 of validator power (one unit per
//! registered validator).

use std::collections::{HashMap, HashSet};
use timpal_core::constants::{TIMEOUT_QUORUM_DEN, TIMEOUT_QUORUM_NUM};
use timpal_core::error::TimpalError;
use timpal_core::transaction::{TimeoutCertificate, TimeoutVote};
use timpal_core::types::Address;
use timpal_crypto::hash::sha256;
use timpal_crypto::keypair::verify_digest;
use tracing::debug;

use crate::validator::ValidatorSet;

/// Power needed for a quorum over `total` validators: ceil(2/3 · total).
pub fn quorum_power(total: u64) -> u64 {
    (TIMEOUT_QUORUM_NUM * total + TIMEOUT_QUORUM_DEN - 1) / TIMEOUT_QUORUM_DEN
}

/// Verify one timeout vote: the voter's address must match the embedded
/// public key, the voter must be registered, and the signature must verify
/// over the canonical vote preimage.
pub fn verify_timeout_vote(vote: &TimeoutVote, validators: &ValidatorSet) -> bool {
    if Address::from_public_key_hex(&vote.voter_public_key) != vote.voter {
        return false;
    }
    if !validators.is_validator(&vote.voter) {
        return false;
    }
    let digest = sha256(vote.signing_preimage().as_bytes());
    verify_digest(&vote.voter_public_key, digest, &vote.vote_signature)
}

/// The stake-weighted power a certificate's valid votes represent: one unit
/// per distinct valid voter, votes for the wrong (height, round, proposer)
/// discarded.
pub fn certificate_power(cert: &TimeoutCertificate, validators: &ValidatorSet) -> u64 {
    let mut seen: HashSet<&Address> = HashSet::new();
    for vote in &cert.votes {
        if vote.height != cert.height || vote.round != cert.round || vote.proposer != cert.proposer
        {
            continue;
        }
        if seen.contains(&vote.voter) {
            continue;
        }
        if verify_timeout_vote(vote, validators) {
            seen.insert(&vote.voter);
        }
    }
    seen.len() as u64
}

/// Full certificate check: every counted vote signature-valid, distinct,
/// and the total at or above the 2/3 quorum.
pub fn verify_timeout_certificate(
    cert: &TimeoutCertificate,
    validators: &ValidatorSet,
) -> Result<(), TimpalError> {
    let total = validators.len() as u64;
    let power = certificate_power(cert, validators);
    if power < quorum_power(total) {
        return Err(TimpalError::QuorumNotReached { power, total });
    }
    Ok(())
}

/// Accumulates timeout votes per (height, round) until a quorum forms.
#[derive(Default)]
pub struct TimeoutVotePool {
    votes: HashMap<(u64, u64), HashMap<Address, TimeoutVote>>,
}

impl TimeoutVotePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a verified vote. Returns the accumulated power for the
    /// (height, round) after insertion; duplicate voters are ignored.
    pub fn record_vote(&mut self, vote: TimeoutVote, validators: &ValidatorSet) -> u64 {
        if !verify_timeout_vote(&vote, validators) {
            debug!(voter = %vote.voter, height = vote.height, "discarding invalid timeout vote");
            let key = (vote.height, vote.round);
            return self.votes.get(&key).map(|v| v.len() as u64).unwrap_or(0);
        }
        let entry = self.votes.entry((vote.height, vote.round)).or_default();
        entry.entry(vote.voter.clone()).or_insert(vote);
        entry.len() as u64
    }

    /// Has (height, round) reached quorum against `validators`?
    pub fn has_quorum(&self, height: u64, round: u64, validators: &ValidatorSet) -> bool {
        let power = self
            .votes
            .get(&(height, round))
            .map(|v| v.len() as u64)
            .unwrap_or(0);
        power >= quorum_power(validators.len() as u64)
    }

    /// Drain the votes for a (height, round), e.g. to issue a certificate.
    pub fn take_votes(&mut self, height: u64, round: u64) -> Vec<TimeoutVote> {
        self.votes
            .remove(&(height, round))
            .map(|m| m.into_values().collect())
            .unwrap_or_default()
    }
}
