//! Finality checkpoints.
//!
//! Fork choice is longest-valid-chain by height, but a block at or below
//! the last recorded checkpoint is never reverted. An attempted reorg
//! across a checkpoint is a protocol-level fatal error: the node halts
//! rather than rewrite finalized history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use timpal_core::constants::CHECKPOINT_INTERVAL;
use timpal_core::error::TimpalError;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalityCheckpoints {
    /// height → block hash at that height, immovable once recorded.
    checkpoints: BTreeMap<u64, String>,
}

impl FinalityCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(checkpoints: BTreeMap<u64, String>) -> Self {
        Self { checkpoints }
    }

    pub fn as_map(&self) -> &BTreeMap<u64, String> {
        &self.checkpoints
    }

    /// Height of the newest checkpoint, if any.
    pub fn latest(&self) -> Option<u64> {
        self.checkpoints.keys().next_back().copied()
    }

    /// A height at or below the last checkpoint can never be reverted.
    pub fn is_frozen(&self, height: u64) -> bool {
        self.latest().map(|cp| height <= cp).unwrap_or(false)
    }

    /// Record a checkpoint when `height` falls on the interval.
    pub fn maybe_record(&mut self, height: u64, block_hash: &str) {
        if height > 0 && height % CHECKPOINT_INTERVAL == 0 {
            self.checkpoints.insert(height, block_hash.to_string());
            info!(height, "finality checkpoint recorded");
        }
    }

    /// Gate for any chain rewrite that would drop blocks above
    /// `new_tip_height`. Fatal when the rewrite reaches frozen history.
    pub fn ensure_reorg_allowed(&self, new_tip_height: u64) -> Result<(), TimpalError> {
        if let Some(checkpoint) = self.latest() {
            if new_tip_height <= checkpoint {
                return Err(TimpalError::CheckpointViolation {
                    height: new_tip_height,
                    checkpoint,
                });
            }
        }
        Ok(())
    }

    /// The hash pinned at `height`, if a checkpoint exists there.
    pub fn pinned_hash(&self, height: u64) -> Option<&str> {
        self.checkpoints.get(&height).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_only_on_interval() {
        let mut cps = FinalityCheckpoints::new();
        cps.maybe_record(99, "aa");
        assert_eq!(cps.latest(), None);
        cps.maybe_record(100, "bb");
        assert_eq!(cps.latest(), Some(100));
        assert_eq!(cps.pinned_hash(100), Some("bb"));
    }

    #[test]
    fn frozen_heights_reject_reorg() {
        let mut cps = FinalityCheckpoints::new();
        cps.maybe_record(200, "cc");

        assert!(cps.is_frozen(200));
        assert!(cps.is_frozen(150));
        assert!(!cps.is_frozen(201));

        assert!(matches!(
            cps.ensure_reorg_allowed(200),
            Err(TimpalError::CheckpointViolation { height: 200, checkpoint: 200 })
        ));
        cps.ensure_reorg_allowed(201).unwrap();
    }

    #[test]
    fn checkpoint_violation_is_fatal() {
        let mut cps = FinalityCheckpoints::new();
        cps.maybe_record(100, "dd");
        let err = cps.ensure_reorg_allowed(50).unwrap_err();
        assert!(err.is_fatal());
    }
}
