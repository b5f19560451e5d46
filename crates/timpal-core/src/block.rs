use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::TimpalError;
use crate::transaction::{Transaction, TxKind};
use crate::types::{Address, Balance, Timestamp};

/// One block of the TIMPAL chain. Height 0 is genesis.
///
/// `block_hash` is SHA-256 over the canonical JSON serialization (sorted
/// keys, compact) with the `block_hash` field removed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub height: u64,
    pub parent_hash: String,
    pub proposer: Address,
    pub timestamp: Timestamp,
    pub transactions: Vec<Transaction>,
    pub block_hash: String,
}

impl Block {
    pub fn new(
        height: u64,
        parent_hash: String,
        proposer: Address,
        timestamp: Timestamp,
        transactions: Vec<Transaction>,
    ) -> Result<Self, TimpalError> {
        let mut block = Self {
            height,
            parent_hash,
            proposer,
            timestamp,
            transactions,
            block_hash: String::new(),
        };
        block.block_hash = block.compute_hash()?;
        Ok(block)
    }

    /// Canonical hash: serialize, drop `block_hash`, SHA-256 the compact
    /// sorted-key JSON.
    pub fn compute_hash(&self) -> Result<String, TimpalError> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| TimpalError::Serialization(e.to_string()))?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("block_hash");
        }
        let canonical = serde_json::to_string(&value)
            .map_err(|e| TimpalError::Serialization(e.to_string()))?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    pub fn verify_hash(&self) -> Result<(), TimpalError> {
        if self.compute_hash()? != self.block_hash {
            return Err(TimpalError::BlockHashMismatch);
        }
        Ok(())
    }

    /// Sum of fees carried by the block's transfers.
    pub fn total_fees(&self) -> Balance {
        self.transactions
            .iter()
            .map(|tx| match tx.kind {
                TxKind::Transfer { fee, .. } => fee,
                _ => 0,
            })
            .sum()
    }

    /// The block's reward transaction, if present.
    pub fn reward_tx(&self) -> Option<&Transaction> {
        self.transactions
            .iter()
            .find(|tx| matches!(tx.kind, TxKind::Reward { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FEE;

    fn addr(tag: &str) -> Address {
        Address(format!("tmpl{:0<44}", tag))
    }

    fn block_with_txs(transactions: Vec<Transaction>) -> Block {
        Block::new(1, "00".repeat(32), addr("p"), 3.0, transactions).unwrap()
    }

    #[test]
    fn hash_covers_every_field_but_itself() {
        let b = block_with_txs(vec![]);
        b.verify_hash().unwrap();

        let mut tampered = b.clone();
        tampered.height = 2;
        assert_ne!(tampered.compute_hash().unwrap(), b.block_hash);

        // Mutating only block_hash must not change the canonical hash.
        let mut renamed = b.clone();
        renamed.block_hash = "f".repeat(64);
        assert_eq!(renamed.compute_hash().unwrap(), b.block_hash);
    }

    #[test]
    fn total_fees_counts_transfers_only() {
        let a = addr("a");
        let txs = vec![
            Transaction::new_transfer(a.clone(), addr("b"), 100, FEE, 1.0, 0, "ab".repeat(64)),
            Transaction::new_validator_heartbeat(a.clone(), 1.0),
            Transaction::new_transfer(a.clone(), addr("c"), 200, FEE, 2.0, 1, "ab".repeat(64)),
        ];
        assert_eq!(block_with_txs(txs).total_fees(), 2 * FEE);
    }
}
