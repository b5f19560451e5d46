//! timpal-mempool — bounded staging area for pending transactions.
//!
//! Only user transfers and validator registrations are admitted: heartbeats,
//! attestations and timeout messages ride their own transport paths and
//! would drown user transfers if queued here.

use std::collections::HashMap;
use timpal_core::constants::{BLOCK_TX_LIMIT, MAX_TOTAL_TX, MAX_TX_PER_ADDRESS};
use timpal_core::transaction::{Transaction, TxKind};
use timpal_core::types::{Address, Nonce, TxHash};
use tracing::debug;

/// In-memory pending-transaction pool with per-sender quotas and a derived
/// next-free-nonce table. The ledger owns confirmed nonces; the pool's
/// `pending_nonces` is always at least the ledger's value for a live sender.
pub struct Mempool {
    pending: HashMap<TxHash, Transaction>,
    tx_count_by_address: HashMap<Address, usize>,
    pending_nonces: HashMap<Address, Nonce>,
    max_tx_per_address: usize,
    max_total_tx: usize,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(MAX_TX_PER_ADDRESS, MAX_TOTAL_TX)
    }
}

impl Mempool {
    pub fn new(max_tx_per_address: usize, max_total_tx: usize) -> Self {
        Self {
            pending: HashMap::new(),
            tx_count_by_address: HashMap::new(),
            pending_nonces: HashMap::new(),
            max_tx_per_address,
            max_total_tx,
        }
    }

    /// Admission rule, all of which must hold:
    /// allowed type, unseen hash, pool not full, sender under quota.
    pub fn add_transaction(&mut self, tx: Transaction) -> bool {
        if !matches!(tx.kind, TxKind::Transfer { .. } | TxKind::ValidatorRegistration { .. }) {
            debug!(tx_type = tx.kind.tx_type(), "mempool rejected disallowed type");
            return false;
        }
        if self.pending.contains_key(&tx.tx_hash) {
            return false;
        }
        if self.pending.len() >= self.max_total_tx {
            return false;
        }
        let count = self.tx_count_by_address.get(&tx.sender).copied().unwrap_or(0);
        if count >= self.max_tx_per_address {
            return false;
        }

        let sender = tx.sender.clone();
        let next = self.pending_nonces.get(&sender).copied().unwrap_or(0);
        self.pending_nonces.insert(sender.clone(), next.max(tx.nonce + 1));
        self.tx_count_by_address.insert(sender, count + 1);
        self.pending.insert(tx.tx_hash.clone(), tx);
        true
    }

    /// Next free nonce for `address` considering pending transactions.
    pub fn get_pending_nonce(&self, address: &Address) -> Nonce {
        self.pending_nonces.get(address).copied().unwrap_or(0)
    }

    /// Pending-transaction count for a single sender.
    pub fn get_sender_pending_count(&self, address: &Address) -> usize {
        self.tx_count_by_address.get(address).copied().unwrap_or(0)
    }

    /// Pending transactions for the next block: transfers first (user money
    /// must never be starved by administrative traffic), then the rest; each
    /// category oldest-first; truncated to `limit`.
    pub fn get_pending_transactions(&self, limit: usize) -> Vec<Transaction> {
        let mut transfers: Vec<Transaction> = Vec::new();
        let mut others: Vec<Transaction> = Vec::new();
        for tx in self.pending.values() {
            if matches!(tx.kind, TxKind::Transfer { .. }) {
                transfers.push(tx.clone());
            } else {
                others.push(tx.clone());
            }
        }
        transfers.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        others.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        transfers.extend(others);
        transfers.truncate(limit);
        transfers
    }

    /// Pending transactions at the default proposer limit.
    pub fn pending_for_block(&self) -> Vec<Transaction> {
        self.get_pending_transactions(BLOCK_TX_LIMIT)
    }

    pub fn remove_transaction(&mut self, tx_hash: &TxHash) {
        if let Some(tx) = self.pending.remove(tx_hash) {
            let count = self
                .tx_count_by_address
                .get(&tx.sender)
                .copied()
                .unwrap_or(0)
                .saturating_sub(1);
            if count == 0 {
                self.tx_count_by_address.remove(&tx.sender);
                self.pending_nonces.remove(&tx.sender);
            } else {
                self.tx_count_by_address.insert(tx.sender.clone(), count);
            }
        }
    }

    pub fn remove_transactions(&mut self, tx_hashes: &[TxHash]) {
        for tx_hash in tx_hashes {
            self.remove_transaction(tx_hash);
        }
    }

    pub fn get_transaction(&self, tx_hash: &TxHash) -> Option<&Transaction> {
        self.pending.get(tx_hash)
    }

    pub fn size(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.tx_count_by_address.clear();
        self.pending_nonces.clear();
    }
}
