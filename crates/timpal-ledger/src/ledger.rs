use std::collections::{BTreeMap, BTreeSet, HashMap};

use timpal_consensus::{
    slots, verify_timeout_certificate, verify_timeout_vote, FinalityCheckpoints, TimeoutVotePool,
    ValidatorRecord, ValidatorSet,
};
use timpal_core::constants::{BLOCK_REWARD_PALS, BOOTSTRAP_BLOCKS, NUM_SUBSLOTS};
use timpal_core::error::TimpalError;
use timpal_core::transaction::{TimeoutVote, TxKind};
use timpal_core::types::{Address, Balance, Nonce, Timestamp};
use timpal_core::Block;
use timpal_crypto::verify_transaction;
use timpal_storage::ChainStore;
use tracing::{info, warn};

use crate::state::LedgerState;

/// Parent hash carried by the genesis block.
pub const GENESIS_PARENT_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Mutations staged while a block validates. Either the whole block commits
/// or none of it does.
struct Staged {
    balances: HashMap<Address, Balance>,
    nonces: HashMap<Address, Nonce>,
    validators: ValidatorSet,
    attestations: Vec<(u64, Address)>,
    timeout_votes: Vec<TimeoutVote>,
    fees: Balance,
    reward: Option<(Address, Balance)>,
}

/// The canonical chain state. Single writer: every mutation goes through
/// [`Ledger::apply_block`] (or the genesis seeding done once by the genesis
/// builder).
pub struct Ledger {
    genesis_timestamp: Timestamp,
    balances: HashMap<Address, Balance>,
    nonces: HashMap<Address, Nonce>,
    total_emitted_pals: u64,
    validators: ValidatorSet,
    attestations: BTreeMap<u64, BTreeSet<Address>>,
    timeout_pool: TimeoutVotePool,
    checkpoints: FinalityCheckpoints,
    blocks: Vec<Block>,
    store: Option<ChainStore>,
}

impl Ledger {
    pub fn new(genesis_timestamp: Timestamp, store: Option<ChainStore>) -> Self {
        Self {
            genesis_timestamp,
            balances: HashMap::new(),
            nonces: HashMap::new(),
            total_emitted_pals: 0,
            validators: ValidatorSet::new(),
            attestations: BTreeMap::new(),
            timeout_pool: TimeoutVotePool::new(),
            checkpoints: FinalityCheckpoints::new(),
            blocks: Vec::new(),
            store,
        }
    }

    /// Rebuild a ledger by replaying every persisted block. The replay runs
    /// the full validation path, so a store that passes integrity checks but
    /// holds an invalid chain still fails loudly here.
    pub fn restore(store: ChainStore) -> Result<Option<Self>, TimpalError> {
        let blocks = store.load_blocks()?;
        let genesis = match blocks.first() {
            Some(b) => b.clone(),
            None => return Ok(None),
        };

        let state: Option<LedgerState> = store.load_state()?;
        let mut ledger = Ledger::new(genesis.timestamp, Some(store));
        if let Some(state) = &state {
            // Genesis allocations are not carried by block transactions;
            // reconstruct them from the persisted snapshot before replay.
            ledger.seed_genesis_from_state(state, &blocks)?;
        }
        for block in &blocks {
            ledger.apply_block(block)?;
        }
        info!(height = ledger.height().unwrap_or(0), "ledger restored from storage");
        Ok(Some(ledger))
    }

    fn seed_genesis_from_state(
        &mut self,
        state: &LedgerState,
        blocks: &[Block],
    ) -> Result<(), TimpalError> {
        // Work the chain's effects backwards out of the snapshot: what is
        // left is the genesis allocation. Newest block first, or an
        // intermediate balance can dip below zero mid-unwind.
        let mut balances = state.balances.clone();
        let mut emitted = state.total_emitted_pals;
        for block in blocks.iter().rev() {
            for tx in block.transactions.iter().rev() {
                match &tx.kind {
                    TxKind::Transfer { recipient, amount, fee } => {
                        credit(&mut balances, &tx.sender, amount + fee)?;
                        debit(&mut balances, recipient, *amount)?;
                    }
                    TxKind::Reward { recipient, amount } => {
                        debit(&mut balances, recipient, *amount)?;
                        emitted = emitted.saturating_sub(BLOCK_REWARD_PALS);
                    }
                    _ => {}
                }
            }
        }
        self.balances = balances;
        self.total_emitted_pals = emitted;
        Ok(())
    }

    /// Seed the genesis allocation. Only legal on an empty chain; this is
    /// the one mutation that bypasses block application, performed exactly
    /// once by the genesis builder.
    pub fn seed_genesis(&mut self, allocations: &[(Address, Balance)]) -> Result<(), TimpalError> {
        if !self.blocks.is_empty() {
            return Err(TimpalError::Config("genesis may only be seeded on an empty chain".into()));
        }
        for (address, amount) in allocations {
            *self.balances.entry(address.clone()).or_insert(0) += amount;
            self.total_emitted_pals += amount;
        }
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub fn get_balance(&self, address: &Address) -> Balance {
        self.balances.get(address).copied().unwrap_or(0)
    }

    /// The next required nonce for `address` (confirmed transactions only).
    pub fn get_nonce(&self, address: &Address) -> Nonce {
        self.nonces.get(address).copied().unwrap_or(0)
    }

    pub fn balances(&self) -> &HashMap<Address, Balance> {
        &self.balances
    }

    pub fn nonces(&self) -> &HashMap<Address, Nonce> {
        &self.nonces
    }

    pub fn total_emitted_pals(&self) -> u64 {
        self.total_emitted_pals
    }

    pub fn latest_block(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn height(&self) -> Option<u64> {
        self.blocks.last().map(|b| b.height)
    }

    pub fn get_block_by_height(&self, height: u64) -> Option<&Block> {
        self.blocks.get(height as usize)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn genesis_timestamp(&self) -> Timestamp {
        self.genesis_timestamp
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }

    pub fn checkpoints(&self) -> &FinalityCheckpoints {
        &self.checkpoints
    }

    /// Proposer queue for the next height.
    pub fn ranked_proposers(&self, height: u64) -> Vec<Address> {
        self.validators.ranked_proposers(height)
    }

    /// Feed a gossip-delivered timeout vote into the quorum tracker.
    pub fn record_timeout_vote(&mut self, vote: TimeoutVote) -> u64 {
        self.timeout_pool.record_vote(vote, &self.validators)
    }

    pub fn snapshot(&self) -> LedgerState {
        LedgerState {
            balances: self.balances.clone(),
            nonces: self.nonces.clone(),
            total_emitted_pals: self.total_emitted_pals,
            validator_set: self.validators.addresses().cloned().collect(),
            validator_registry: self.validators.clone(),
            finality_checkpoints: self.checkpoints.as_map().clone(),
            attestations: self.attestations.clone(),
        }
    }

    // ── Block application ────────────────────────────────────────────────────

    /// Validate and apply one block. Rejects any block whose transactions
    /// are not all individually valid or whose combined effect would break
    /// an invariant; on rejection the ledger is unchanged.
    pub fn apply_block(&mut self, block: &Block) -> Result<(), TimpalError> {
        let expected = self.blocks.last().map(|b| b.height + 1).unwrap_or(0);
        if block.height != expected {
            return Err(TimpalError::HeightOutOfOrder { expected, got: block.height });
        }

        match self.blocks.last() {
            None => {
                if block.parent_hash != GENESIS_PARENT_HASH {
                    return Err(TimpalError::ParentHashMismatch { height: 0 });
                }
            }
            Some(parent) => {
                if block.parent_hash != parent.block_hash {
                    return Err(TimpalError::ParentHashMismatch { height: block.height });
                }
            }
        }

        block.verify_hash()?;

        if block.height > 0 && !self.validators.is_empty() {
            self.check_proposer_window(block)?;
        }

        let staged = self.stage_transactions(block)?;
        self.commit(block, staged)?;

        info!(
            height = block.height,
            txs = block.transactions.len(),
            proposer = %block.proposer,
            "applied block"
        );
        Ok(())
    }

    /// The proposer must hold one of the first `NUM_SUBSLOTS` ranks for the
    /// height, and the block timestamp must land inside that rank's window.
    /// Bootstrap heights use lenient genesis-anchored windows (open-ended
    /// past the start); steady state uses parent-anchored windows.
    fn check_proposer_window(&self, block: &Block) -> Result<(), TimpalError> {
        let ranked = self.validators.ranked_proposers(block.height);
        let rank = ranked
            .iter()
            .take(NUM_SUBSLOTS)
            .position(|a| *a == block.proposer)
            .ok_or_else(|| TimpalError::UnknownProposer(block.proposer.to_string()))?;

        let valid = if block.height < BOOTSTRAP_BLOCKS {
            let (window_start, _) =
                slots::window_bounds(self.genesis_timestamp, block.height, rank);
            block.timestamp >= window_start
        } else {
            let parent = self.blocks.last().expect("non-genesis block has a parent");
            slots::validate_block_window_relative(block.timestamp, parent.timestamp, rank)
        };
        if !valid {
            return Err(TimpalError::WindowViolation { slot: block.height, rank });
        }
        Ok(())
    }

    fn stage_transactions(&self, block: &Block) -> Result<Staged, TimpalError> {
        let mut staged = Staged {
            balances: self.balances.clone(),
            nonces: self.nonces.clone(),
            validators: self.validators.clone(),
            attestations: Vec::new(),
            timeout_votes: Vec::new(),
            fees: 0,
            reward: None,
        };

        for tx in &block.transactions {
            if !tx.hash_is_canonical() {
                return Err(TimpalError::InvalidTransaction(format!(
                    "non-canonical hash {}",
                    tx.tx_hash
                )));
            }
            match &tx.kind {
                TxKind::Transfer { recipient, amount, fee } => {
                    if !verify_transaction(tx) {
                        return Err(TimpalError::InvalidSignature);
                    }
                    if !tx.is_valid(&staged.balances, Some(&staged.nonces)) {
                        return Err(TimpalError::InvalidTransaction(tx.tx_hash.to_string()));
                    }
                    debit(&mut staged.balances, &tx.sender, amount + fee)?;
                    credit(&mut staged.balances, recipient, *amount)?;
                    staged.fees += fee;
                    *staged.nonces.entry(tx.sender.clone()).or_insert(0) += 1;
                }

                TxKind::ValidatorRegistration { device_id } => {
                    if !verify_transaction(tx) {
                        return Err(TimpalError::InvalidSignature);
                    }
                    if !tx.is_valid(&staged.balances, Some(&staged.nonces)) {
                        return Err(TimpalError::InvalidTransaction(tx.tx_hash.to_string()));
                    }
                    if staged.validators.device_id_in_use(device_id) {
                        return Err(TimpalError::DuplicateDeviceId(device_id.clone()));
                    }
                    staged.validators.add(ValidatorRecord {
                        address: tx.sender.clone(),
                        public_key: tx.public_key.clone().unwrap_or_default(),
                        device_id: device_id.clone(),
                        registered_at: tx.timestamp,
                        last_seen: Some(tx.timestamp),
                    });
                    *staged.nonces.entry(tx.sender.clone()).or_insert(0) += 1;
                }

                TxKind::ValidatorHeartbeat => {
                    if !staged.validators.is_validator(&tx.sender) {
                        return Err(TimpalError::InvalidTransaction(format!(
                            "heartbeat from unregistered validator {}",
                            tx.sender
                        )));
                    }
                    staged.validators.mark_seen(&tx.sender, tx.timestamp);
                }

                TxKind::EpochAttestation { epoch_number } => {
                    if !staged.validators.in_committee(&tx.sender, *epoch_number) {
                        return Err(TimpalError::NotInCommittee(
                            tx.sender.to_string(),
                            *epoch_number,
                        ));
                    }
                    staged.validators.mark_seen(&tx.sender, tx.timestamp);
                    staged.attestations.push((*epoch_number, tx.sender.clone()));
                }

                TxKind::TimeoutVote { timeout_vote_data } => {
                    if !tx.is_valid(&staged.balances, None) {
                        return Err(TimpalError::InvalidTransaction(tx.tx_hash.to_string()));
                    }
                    if !verify_timeout_vote(timeout_vote_data, &staged.validators) {
                        return Err(TimpalError::InvalidSignature);
                    }
                    staged.timeout_votes.push(timeout_vote_data.clone());
                }

                TxKind::TimeoutCertificate { timeout_cert_data } => {
                    if !tx.is_valid(&staged.balances, None) {
                        return Err(TimpalError::InvalidTransaction(tx.tx_hash.to_string()));
                    }
                    verify_timeout_certificate(timeout_cert_data, &staged.validators)?;
                }

                TxKind::Reward { recipient, amount } => {
                    if staged.reward.is_some() {
                        return Err(TimpalError::InvalidReward("more than one reward".into()));
                    }
                    if *recipient != block.proposer {
                        return Err(TimpalError::InvalidReward(format!(
                            "reward recipient {recipient} is not the proposer"
                        )));
                    }
                    staged.reward = Some((recipient.clone(), *amount));
                }
            }
        }

        // Emission rule: every non-genesis block carries exactly one reward
        // of BLOCK_REWARD_PALS plus the fees it collected.
        if block.height > 0 {
            let expected_amount = BLOCK_REWARD_PALS + staged.fees;
            match &staged.reward {
                None => return Err(TimpalError::InvalidReward("missing reward".into())),
                Some((_, amount)) if *amount != expected_amount => {
                    return Err(TimpalError::InvalidReward(format!(
                        "expected {expected_amount}, got {amount}"
                    )));
                }
                Some(_) => {}
            }
        } else if staged.reward.is_some() {
            return Err(TimpalError::InvalidReward("genesis emits nothing".into()));
        }

        Ok(staged)
    }

    fn commit(&mut self, block: &Block, staged: Staged) -> Result<(), TimpalError> {
        let mut balances = staged.balances;
        if let Some((recipient, amount)) = &staged.reward {
            credit(&mut balances, recipient, *amount)?;
            self.total_emitted_pals += BLOCK_REWARD_PALS;
        }

        self.balances = balances;
        self.nonces = staged.nonces;
        self.validators = staged.validators;
        for (epoch, attester) in staged.attestations {
            self.attestations.entry(epoch).or_default().insert(attester);
        }
        for vote in staged.timeout_votes {
            self.timeout_pool.record_vote(vote, &self.validators);
        }

        self.checkpoints.maybe_record(block.height, &block.block_hash);
        self.blocks.push(block.clone());

        if let Some(store) = &self.store {
            store.save_new_block(block)?;
            store.save_state(&self.snapshot())?;
        }
        Ok(())
    }

    // ── Fork choice ──────────────────────────────────────────────────────────

    /// Longest-valid-chain fork choice. Adopts `candidate` when it is
    /// strictly longer than the current chain and replays cleanly from
    /// genesis; a fork below the last finality checkpoint is fatal. Returns
    /// whether the candidate was adopted.
    pub fn consider_chain(&mut self, candidate: &[Block]) -> Result<bool, TimpalError> {
        let candidate_tip = match candidate.last() {
            Some(b) => b.height,
            None => return Ok(false),
        };
        if self.height().map(|h| candidate_tip <= h).unwrap_or(false) {
            return Ok(false);
        }

        // First divergent height; a pure extension forks past our tip.
        let fork_height = self
            .blocks
            .iter()
            .zip(candidate.iter())
            .position(|(ours, theirs)| ours.block_hash != theirs.block_hash)
            .map(|i| i as u64)
            .unwrap_or(self.blocks.len() as u64);

        if (fork_height as usize) < self.blocks.len() {
            // Dropping our blocks at fork_height..; fatal if any is frozen.
            self.checkpoints.ensure_reorg_allowed(fork_height)?;
        }

        // Replay the candidate from scratch with full validation.
        let mut replacement = Ledger::new(
            candidate.first().map(|b| b.timestamp).unwrap_or(self.genesis_timestamp),
            None,
        );
        replacement.balances = self.genesis_allocation()?;
        replacement.total_emitted_pals = replacement.balances.values().sum();
        for block in candidate {
            if let Err(e) = replacement.apply_block(block) {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(height = block.height, error = %e, "rejecting invalid candidate chain");
                return Ok(false);
            }
        }

        info!(
            old_height = self.height().unwrap_or(0),
            new_height = candidate_tip,
            fork_height,
            "adopting longer chain"
        );

        self.genesis_timestamp = replacement.genesis_timestamp;
        self.balances = replacement.balances;
        self.nonces = replacement.nonces;
        self.total_emitted_pals = replacement.total_emitted_pals;
        self.validators = replacement.validators;
        self.attestations = replacement.attestations;
        self.checkpoints = replacement.checkpoints;
        self.blocks = replacement.blocks;

        if let Some(store) = &self.store {
            for block in &self.blocks {
                store.save_new_block(block)?;
            }
            store.save_state(&self.snapshot())?;
        }
        Ok(true)
    }

    /// The genesis allocation implied by the current chain: the genesis
    /// balances before any block effects (used to replay candidates).
    fn genesis_allocation(&self) -> Result<HashMap<Address, Balance>, TimpalError> {
        let mut balances = self.balances.clone();
        for block in self.blocks.iter().rev() {
            for tx in block.transactions.iter().rev() {
                match &tx.kind {
                    TxKind::Transfer { recipient, amount, fee } => {
                        credit(&mut balances, &tx.sender, amount + fee)?;
                        debit(&mut balances, recipient, *amount)?;
                    }
                    TxKind::Reward { recipient, amount } => {
                        debit(&mut balances, recipient, *amount)?;
                    }
                    _ => {}
                }
            }
        }
        balances.retain(|_, v| *v > 0);
        Ok(balances)
    }
}

fn credit(
    balances: &mut HashMap<Address, Balance>,
    address: &Address,
    amount: Balance,
) -> Result<(), TimpalError> {
    let entry = balances.entry(address.clone()).or_insert(0);
    *entry = entry
        .checked_add(amount)
        .ok_or_else(|| TimpalError::InvalidTransaction("balance overflow".into()))?;
    Ok(())
}

fn debit(
    balances: &mut HashMap<Address, Balance>,
    address: &Address,
    amount: Balance,
) -> Result<(), TimpalError> {
    let have = balances.get(address).copied().unwrap_or(0);
    let remaining = have
        .checked_sub(amount)
        .ok_or(TimpalError::InsufficientBalance { need: amount, have })?;
    balances.insert(address.clone(), remaining);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use timpal_core::constants::FEE;
    use timpal_core::transaction::Transaction;
    use timpal_core::types::TxHash;
    use timpal_crypto::{sign_transaction, KeyPair};

    fn network() -> Address {
        Address(format!("tmpl{}", "0".repeat(44)))
    }

    fn signed_transfer(kp: &KeyPair, recipient: &Address, amount: u64, nonce: u64, ts: f64) -> Transaction {
        let mut tx = Transaction::new_transfer(
            kp.address.clone(),
            recipient.clone(),
            amount,
            FEE,
            ts,
            nonce,
            kp.public_key_hex.clone(),
        );
        sign_transaction(&mut tx, kp).unwrap();
        tx
    }

    fn signed_registration(kp: &KeyPair, device_id: &str, nonce: u64, ts: f64) -> Transaction {
        let mut tx = Transaction::new_validator_registration(
            kp.address.clone(),
            kp.public_key_hex.clone(),
            device_id.to_string(),
            ts,
            nonce,
        );
        sign_transaction(&mut tx, kp).unwrap();
        tx
    }

    fn reward(proposer: &Address, fees: u64, ts: f64) -> Transaction {
        Transaction::new_reward(network(), proposer.clone(), BLOCK_REWARD_PALS + fees, ts)
    }

    /// Ledger with an applied genesis block and the given allocations.
    fn ledger_with_genesis(allocations: &[(Address, u64)]) -> Ledger {
        let mut ledger = Ledger::new(0.0, None);
        ledger.seed_genesis(allocations).unwrap();
        let genesis =
            Block::new(0, GENESIS_PARENT_HASH.to_string(), network(), 0.0, vec![]).unwrap();
        ledger.apply_block(&genesis).unwrap();
        ledger
    }

    fn extend(ledger: &mut Ledger, mut txs: Vec<Transaction>, proposer: &Address, ts: f64) -> Result<(), TimpalError> {
        let fees: u64 = txs
            .iter()
            .map(|t| match t.kind {
                TxKind::Transfer { fee, .. } => fee,
                _ => 0,
            })
            .sum();
        txs.push(reward(proposer, fees, ts));
        let parent = ledger.latest_block().unwrap();
        let block = Block::new(
            parent.height + 1,
            parent.block_hash.clone(),
            proposer.clone(),
            ts,
            txs,
        )
        .unwrap();
        ledger.apply_block(&block)
    }

    #[test]
    fn transfer_applies_and_replays_are_invalid() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let mut ledger = ledger_with_genesis(&[(a.address.clone(), 100_000)]);

        let tx = signed_transfer(&a, &b.address, 50_000, 0, 3.0);
        extend(&mut ledger, vec![tx.clone()], &network(), 3.0).unwrap();

        assert_eq!(ledger.get_balance(&a.address), 0);
        assert_eq!(ledger.get_balance(&b.address), 50_000);
        assert_eq!(ledger.get_nonce(&a.address), 1);

        // The identical nonce-0 transfer is now invalid.
        let err = extend(&mut ledger, vec![tx], &network(), 6.0).unwrap_err();
        assert!(matches!(err, TimpalError::InvalidTransaction(_)));
        assert_eq!(ledger.get_nonce(&a.address), 1);
    }

    #[test]
    fn balances_never_go_negative() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let mut ledger = ledger_with_genesis(&[(a.address.clone(), 60_000)]);

        // amount + fee exceeds the balance.
        let tx = signed_transfer(&a, &b.address, 50_000, 0, 3.0);
        let err = extend(&mut ledger, vec![tx], &network(), 3.0).unwrap_err();
        assert!(matches!(err, TimpalError::InvalidTransaction(_)));
        assert_eq!(ledger.get_balance(&a.address), 60_000);
    }

    #[test]
    fn emission_grows_by_block_reward_only() {
        let a = KeyPair::generate();
        let mut ledger = ledger_with_genesis(&[(a.address.clone(), 1_000_000)]);
        let genesis_emitted = ledger.total_emitted_pals();

        extend(&mut ledger, vec![], &network(), 3.0).unwrap();
        extend(&mut ledger, vec![], &network(), 6.0).unwrap();
        assert_eq!(ledger.total_emitted_pals(), genesis_emitted + 2 * BLOCK_REWARD_PALS);
    }

    #[test]
    fn wrong_reward_amount_rejected() {
        let mut ledger = ledger_with_genesis(&[]);
        let parent = ledger.latest_block().unwrap().clone();
        let bad = Block::new(
            1,
            parent.block_hash,
            network(),
            3.0,
            vec![Transaction::new_reward(network(), network(), BLOCK_REWARD_PALS + 1, 3.0)],
        )
        .unwrap();
        assert!(matches!(ledger.apply_block(&bad), Err(TimpalError::InvalidReward(_))));

        let missing = Block::new(
            1,
            ledger.latest_block().unwrap().block_hash.clone(),
            network(),
            3.0,
            vec![],
        )
        .unwrap();
        assert!(matches!(ledger.apply_block(&missing), Err(TimpalError::InvalidReward(_))));
    }

    #[test]
    fn duplicate_device_id_rejected() {
        let v1 = KeyPair::generate();
        let v2 = KeyPair::generate();
        let device = "a1".repeat(32);
        let mut ledger = ledger_with_genesis(&[]);

        extend(&mut ledger, vec![signed_registration(&v1, &device, 0, 3.0)], &network(), 3.0)
            .unwrap();
        assert_eq!(ledger.validator_count(), 1);

        // Second registration re-using the device id, proposed by the now
        // registered validator inside its bootstrap window.
        let txs = vec![signed_registration(&v2, &device, 0, 6.5)];
        let err = extend(&mut ledger, txs, &v1.address.clone(), 6.5).unwrap_err();
        assert!(matches!(err, TimpalError::DuplicateDeviceId(_)));
        assert_eq!(ledger.validator_count(), 1);
    }

    #[test]
    fn bootstrap_window_accepts_late_blocks_but_not_early() {
        let v = KeyPair::generate();
        let mut ledger = ledger_with_genesis(&[]);
        extend(&mut ledger, vec![signed_registration(&v, &"b2".repeat(32), 0, 3.0)], &network(), 3.0)
            .unwrap();

        // Height 2, rank 0 window starts at 6.0. Early is rejected even in
        // bootstrap; late is fine.
        let err = extend(&mut ledger, vec![], &v.address.clone(), 5.0).unwrap_err();
        assert!(matches!(err, TimpalError::WindowViolation { slot: 2, rank: 0 }));
        extend(&mut ledger, vec![], &v.address.clone(), 99.0).unwrap();
    }

    #[test]
    fn non_canonical_tx_hash_rejected() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let mut ledger = ledger_with_genesis(&[(a.address.clone(), 1_000_000)]);

        let mut tx = signed_transfer(&a, &b.address, 10_000, 0, 3.0);
        tx.tx_hash = TxHash("f".repeat(64));
        let err = extend(&mut ledger, vec![tx], &network(), 3.0).unwrap_err();
        assert!(matches!(err, TimpalError::InvalidTransaction(_)));
    }

    #[test]
    fn heartbeat_requires_registration() {
        let v = KeyPair::generate();
        let mut ledger = ledger_with_genesis(&[]);
        let hb = Transaction::new_validator_heartbeat(v.address.clone(), 3.0);
        let err = extend(&mut ledger, vec![hb], &network(), 3.0).unwrap_err();
        assert!(matches!(err, TimpalError::InvalidTransaction(_)));
    }

    #[test]
    fn longer_chain_is_adopted() {
        let mut ledger = ledger_with_genesis(&[]);
        extend(&mut ledger, vec![], &network(), 3.5).unwrap();
        assert_eq!(ledger.height(), Some(1));
        let genesis = ledger.get_block_by_height(0).unwrap().clone();

        // A competing chain from the same genesis, one block longer.
        let mut other = Ledger::new(0.0, None);
        other.apply_block(&genesis).unwrap();
        extend(&mut other, vec![], &network(), 3.0).unwrap();
        extend(&mut other, vec![], &network(), 6.0).unwrap();
        let candidate = other.blocks().to_vec();

        assert!(ledger.consider_chain(&candidate).unwrap());
        assert_eq!(ledger.height(), Some(2));

        // A shorter chain is never adopted.
        assert!(!ledger.consider_chain(&candidate[..2].to_vec()).unwrap());
    }

    #[test]
    fn reorg_below_checkpoint_is_fatal() {
        let mut ledger = ledger_with_genesis(&[]);
        extend(&mut ledger, vec![], &network(), 3.0).unwrap();
        extend(&mut ledger, vec![], &network(), 6.0).unwrap();
        // Pin height 1 as finalized.
        ledger.checkpoints =
            FinalityCheckpoints::from_map(BTreeMap::from([(1, ledger.blocks[1].block_hash.clone())]));

        // Candidate diverging at height 1, below the checkpoint.
        let genesis = ledger.get_block_by_height(0).unwrap().clone();
        let mut other = Ledger::new(0.0, None);
        other.apply_block(&genesis).unwrap();
        extend(&mut other, vec![], &network(), 3.7).unwrap();
        extend(&mut other, vec![], &network(), 6.7).unwrap();
        extend(&mut other, vec![], &network(), 9.7).unwrap();

        let err = ledger.consider_chain(&other.blocks().to_vec()).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(ledger.height(), Some(2));
    }

    #[test]
    fn restore_replays_persisted_chain() {
        let dir = std::env::temp_dir().join("timpal_ledger_restore_test");
        let _ = std::fs::remove_dir_all(&dir);

        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let mut ledger = Ledger::new(0.0, Some(ChainStore::open(&dir).unwrap()));
        ledger.seed_genesis(&[(a.address.clone(), 200_000)]).unwrap();
        let genesis =
            Block::new(0, GENESIS_PARENT_HASH.to_string(), network(), 0.0, vec![]).unwrap();
        ledger.apply_block(&genesis).unwrap();
        extend(
            &mut ledger,
            vec![signed_transfer(&a, &b.address, 50_000, 0, 3.0)],
            &network(),
            3.0,
        )
        .unwrap();
        let balances_before = ledger.balances().clone();
        let emitted_before = ledger.total_emitted_pals();
        drop(ledger);

        let restored = Ledger::restore(ChainStore::open(&dir).unwrap()).unwrap().unwrap();
        assert_eq!(restored.height(), Some(1));
        assert_eq!(restored.balances(), &balances_before);
        assert_eq!(restored.total_emitted_pals(), emitted_before);
        assert_eq!(restored.get_nonce(&a.address), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn attestation_requires_committee_membership() {
        let v = KeyPair::generate();
        let outsider = KeyPair::generate();
        let mut ledger = ledger_with_genesis(&[]);
        extend(&mut ledger, vec![signed_registration(&v, &"c3".repeat(32), 0, 3.0)], &network(), 3.0)
            .unwrap();

        // The only registered validator is always in the committee.
        let att = Transaction::new_epoch_attestation(v.address.clone(), 0, 6.5);
        extend(&mut ledger, vec![att], &v.address.clone(), 6.5).unwrap();

        let bad = Transaction::new_epoch_attestation(outsider.address.clone(), 0, 9.5);
        let err = extend(&mut ledger, vec![bad], &v.address.clone(), 9.5).unwrap_err();
        assert!(matches!(err, TimpalError::NotInCommittee(_, 0)));
    }
}
