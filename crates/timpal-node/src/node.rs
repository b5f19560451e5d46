//! The node task: single writer over ledger, mempool and wallet.
//!
//! Everything external reaches this task through channels: HTTP handlers
//! via [`NodeCommand`], the peer transport via the authenticated inbound
//! queue. The proposer loop runs on a timer inside the same task, so block
//! application is serialized by construction.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use timpal_consensus::slots;
use timpal_core::constants::{
    BLOCK_REWARD_PALS, BOOTSTRAP_BLOCKS, CLOCK_DRIFT_TOLERANCE, FEE, NUM_SUBSLOTS, WINDOW_SECONDS,
};
use timpal_core::transaction::{TimeoutVote, Transaction, TxKind};
use timpal_core::types::{unix_now, Address, TxHash};
use timpal_core::{Block, TimpalError};
use timpal_crypto::{sign_transaction, verify_transaction, KeyPair};
use timpal_genesis::network_address;
use timpal_ledger::Ledger;
use timpal_mempool::Mempool;
use timpal_p2p::{sign_envelope, stamp_message, PeerAuthenticator};
use timpal_rpc::types::{AccountInfo, BlocksRange, HealthInfo};
use timpal_rpc::{NodeCommand, SendFailure};
use timpal_wallet::SeedVault;

pub struct NodeTask {
    ledger: Ledger,
    mempool: Mempool,
    vault: SeedVault,
    authenticator: PeerAuthenticator,
    keypair: KeyPair,
    commands: mpsc::Receiver<NodeCommand>,
    inbound: mpsc::Receiver<(String, Value)>,
    outbound: mpsc::Sender<Value>,
    last_proposed: Option<u64>,
}

impl NodeTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Ledger,
        mempool: Mempool,
        vault: SeedVault,
        keypair: KeyPair,
        commands: mpsc::Receiver<NodeCommand>,
        inbound: mpsc::Receiver<(String, Value)>,
        outbound: mpsc::Sender<Value>,
    ) -> Self {
        Self {
            ledger,
            mempool,
            vault,
            authenticator: PeerAuthenticator::new(),
            keypair,
            commands,
            inbound,
            outbound,
            last_proposed: None,
        }
    }

    /// Drive the node until a fatal protocol error. Consistency and
    /// protocol errors propagate out of here; validation and
    /// authentication failures never do.
    pub async fn run(mut self) -> Result<(), TimpalError> {
        self.ensure_registration();
        let mut tick = tokio::time::interval(Duration::from_millis(250));
        loop {
            tokio::select! {
                Some(cmd) = self.commands.recv() => self.handle_command(cmd),
                Some((peer, msg)) = self.inbound.recv() => self.handle_inbound(peer, msg)?,
                _ = tick.tick() => self.maybe_propose()?,
            }
        }
    }

    /// Queue our own validator registration if we are not yet on chain.
    /// The device id is the wallet address (the accepted legacy shape).
    fn ensure_registration(&mut self) {
        let me = self.keypair.address.clone();
        if self.ledger.validators().is_validator(&me) {
            return;
        }
        let nonce = self.next_nonce(&me);
        let mut tx = Transaction::new_validator_registration(
            me.clone(),
            self.keypair.public_key_hex.clone(),
            me.to_string(),
            unix_now(),
            nonce,
        );
        if sign_transaction(&mut tx, &self.keypair).is_ok() && self.mempool.add_transaction(tx) {
            info!(address = %me, "validator registration queued");
        }
    }

    fn next_nonce(&self, address: &Address) -> u64 {
        self.ledger
            .get_nonce(address)
            .max(self.mempool.get_pending_nonce(address))
    }

    // ── Commands from the HTTP surface ───────────────────────────────────────

    fn handle_command(&mut self, cmd: NodeCommand) {
        match cmd {
            NodeCommand::SubmitTransaction { tx, reply } => {
                let _ = reply.send(self.submit(*tx));
            }
            NodeCommand::SendTransfer { sender, recipient, amount_pals, pin, reply } => {
                let _ = reply.send(self.send_transfer(sender, recipient, amount_pals, &pin));
            }
            NodeCommand::AccountInfo { address, reply } => {
                let info = AccountInfo {
                    balance: self.ledger.get_balance(&address),
                    nonce: self.ledger.get_nonce(&address),
                    pending_nonce: self.next_nonce(&address),
                    pending_count: self.mempool.get_sender_pending_count(&address),
                    address,
                };
                let _ = reply.send(info);
            }
            NodeCommand::BlocksRange { start, end, reply } => {
                let latest_height = self.ledger.height().unwrap_or(0);
                let end = end.min(latest_height);
                let blocks: Vec<Block> = (start..=end)
                    .filter_map(|h| self.ledger.get_block_by_height(h).cloned())
                    .collect();
                let count = blocks.len();
                let _ = reply.send(BlocksRange { blocks, latest_height, count });
            }
            NodeCommand::Health { reply } => {
                let _ = reply.send(HealthInfo {
                    status: "healthy",
                    height: self.ledger.height().unwrap_or(0),
                    peers: self.authenticator.security_stats().tracked_peers,
                    validator_count: self.ledger.validator_count(),
                });
            }
        }
    }

    /// Admission path shared by HTTP and gossip: canonical hash, signature,
    /// validity against confirmed + pending state, then the mempool's own
    /// quota rules.
    fn submit(&mut self, tx: Transaction) -> Result<TxHash, String> {
        if !tx.hash_is_canonical() {
            return Err("transaction hash is not canonical".into());
        }
        match tx.kind {
            TxKind::Transfer { .. } | TxKind::ValidatorRegistration { .. } => {
                if !verify_transaction(&tx) {
                    return Err("signature verification failed".into());
                }
            }
            _ => return Err("transaction type not accepted for submission".into()),
        }

        let mut expected = HashMap::new();
        expected.insert(tx.sender.clone(), self.next_nonce(&tx.sender));
        if !tx.is_valid(self.ledger.balances(), Some(&expected)) {
            return Err("transaction failed validity checks".into());
        }

        let tx_hash = tx.tx_hash.clone();
        if !self.mempool.add_transaction(tx) {
            return Err("mempool rejected transaction".into());
        }
        Ok(tx_hash)
    }

    fn send_transfer(
        &mut self,
        sender: Address,
        recipient: Address,
        amount_pals: u64,
        pin: &str,
    ) -> Result<TxHash, SendFailure> {
        if self.vault.authorize_transfer(pin).is_err() {
            return Err(SendFailure::WrongPin);
        }
        let (wallet_address, public_key, keypair) = {
            let account = self.vault.get_account(0).map_err(|_| SendFailure::Rejected)?;
            let keypair = account.keypair().map_err(|_| SendFailure::Rejected)?;
            (account.address.clone(), account.public_key.clone(), keypair)
        };
        if wallet_address != sender {
            return Err(SendFailure::WalletMismatch);
        }
        if self.ledger.get_balance(&sender) < amount_pals + FEE {
            return Err(SendFailure::InsufficientBalance);
        }

        let nonce = self.next_nonce(&sender);
        let mut tx = Transaction::new_transfer(
            sender,
            recipient,
            amount_pals,
            FEE,
            unix_now(),
            nonce,
            public_key,
        );
        sign_transaction(&mut tx, &keypair).map_err(|_| SendFailure::Rejected)?;
        self.submit(tx).map_err(|_| SendFailure::Rejected)
    }

    // ── Authenticated gossip ─────────────────────────────────────────────────

    fn handle_inbound(&mut self, peer: String, message: Value) -> Result<(), TimpalError> {
        if let Err(e) = self.authenticator.validate_message_auth(&message, &peer, unix_now()) {
            debug!(peer = %peer, error = %e, "dropping unauthenticated message");
            return Ok(());
        }
        self.authenticator.record_verified_message(&message, &peer);

        match message.get("type").and_then(Value::as_str) {
            Some("transaction") => {
                match serde_json::from_value::<Transaction>(message["transaction"].clone()) {
                    Ok(tx) => {
                        if let Err(reason) = self.submit(tx) {
                            debug!(peer = %peer, reason = %reason, "gossip transaction rejected");
                        }
                    }
                    Err(e) => debug!(peer = %peer, error = %e, "undecodable gossip transaction"),
                }
            }
            Some("block") => {
                if let Ok(block) = serde_json::from_value::<Block>(message["block"].clone()) {
                    self.apply_network_block(&block)?;
                }
            }
            Some("chain") => {
                if let Ok(blocks) = serde_json::from_value::<Vec<Block>>(message["blocks"].clone())
                {
                    match self.ledger.consider_chain(&blocks) {
                        Ok(true) => self.prune_mempool(),
                        Ok(false) => {}
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => warn!(error = %e, "candidate chain rejected"),
                    }
                }
            }
            Some("timeout_vote") => {
                if let Ok(vote) = serde_json::from_value::<TimeoutVote>(message["vote"].clone()) {
                    self.ledger.record_timeout_vote(vote);
                }
            }
            other => debug!(peer = %peer, msg_type = ?other, "ignoring message type"),
        }
        Ok(())
    }

    fn apply_network_block(&mut self, block: &Block) -> Result<(), TimpalError> {
        match self.ledger.apply_block(block) {
            Ok(()) => {
                let hashes: Vec<_> =
                    block.transactions.iter().map(|t| t.tx_hash.clone()).collect();
                self.mempool.remove_transactions(&hashes);
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!(height = block.height, error = %e, "network block not applied");
                Ok(())
            }
        }
    }

    /// Drop pending transactions the (possibly reorganized) chain has made
    /// invalid or already confirmed.
    fn prune_mempool(&mut self) {
        let stale: Vec<TxHash> = self
            .mempool
            .get_pending_transactions(usize::MAX)
            .into_iter()
            .filter(|tx| tx.nonce < self.ledger.get_nonce(&tx.sender))
            .map(|tx| tx.tx_hash)
            .collect();
        self.mempool.remove_transactions(&stale);
    }

    // ── Proposer loop ────────────────────────────────────────────────────────

    fn maybe_propose(&mut self) -> Result<(), TimpalError> {
        let parent = match self.ledger.latest_block() {
            Some(b) => b.clone(),
            None => return Ok(()), // no genesis yet
        };
        let next = parent.height + 1;
        if self.last_proposed == Some(next) {
            return Ok(());
        }

        let now = unix_now();
        let genesis_ts = self.ledger.genesis_timestamp();
        let me = self.keypair.address.clone();

        let decision = if self.ledger.validators().is_empty() {
            // Cold start: nobody is registered yet, so there is no queue to
            // rank. Produce on the slot cadence to carry registrations in.
            let (window_start, _) = slots::window_bounds(genesis_ts, next, 0);
            (now >= window_start).then_some(now)
        } else {
            let ranked = self.ledger.ranked_proposers(next);
            if next < BOOTSTRAP_BLOCKS {
                let (turn, _) =
                    slots::am_i_proposer_now(&me, &ranked, genesis_ts, next, now, true);
                turn.then_some(now)
            } else {
                match ranked.iter().take(NUM_SUBSLOTS).position(|a| *a == me) {
                    None => None,
                    Some(rank) => {
                        let (start, end) = slots::relative_window_bounds(parent.timestamp, rank);
                        if now < start {
                            None
                        } else if now < end + CLOCK_DRIFT_TOLERANCE {
                            Some(now.max(start))
                        } else {
                            // Behind schedule: stamp mid-window so the block
                            // stays valid and the chain catches up slot by
                            // slot.
                            Some(start + WINDOW_SECONDS / 2.0)
                        }
                    }
                }
            }
        };
        let block_ts = match decision {
            Some(ts) => ts,
            None => return Ok(()),
        };

        let (mut txs, fees) = self.collect_block_transactions();
        txs.push(Transaction::new_reward(
            network_address(),
            me.clone(),
            BLOCK_REWARD_PALS + fees,
            block_ts,
        ));

        let block = Block::new(next, parent.block_hash.clone(), me, block_ts, txs)?;
        match self.ledger.apply_block(&block) {
            Ok(()) => {
                let hashes: Vec<_> =
                    block.transactions.iter().map(|t| t.tx_hash.clone()).collect();
                self.mempool.remove_transactions(&hashes);
                self.last_proposed = Some(next);
                self.broadcast_block(&block);
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(height = next, error = %e, "own candidate block rejected");
                Ok(())
            }
        }
    }

    /// Pull pending transactions that remain valid when applied in order
    /// against the current confirmed state.
    fn collect_block_transactions(&mut self) -> (Vec<Transaction>, u64) {
        let mut balances = self.ledger.balances().clone();
        let mut nonces = self.ledger.nonces().clone();
        let mut seen_devices: Vec<String> = Vec::new();
        let mut included = Vec::new();
        let mut fees = 0u64;

        for tx in self.mempool.pending_for_block() {
            if !verify_transaction(&tx) || !tx.is_valid(&balances, Some(&nonces)) {
                continue;
            }
            match &tx.kind {
                TxKind::Transfer { recipient, amount, fee } => {
                    let debit = amount + fee;
                    let entry = balances.entry(tx.sender.clone()).or_insert(0);
                    *entry = entry.saturating_sub(debit);
                    *balances.entry(recipient.clone()).or_insert(0) += amount;
                    *nonces.entry(tx.sender.clone()).or_insert(0) += 1;
                    fees += fee;
                }
                TxKind::ValidatorRegistration { device_id } => {
                    if self.ledger.validators().device_id_in_use(device_id)
                        || seen_devices.contains(device_id)
                    {
                        continue;
                    }
                    seen_devices.push(device_id.clone());
                    *nonces.entry(tx.sender.clone()).or_insert(0) += 1;
                }
                _ => continue,
            }
            included.push(tx);
        }
        (included, fees)
    }

    fn broadcast_block(&mut self, block: &Block) {
        let block_value = match serde_json::to_value(block) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "block serialization for broadcast failed");
                return;
            }
        };
        let mut envelope = stamp_message("block", serde_json::json!({ "block": block_value }));
        sign_envelope(&mut envelope, &self.keypair);
        if self.outbound.try_send(envelope).is_err() {
            debug!(height = block.height, "outbound queue full, dropping broadcast");
        }
    }
}
