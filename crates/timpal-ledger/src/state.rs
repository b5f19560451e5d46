use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use timpal_consensus::ValidatorSet;
use timpal_core::types::{Address, Balance, Nonce};

/// Serializable snapshot of ledger state, written to `state.json` after
/// every applied block and consumed by the explorer export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerState {
    pub balances: HashMap<Address, Balance>,
    pub nonces: HashMap<Address, Nonce>,
    pub total_emitted_pals: u64,
    pub validator_set: Vec<Address>,
    pub validator_registry: ValidatorSet,
    pub finality_checkpoints: BTreeMap<u64, String>,
    #[serde(default)]
    pub attestations: BTreeMap<u64, BTreeSet<Address>>,
}
