//! timpal-genesis — the founding document.
//!
//! Builds height 0 and the initial allocation, written into the ledger
//! without going through signed transactions (genesis has no signers). This
//! is the only place pals appear without a block reward; after genesis the
//! emission rule is the sole ex-nihilo path.

use serde::{Deserialize, Serialize};
use timpal_core::block::Block;
use timpal_core::error::TimpalError;
use timpal_core::types::{Address, Balance, Timestamp};
use timpal_ledger::{Ledger, GENESIS_PARENT_HASH};
use tracing::info;

/// The all-zeros address: the logical origin of genesis allocations and
/// block rewards. No key derives to it.
pub fn network_address() -> Address {
    Address(format!("tmpl{}", "0".repeat(44)))
}

/// One genesis balance grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisAllocation {
    pub address: Address,
    pub amount_pals: Balance,
}

/// Genesis parameters, normally loaded from a JSON file shared by every
/// node of the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisParams {
    /// Anchor for every absolute proposer window; also the genesis block's
    /// own timestamp.
    pub genesis_timestamp: Timestamp,
    pub allocations: Vec<GenesisAllocation>,
}

impl GenesisParams {
    pub fn from_json(json: &str) -> Result<Self, TimpalError> {
        let params: Self =
            serde_json::from_str(json).map_err(|e| TimpalError::Serialization(e.to_string()))?;
        for alloc in &params.allocations {
            if !Address::is_well_formed(alloc.address.as_str()) {
                return Err(TimpalError::InvalidAddress(alloc.address.to_string()));
            }
        }
        Ok(params)
    }

    pub fn total_allocation(&self) -> Balance {
        self.allocations.iter().map(|a| a.amount_pals).sum()
    }
}

/// Construct the canonical genesis block for `params`. Deterministic: every
/// node derives the identical block (and hash) from identical params.
pub fn build_genesis_block(params: &GenesisParams) -> Result<Block, TimpalError> {
    Block::new(
        0,
        GENESIS_PARENT_HASH.to_string(),
        network_address(),
        params.genesis_timestamp,
        vec![],
    )
}

/// Seed the allocation and apply the genesis block to an empty ledger.
pub fn apply_genesis(ledger: &mut Ledger, params: &GenesisParams) -> Result<Block, TimpalError> {
    let allocations: Vec<(Address, Balance)> = params
        .allocations
        .iter()
        .map(|a| (a.address.clone(), a.amount_pals))
        .collect();
    ledger.seed_genesis(&allocations)?;

    let genesis = build_genesis_block(params)?;
    ledger.apply_block(&genesis)?;
    info!(
        accounts = params.allocations.len(),
        total_pals = params.total_allocation(),
        "genesis applied"
    );
    Ok(genesis)
}
