//! timpal-ledger — the canonical state machine.
//!
//! All state mutation flows through [`Ledger::apply_block`], in strictly
//! increasing height order, on a single writer task. Fork choice is longest
//! valid chain with immovable finality checkpoints.

pub mod ledger;
pub mod state;

pub use ledger::{Ledger, GENESIS_PARENT_HASH};
pub use state::LedgerState;
