//! timpal-core — shared types, constants and errors for the TIMPAL protocol.
//!
//! Everything on the wire or in persistent state is defined here:
//! [`types::Address`], [`transaction::Transaction`], [`block::Block`], the
//! protocol constants, and the [`error::TimpalError`] taxonomy.

pub mod block;
pub mod constants;
pub mod error;
pub mod transaction;
pub mod types;

pub use block::Block;
pub use error::TimpalError;
pub use transaction::{TimeoutCertificate, TimeoutVote, Transaction, TxKind};
pub use types::{Address, Balance, Nonce, Timestamp, TxHash};
