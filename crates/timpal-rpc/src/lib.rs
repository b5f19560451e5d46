//! timpal-rpc — the node's HTTP surface.
//!
//! A thin axum layer: every handler talks to the single-writer node task
//! through [`NodeClient`] (an mpsc command channel with oneshot replies),
//! so no ledger or mempool state is ever shared across tasks. Internal
//! error details never cross the HTTP boundary.

pub mod client;
pub mod routes;
pub mod server;
pub mod types;

pub use client::{NodeClient, NodeCommand, SendFailure};
pub use server::{router, serve};
