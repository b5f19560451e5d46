//! timpal-p2p — authenticated peer messaging.
//!
//! Every inbound message must carry `{signature, public_key, timestamp,
//! nonce}` and is checked in a fixed order: ban list, field presence,
//! signature, timestamp bounds, nonce replay. Every outbound message is
//! stamped and signed by the same component. This layer is the trust
//! boundary through which everything external flows; the socket transport
//! underneath it is a separate collaborator.

pub mod auth;
pub mod message;

pub use auth::{PeerAuthenticator, SecurityStats};
pub use message::{canonical_json, sign_envelope, signing_digest, stamp_message, verify_envelope};
