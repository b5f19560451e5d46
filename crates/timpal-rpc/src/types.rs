use serde::{Deserialize, Serialize};
use timpal_core::block::Block;
use timpal_core::types::Address;

/// `POST /send` request: a convenience transfer built and signed from the
/// node's local wallet, authorized by PIN.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub sender: String,
    pub recipient: String,
    pub amount_tmpl: f64,
    pub pin: String,
}

/// Successful transaction submission.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub status: &'static str,
    pub tx_hash: String,
}

/// `GET /api/account/{address}` response.
#[derive(Debug, Clone, Serialize)]
pub struct AccountInfo {
    pub address: Address,
    pub balance: u64,
    pub nonce: u64,
    pub pending_nonce: u64,
    pub pending_count: usize,
}

/// `GET /api/blocks/range` response.
#[derive(Debug, Clone, Serialize)]
pub struct BlocksRange {
    pub blocks: Vec<Block>,
    pub latest_height: u64,
    pub count: usize,
}

/// `GET /api/health` response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthInfo {
    pub status: &'static str,
    pub height: u64,
    pub peers: usize,
    pub validator_count: usize,
}

/// Sanitized error body; the only shape errors ever take on the wire.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
