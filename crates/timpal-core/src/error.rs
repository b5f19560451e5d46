use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimpalError {
    // ── Validation errors ────────────────────────────────────────────────────
    #[error("insufficient balance: need {need} pals, have {have}")]
    InsufficientBalance { need: u64, have: u64 },

    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("transaction type not allowed here: {0}")]
    DisallowedTxType(String),

    #[error("malformed address: {0}")]
    InvalidAddress(String),

    #[error("duplicate device id: {0}")]
    DuplicateDeviceId(String),

    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(String),

    // ── Block errors ─────────────────────────────────────────────────────────
    #[error("block height out of order: expected {expected}, got {got}")]
    HeightOutOfOrder { expected: u64, got: u64 },

    #[error("parent hash mismatch at height {height}")]
    ParentHashMismatch { height: u64 },

    #[error("block hash does not match canonical serialization")]
    BlockHashMismatch,

    #[error("block timestamp outside proposer window (slot {slot}, rank {rank})")]
    WindowViolation { slot: u64, rank: usize },

    #[error("unknown proposer: {0}")]
    UnknownProposer(String),

    #[error("invalid block reward: {0}")]
    InvalidReward(String),

    #[error("timeout certificate below quorum: power {power} of {total}")]
    QuorumNotReached { power: u64, total: u64 },

    #[error("attester {0} is not in the committee for epoch {1}")]
    NotInCommittee(String, u64),

    // ── Authentication errors ────────────────────────────────────────────────
    #[error("peer {0} is banned")]
    PeerBanned(String),

    #[error("message missing required auth fields: {0}")]
    MissingAuthFields(String),

    #[error("message authentication failed: {0}")]
    AuthFailure(String),

    #[error("message timestamp outside acceptance bounds ({age:.0}s)")]
    StaleTimestamp { age: f64 },

    #[error("duplicate nonce, replay rejected")]
    DuplicateMessageNonce,

    // ── Consistency / storage ────────────────────────────────────────────────
    #[error("missing block at height {0}")]
    MissingBlock(u64),

    #[error("storage integrity check failed: {0}")]
    IntegrityFailure(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // ── Protocol (fatal) ─────────────────────────────────────────────────────
    #[error("reorg across finality checkpoint: height {height} <= checkpoint {checkpoint}")]
    CheckpointViolation { height: u64, checkpoint: u64 },

    // ── Configuration ────────────────────────────────────────────────────────
    #[error("configuration error: {0}")]
    Config(String),
}

impl TimpalError {
    /// Protocol errors halt the node; everything else is recoverable at the
    /// component that detected it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TimpalError::CheckpointViolation { .. })
    }
}
