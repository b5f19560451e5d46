//! ─── TIMPAL Protocol Constants ──────────────────────────────────────────────
//!
//! Base unit: pal  (1 TMPL = 100,000,000 pals)
//! Ticker:    TMPL

// ── Units ────────────────────────────────────────────────────────────────────

/// 1 TMPL expressed in pals, the on-chain integer unit.
pub const PALS_PER_TMPL: u64 = 100_000_000;

/// Flat protocol fee per transfer: 0.0005 TMPL.
pub const FEE: u64 = 50_000;

/// Largest amount a single transfer may move: 1,000,000 TMPL.
pub const MAX_TRANSACTION_AMOUNT: u64 = 1_000_000 * PALS_PER_TMPL;

/// Reward emitted to the proposer of every applied block: 2 TMPL.
/// Emission through block rewards is the only way pals are created after
/// genesis.
pub const BLOCK_REWARD_PALS: u64 = 2 * PALS_PER_TMPL;

// ── Addresses ────────────────────────────────────────────────────────────────

/// Human-readable address prefix.
pub const ADDRESS_PREFIX: &str = "tmpl";

/// Hex characters of double-SHA-256 kept in an address.
pub const ADDRESS_HASH_LEN: usize = 44;

/// Total address length: prefix + 44 hex chars.
pub const ADDRESS_LEN: usize = 48;

// ── HD wallet ────────────────────────────────────────────────────────────────

/// SLIP-44 coin type for TMPL (provisional registration).
pub const COIN_TYPE: u32 = 4007;

/// Minimum digits in a transfer-authorization PIN.
pub const MIN_PIN_LEN: usize = 6;

// ── Time-sliced windows ──────────────────────────────────────────────────────

/// Length of one slot in seconds. One block height per slot.
pub const SLOT_SECONDS: f64 = 3.0;

/// Sub-windows per slot: primary proposer plus two fallbacks.
pub const NUM_SUBSLOTS: usize = 3;

/// Length of each rank's window in seconds.
pub const WINDOW_SECONDS: f64 = SLOT_SECONDS / NUM_SUBSLOTS as f64;

/// Late tolerance applied to the window end only. The window start carries
/// no tolerance; the asymmetry keeps adjacent windows disjoint.
pub const CLOCK_DRIFT_TOLERANCE: f64 = 0.3;

/// Heights below this use the lenient bootstrap window rule.
pub const BOOTSTRAP_BLOCKS: u64 = 10;

// ── Ledger ───────────────────────────────────────────────────────────────────

/// A finality checkpoint is recorded every this many blocks.
pub const CHECKPOINT_INTERVAL: u64 = 100;

/// Votes must represent at least 2/3 of validator power to form a timeout
/// certificate (numerator / denominator).
pub const TIMEOUT_QUORUM_NUM: u64 = 2;
pub const TIMEOUT_QUORUM_DEN: u64 = 3;

// ── Mempool ──────────────────────────────────────────────────────────────────

/// Per-sender pending-transaction cap.
pub const MAX_TX_PER_ADDRESS: usize = 10;

/// Total mempool capacity.
pub const MAX_TOTAL_TX: usize = 10_000;

/// Default number of transactions handed to a block proposer.
pub const BLOCK_TX_LIMIT: usize = 700;

// ── P2P authentication ───────────────────────────────────────────────────────

/// Reject messages older than this (seconds). Deliberately wide: nonces, not
/// timestamps, carry the replay protection.
pub const MAX_MESSAGE_AGE_SECS: f64 = 86_400.0;

/// Reject messages from further in the future than this (seconds).
pub const MAX_TIME_DRIFT_SECS: f64 = 86_400.0;

/// Drift beyond this is logged so operators can spot clock-sync issues.
pub const CLOCK_DRIFT_WARNING_SECS: f64 = 60.0;

/// Per-peer ring buffer of recently seen message nonces.
pub const NONCE_CACHE_SIZE: usize = 1_000;

/// Authentication failures before a peer is banned for the process lifetime.
pub const MAX_AUTH_FAILURES: u32 = 10;
