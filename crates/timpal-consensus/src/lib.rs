//! timpal-consensus — proposer scheduling and finality for TIMPAL.
//!
//! The core discipline is Time-Sliced Windows: each 3-second slot is split
//! into three 1-second sub-windows, and only the validator holding the
//! active rank may produce a valid block. Fallback without races.

pub mod finality;
pub mod slots;
pub mod timeout;
pub mod validator;

pub use finality::FinalityCheckpoints;
pub use slots::{
    am_i_proposer_now, am_i_proposer_now_relative, current_slot_and_rank, realtime_slot,
    relative_window_bounds, should_skip_to_current_slot, slot_start_time, time_until_my_window,
    time_until_my_window_relative, validate_block_window, validate_block_window_relative,
    window_bounds,
};
pub use timeout::{certificate_power, verify_timeout_certificate, verify_timeout_vote, TimeoutVotePool};
pub use validator::{ValidatorRecord, ValidatorSet};
