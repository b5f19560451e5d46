//! Time-Sliced Windows: deterministic proposer fallback without races.
//!
//! Window 0 (0–1 s of the slot): only the primary proposer's block is valid.
//! Window 1 (1–2 s): only fallback #1's. Window 2 (2–3 s): only fallback #2's.
//! A primary that comes back late is simply rejected: its timestamp falls
//! outside its window. At most one valid proposer exists at any instant.
//!
//! Two anchoring modes exist. Absolute windows are derived from the genesis
//! timestamp; relative windows anchor the next slot to the parent block's
//! timestamp (`parent + SLOT_SECONDS`), which drifts with the chain instead
//! of wall-clock time and so survives accumulated network jitter.

use timpal_core::constants::{
    BOOTSTRAP_BLOCKS, CLOCK_DRIFT_TOLERANCE, NUM_SUBSLOTS, SLOT_SECONDS, WINDOW_SECONDS,
};
use timpal_core::types::{Address, Timestamp};
use tracing::{debug, info};

/// One block per slot: slot number equals block height. If every proposer
/// of a slot is offline the chain simply uses the next slot for the next
/// height.
pub fn slot_for_height(height: u64) -> u64 {
    height
}

/// Absolute start time of `slot`.
pub fn slot_start_time(genesis_timestamp: Timestamp, slot: u64) -> Timestamp {
    genesis_timestamp + slot as f64 * SLOT_SECONDS
}

/// `[window_start, window_end)` for a (slot, rank) pair, genesis-anchored.
pub fn window_bounds(genesis_timestamp: Timestamp, slot: u64, rank: usize) -> (Timestamp, Timestamp) {
    let slot_start = slot_start_time(genesis_timestamp, slot);
    let window_start = slot_start + rank as f64 * WINDOW_SECONDS;
    (window_start, window_start + WINDOW_SECONDS)
}

/// `[window_start, window_end)` for the slot after a parent block.
pub fn relative_window_bounds(parent_timestamp: Timestamp, rank: usize) -> (Timestamp, Timestamp) {
    let expected_slot_start = parent_timestamp + SLOT_SECONDS;
    let window_start = expected_slot_start + rank as f64 * WINDOW_SECONDS;
    (window_start, window_start + WINDOW_SECONDS)
}

fn in_window(block_timestamp: Timestamp, window_start: Timestamp, window_end: Timestamp) -> bool {
    // Asymmetric drift tolerance: none at the start (adjacent ranks must not
    // overlap), CLOCK_DRIFT_TOLERANCE at the end (late blocks from NTP
    // drift). `[start, end + drift)`, half-open on both edges that matter.
    window_start <= block_timestamp && block_timestamp < window_end + CLOCK_DRIFT_TOLERANCE
}

/// Core consensus rule, absolute mode: is `block_timestamp` inside the
/// window assigned to (slot, rank)?
pub fn validate_block_window(
    block_timestamp: Timestamp,
    genesis_timestamp: Timestamp,
    slot: u64,
    rank: usize,
) -> bool {
    let (start, end) = window_bounds(genesis_timestamp, slot, rank);
    let valid = in_window(block_timestamp, start, end);
    if !valid {
        debug!(
            block_timestamp,
            window_start = start,
            window_end = end,
            slot,
            rank,
            "block timestamp outside absolute window"
        );
    }
    valid
}

/// Core consensus rule, relative mode: anchor the slot to the parent block.
pub fn validate_block_window_relative(
    block_timestamp: Timestamp,
    parent_timestamp: Timestamp,
    rank: usize,
) -> bool {
    let (start, end) = relative_window_bounds(parent_timestamp, rank);
    let valid = in_window(block_timestamp, start, end);
    if !valid {
        debug!(
            block_timestamp,
            parent_timestamp,
            window_start = start,
            window_end = end,
            rank,
            "block timestamp outside relative window"
        );
    }
    valid
}

/// Which slot and which rank's window are active at `now`?
pub fn current_slot_and_rank(genesis_timestamp: Timestamp, now: Timestamp) -> (u64, usize) {
    let elapsed = now - genesis_timestamp;
    let current_slot = (elapsed / SLOT_SECONDS).floor().max(0.0) as u64;
    let slot_elapsed = elapsed - current_slot as f64 * SLOT_SECONDS;
    let active_rank = ((slot_elapsed / WINDOW_SECONDS).floor() as usize).min(NUM_SUBSLOTS - 1);
    (current_slot, active_rank)
}

/// Am I the designated proposer right now?
///
/// Looks up `my_address` among the first `NUM_SUBSLOTS` ranked proposers;
/// absent means not-my-turn. `lenient_bootstrap` (heights 0..10) treats the
/// window as open for every time at or after its start; the genesis
/// timestamp is usually stale when a network starts cold.
pub fn am_i_proposer_now(
    my_address: &Address,
    ranked_proposers: &[Address],
    genesis_timestamp: Timestamp,
    slot: u64,
    now: Timestamp,
    lenient_bootstrap: bool,
) -> (bool, Option<usize>) {
    let my_rank = ranked_proposers
        .iter()
        .take(NUM_SUBSLOTS)
        .position(|addr| addr == my_address);
    let rank = match my_rank {
        Some(r) => r,
        None => return (false, None),
    };

    let (window_start, window_end) = window_bounds(genesis_timestamp, slot, rank);
    let is_my_turn = if lenient_bootstrap {
        now >= window_start
    } else {
        window_start <= now && now < window_end
    };
    (is_my_turn, Some(rank))
}

/// Relative-anchored variant of [`am_i_proposer_now`]. Returns `(false,
/// None)` when I am not among the eligible ranks.
pub fn am_i_proposer_now_relative(
    my_address: &Address,
    ranked_proposers: &[Address],
    parent_timestamp: Timestamp,
    now: Timestamp,
) -> (bool, Option<usize>) {
    let rank = match ranked_proposers
        .iter()
        .take(NUM_SUBSLOTS)
        .position(|addr| addr == my_address)
    {
        Some(r) => r,
        None => return (false, None),
    };
    let (window_start, window_end) = relative_window_bounds(parent_timestamp, rank);
    let is_my_turn = window_start <= now && now < window_end + CLOCK_DRIFT_TOLERANCE;
    (is_my_turn, Some(rank))
}

/// Seconds until my absolute window opens; negative once it has.
pub fn time_until_my_window(
    rank: usize,
    genesis_timestamp: Timestamp,
    slot: u64,
    now: Timestamp,
) -> f64 {
    let (window_start, _) = window_bounds(genesis_timestamp, slot, rank);
    window_start - now
}

/// Seconds until my relative window opens; negative once it has.
pub fn time_until_my_window_relative(rank: usize, parent_timestamp: Timestamp, now: Timestamp) -> f64 {
    let (window_start, _) = relative_window_bounds(parent_timestamp, rank);
    window_start - now
}

/// The slot wall-clock time says we should be in, independent of chain
/// height.
pub fn realtime_slot(genesis_timestamp: Timestamp, now: Timestamp) -> u64 {
    ((now - genesis_timestamp) / SLOT_SECONDS).floor().max(0.0) as u64
}

/// Catch-up rule: past bootstrap, when the real-time slot is ahead of
/// `ledger_height + 1`, report the slot to skip to so the node advances past
/// empty slots instead of lagging forever.
pub fn should_skip_to_current_slot(
    genesis_timestamp: Timestamp,
    ledger_height: u64,
    now: Timestamp,
) -> Option<u64> {
    if ledger_height < BOOTSTRAP_BLOCKS {
        return None;
    }
    let realtime = realtime_slot(genesis_timestamp, now);
    let next_block_slot = ledger_height + 1;
    if realtime > next_block_slot {
        info!(
            ledger_height,
            next_block_slot,
            realtime_slot = realtime,
            skipping = realtime - next_block_slot,
            "time-slot catch-up triggered"
        );
        return Some(realtime);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(tag: &str) -> Address {
        Address(format!("tmpl{:0<44}", tag))
    }

    // Genesis 0.0, height 5: rank-0 window [15.0, 16.0), rank-1 [16.0, 17.0).

    #[test]
    fn absolute_window_literals() {
        assert_eq!(window_bounds(0.0, 5, 0), (15.0, 16.0));
        assert_eq!(window_bounds(0.0, 5, 1), (16.0, 17.0));

        // The start edge is strict: a rank-0 block at exactly 16.0 belongs
        // to rank 1, despite the drift tolerance on the end.
        assert!(!validate_block_window(16.0, 0.0, 5, 0));
        assert!(validate_block_window(16.0, 0.0, 5, 1));
        assert!(validate_block_window(15.0, 0.0, 5, 0));
    }

    #[test]
    fn late_edge_tolerance_is_half_open() {
        // Accepted just under window_end + 0.3, rejected at the bound and
        // just before window_start.
        assert!(validate_block_window(16.299, 0.0, 5, 0));
        assert!(!validate_block_window(16.3, 0.0, 5, 0));
        assert!(!validate_block_window(14.999, 0.0, 5, 0));
    }

    #[test]
    fn proposal_windows_are_disjoint() {
        // Race freedom comes from the proposer-side check: rank r may only
        // propose inside [start, end) with no tolerance at all, and rank
        // r+1's window begins exactly where rank r's ends. The late-edge
        // drift exists only on the validator side, and it is strictly
        // smaller than the one-second gap between rank starts.
        assert!(CLOCK_DRIFT_TOLERANCE < WINDOW_SECONDS);
        let me = addr("me");
        for slot in 0..50u64 {
            for rank in 0..NUM_SUBSLOTS - 1 {
                let (_, end_r) = window_bounds(0.0, slot, rank);
                let (start_next, _) = window_bounds(0.0, slot, rank + 1);
                assert_eq!(end_r, start_next);

                // At the boundary instant, only the next rank may propose.
                let mut ranked = vec![addr("x"); NUM_SUBSLOTS];
                ranked[rank] = me.clone();
                let (turn, _) = am_i_proposer_now(&me, &ranked, 0.0, slot, end_r, false);
                assert!(!turn, "rank {rank} could still propose at its end edge");

                let mut ranked_next = vec![addr("x"); NUM_SUBSLOTS];
                ranked_next[rank + 1] = me.clone();
                let (turn, _) = am_i_proposer_now(&me, &ranked_next, 0.0, slot, start_next, false);
                assert!(turn, "rank {} could not propose at its start edge", rank + 1);
            }
        }
    }

    #[test]
    fn relative_windows_follow_parent() {
        // Parent at 100.0 → next slot starts at 103.0.
        assert_eq!(relative_window_bounds(100.0, 0), (103.0, 104.0));
        assert_eq!(relative_window_bounds(100.0, 2), (105.0, 106.0));
        assert!(validate_block_window_relative(103.5, 100.0, 0));
        assert!(!validate_block_window_relative(104.31, 100.0, 0));
        assert!(validate_block_window_relative(104.2, 100.0, 0));
    }

    #[test]
    fn proposer_lookup_and_window() {
        let me = addr("me");
        let ranked = vec![addr("p0"), me.clone(), addr("p2")];

        // Rank 1 of slot 5: window [16.0, 17.0).
        let (turn, rank) = am_i_proposer_now(&me, &ranked, 0.0, 5, 16.5, false);
        assert!(turn);
        assert_eq!(rank, Some(1));

        let (turn, _) = am_i_proposer_now(&me, &ranked, 0.0, 5, 15.5, false);
        assert!(!turn);

        // Not in the first NUM_SUBSLOTS entries at all.
        let (turn, rank) = am_i_proposer_now(&addr("nobody"), &ranked, 0.0, 5, 16.5, false);
        assert!(!turn);
        assert_eq!(rank, None);
    }

    #[test]
    fn fourth_entry_is_not_eligible() {
        let me = addr("me");
        let ranked = vec![addr("a"), addr("b"), addr("c"), me.clone()];
        let (turn, rank) = am_i_proposer_now(&me, &ranked, 0.0, 0, 0.5, false);
        assert!(!turn);
        assert_eq!(rank, None);
    }

    #[test]
    fn bootstrap_mode_keeps_window_open() {
        let me = addr("me");
        let ranked = vec![me.clone()];
        // Way past the window for slot 2, but lenient bootstrap allows it.
        let (turn, _) = am_i_proposer_now(&me, &ranked, 0.0, 2, 500.0, true);
        assert!(turn);
        let (turn, _) = am_i_proposer_now(&me, &ranked, 0.0, 2, 500.0, false);
        assert!(!turn);
    }

    #[test]
    fn current_slot_and_rank_progression() {
        assert_eq!(current_slot_and_rank(0.0, 0.0), (0, 0));
        assert_eq!(current_slot_and_rank(0.0, 1.5), (0, 1));
        assert_eq!(current_slot_and_rank(0.0, 2.999), (0, 2));
        assert_eq!(current_slot_and_rank(0.0, 3.0), (1, 0));
        assert_eq!(current_slot_and_rank(0.0, 16.2), (5, 1));
    }

    #[test]
    fn time_until_window_can_be_negative() {
        assert_eq!(time_until_my_window(0, 0.0, 5, 14.0), 1.0);
        assert!(time_until_my_window(0, 0.0, 5, 15.5) < 0.0);
        assert_eq!(time_until_my_window_relative(1, 100.0, 103.0), 1.0);
    }

    #[test]
    fn catch_up_only_after_bootstrap() {
        // Height 5 is still bootstrap: never skip.
        assert_eq!(should_skip_to_current_slot(0.0, 5, 1_000.0), None);
        // Height 20, wall clock at slot 100: skip to 100.
        assert_eq!(should_skip_to_current_slot(0.0, 20, 300.0), Some(100));
        // On schedule: no skip.
        assert_eq!(should_skip_to_current_slot(0.0, 20, 63.0), None);
    }
}
