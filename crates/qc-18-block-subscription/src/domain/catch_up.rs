//! Catch-up range arithmetic.
//!
//! Pure functions. The scheduler owns the timing and the I/O; these decide
//! which heights a client gets in one tick.

use std::ops::RangeInclusive;

/// Cursor for a fresh irreversible subscription.
///
/// `requested` is the last height the client already has. Zero (or a negative
/// value off the wire) means "start from now": the cursor is placed at the
/// current irreversible height and nothing is backfilled.
pub fn initial_cursor(requested: i64, irreversible_height: u64) -> u64 {
    if requested <= 0 {
        irreversible_height
    } else {
        requested as u64
    }
}

/// Heights to send this tick for a client at `cursor`, given the current
/// irreversible height `head`. At most `chunk_size` heights, `None` when the
/// client is caught up.
pub fn next_range(cursor: u64, head: u64, chunk_size: u64) -> Option<RangeInclusive<u64>> {
    let from = cursor.checked_add(1)?;
    if head < from {
        return None;
    }
    let span = chunk_size.max(1) - 1;
    let to = head.min(from.saturating_add(span));
    Some(from..=to)
}

/// Number of ticks needed to deliver `behind` blocks.
pub fn ticks_to_catch_up(behind: u64, chunk_size: u64) -> u64 {
    behind.div_ceil(chunk_size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_cursor_zero_means_current() {
        assert_eq!(initial_cursor(0, 100), 100);
        assert_eq!(initial_cursor(-5, 100), 100);
    }

    #[test]
    fn test_initial_cursor_explicit() {
        assert_eq!(initial_cursor(50, 1200), 50);
        // Ahead of the chain: wait until the chain gets there
        assert_eq!(initial_cursor(5000, 1200), 5000);
    }

    #[test]
    fn test_next_range_chunks() {
        assert_eq!(next_range(50, 1200, 500), Some(51..=550));
        assert_eq!(next_range(550, 1200, 500), Some(551..=1050));
        assert_eq!(next_range(1050, 1200, 500), Some(1051..=1200));
        assert_eq!(next_range(1200, 1200, 500), None);
    }

    #[test]
    fn test_next_range_cursor_ahead_of_head() {
        assert_eq!(next_range(5000, 1200, 500), None);
    }

    #[test]
    fn test_next_range_single_block() {
        assert_eq!(next_range(100, 101, 500), Some(101..=101));
        assert_eq!(next_range(100, 103, 1), Some(101..=101));
    }

    #[test]
    fn test_next_range_saturates() {
        assert_eq!(next_range(u64::MAX, u64::MAX, 500), None);
        assert_eq!(
            next_range(u64::MAX - 2, u64::MAX, 500),
            Some(u64::MAX - 1..=u64::MAX)
        );
    }

    #[test]
    fn test_ticks_to_catch_up() {
        assert_eq!(ticks_to_catch_up(1150, 500), 3);
        assert_eq!(ticks_to_catch_up(500, 500), 1);
        assert_eq!(ticks_to_catch_up(0, 500), 0);
    }

    #[test]
    fn test_ranges_cover_without_gaps() {
        let chunk = 7;
        let head = 100;
        let mut cursor = 3;
        let mut ticks = 0;
        let mut sent = Vec::new();
        while let Some(range) = next_range(cursor, head, chunk) {
            assert!(range.clone().count() as u64 <= chunk);
            sent.extend(range.clone());
            cursor = *range.end();
            ticks += 1;
        }
        assert_eq!(sent, (4..=100).collect::<Vec<_>>());
        assert_eq!(ticks, ticks_to_catch_up(head - 3, chunk));
    }
}
