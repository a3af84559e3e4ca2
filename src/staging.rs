//! Staging-buffer sizing policy for the cross-process copy engine
//!
//! A staged copy moves bytes through an intermediate buffer: a fixed
//! on-stack array for small transfers, non-paged pool otherwise. Pool
//! pressure degrades the request by halving until it fits on the stack,
//! so the engine always ends up with a usable buffer.

/// single-move ceiling for one staged iteration (64 KiB)
pub const MAX_MOVE_SIZE: usize = 64 * 1024;

/// on-stack staging buffer size, the degrade floor
pub const STACK_BUFFER_SIZE: usize = 512;

/// staging size to ask for first
#[inline]
pub const fn preferred_staging_len(total: usize) -> usize {
    if total < MAX_MOVE_SIZE {
        total
    } else {
        MAX_MOVE_SIZE
    }
}

/// whether a staging request can use the stack buffer outright
#[inline]
pub const fn fits_on_stack(len: usize) -> bool {
    len <= STACK_BUFFER_SIZE
}

/// next smaller staging size after a failed pool allocation
///
/// Returns `None` once the size reaches the stack floor; the caller then
/// switches to the stack buffer instead of failing.
#[inline]
pub const fn degraded_staging_len(len: usize) -> Option<usize> {
    let halved = len / 2;
    if halved <= STACK_BUFFER_SIZE {
        None
    } else {
        Some(halved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferred_len_caps_at_ceiling() {
        assert_eq!(preferred_staging_len(100), 100);
        assert_eq!(preferred_staging_len(MAX_MOVE_SIZE), MAX_MOVE_SIZE);
        assert_eq!(preferred_staging_len(70000), MAX_MOVE_SIZE);
    }

    #[test]
    fn test_degrade_terminates_at_stack_floor() {
        // exhaustive pool failure must still end with a usable buffer
        let mut len = preferred_staging_len(usize::MAX);
        let mut steps = 0;
        while let Some(next) = degraded_staging_len(len) {
            assert!(next < len);
            len = next;
            steps += 1;
            assert!(steps < 64);
        }
        assert!(len > STACK_BUFFER_SIZE);
        assert!(fits_on_stack(len / 2));
    }

    #[test]
    fn test_small_transfers_use_stack() {
        assert!(fits_on_stack(1));
        assert!(fits_on_stack(STACK_BUFFER_SIZE));
        assert!(!fits_on_stack(STACK_BUFFER_SIZE + 1));
    }

    #[test]
    fn test_seventy_thousand_bytes_takes_two_moves() {
        // 70000 bytes crosses the single-move ceiling
        let total = 70000;
        let mut remaining = total;
        let mut moves = 0;
        while remaining > 0 {
            let chunk = preferred_staging_len(remaining);
            remaining -= chunk;
            moves += 1;
        }
        assert_eq!(moves, 2);
    }
}
