//! A monotonic logical clock. Every stored version is stamped with the
//! value returned by [`Clock::timestamp`]: a 63-bit integer (the MSB is
//! always zero) that combines a millisecond wall-clock reading with an
//! in-process sequence counter, so concurrent callers within the same
//! millisecond still observe strictly increasing values.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{CResult, Error};

/// Bits reserved for the sequence counter packed into the low end of a
/// timestamp. 1024 writes per millisecond is far above what a single
/// process can sustain through the per-key write locks, so this never
/// wraps in practice; `next` falls back to spinning to the next
/// millisecond if it ever would.
const SEQ_BITS: u32 = 10;
const SEQ_MASK: i64 = (1 << SEQ_BITS) - 1;

pub struct Clock {
    /// Packed (millis << SEQ_BITS) | seq of the last timestamp issued.
    last: AtomicI64,
}

impl Clock {
    /// Creates a clock seeded at the current wall-clock time.
    pub fn new() -> Self {
        Clock { last: AtomicI64::new(Self::wall_millis() << SEQ_BITS) }
    }

    /// Opens a clock for a node whose change log's last record is stamped
    /// `last_log_ts`. Fails with [`Error::TimeSkew`] if the wall clock is
    /// currently behind that timestamp, since issuing an earlier timestamp
    /// than one already on disk would violate the log's append-only
    /// monotonicity invariant.
    pub fn open(last_log_ts: i64) -> CResult<Self> {
        let clock = Self::new();
        let now = clock.last.load(Ordering::SeqCst);
        if now < last_log_ts {
            return Err(Error::TimeSkew { clock: now >> SEQ_BITS, log_tail: last_log_ts >> SEQ_BITS });
        }
        // Make sure the very next issued timestamp is strictly greater than
        // anything already on disk.
        clock.last.fetch_max(last_log_ts, Ordering::SeqCst);
        Ok(clock)
    }

    fn wall_millis() -> i64 {
        let dur = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        // i64::MAX milliseconds is ~292 million years past the epoch; the
        // left shift by SEQ_BITS below keeps the MSB zero for any
        // plausible wall-clock value.
        dur.as_millis() as i64
    }

    /// Returns a strictly non-decreasing 63-bit logical timestamp. Safe to
    /// call concurrently from any number of threads.
    pub fn timestamp(&self) -> i64 {
        loop {
            let prev = self.last.load(Ordering::SeqCst);
            let prev_millis = prev >> SEQ_BITS;
            let prev_seq = prev & SEQ_MASK;

            let now_millis = Self::wall_millis();
            let (millis, seq) = if now_millis > prev_millis {
                (now_millis, 0)
            } else if prev_seq < SEQ_MASK {
                (prev_millis, prev_seq + 1)
            } else {
                // Sequence space exhausted within this millisecond; advance
                // to the next one instead of reusing prev_millis.
                (prev_millis + 1, 0)
            };

            let next = (millis << SEQ_BITS) | seq;
            if self
                .last
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                debug_assert!(next >= 0, "timestamp MSB must be zero");
                return next;
            }
        }
    }

    /// Inverse of the wall-clock component of [`Clock::timestamp`]. Only
    /// second-level precision is required by callers (human-readable
    /// display), so the millisecond and sequence bits are simply dropped.
    pub fn unix_sec(ts: i64) -> i64 {
        (ts >> SEQ_BITS) / 1000
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timestamps_are_monotonic() {
        let clock = Clock::new();
        let mut prev = clock.timestamp();
        for _ in 0..10_000 {
            let next = clock.timestamp();
            assert!(next > prev, "{} should be > {}", next, prev);
            prev = next;
        }
    }

    #[test]
    fn msb_is_always_zero() {
        let clock = Clock::new();
        for _ in 0..1000 {
            assert!(clock.timestamp() >= 0);
        }
    }

    #[test]
    fn unix_sec_round_trips_wall_time() {
        let clock = Clock::new();
        let before = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        let ts = clock.timestamp();
        let after = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        let decoded = Clock::unix_sec(ts);
        assert!(decoded >= before - 1 && decoded <= after + 1);
    }

    #[test]
    fn open_rejects_clock_behind_log_tail() {
        let far_future = (Clock::new().timestamp() >> SEQ_BITS) + 10_000_000;
        let result = Clock::open(far_future << SEQ_BITS);
        assert!(matches!(result, Err(Error::TimeSkew { .. })));
    }

    #[test]
    fn open_accepts_clock_ahead_of_log_tail() {
        let clock = Clock::open(0).expect("clock should be ahead of epoch");
        assert!(clock.timestamp() > 0);
    }

    #[test]
    fn concurrent_callers_never_collide() {
        use std::sync::Arc;
        let clock = Arc::new(Clock::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let clock = clock.clone();
            handles.push(std::thread::spawn(move || {
                (0..2000).map(|_| clock.timestamp()).collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<i64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total, "all issued timestamps must be unique");
    }
}
