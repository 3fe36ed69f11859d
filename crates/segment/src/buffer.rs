use crate::SegmentError;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

// Synchronization protocol
//
// A buffer cycles through: disabled -> initialized -> draining -> disabled.
// `init` writes `max`, `offset` and `step` while the buffer is still
// disabled, then publishes with a Release store of `disabled = false`; every
// reader enters through an Acquire load of `disabled`, so the range fields
// are never observed half-written. After publication the only mutated field
// is `offset` (fetch-and-add), which is what makes `next` wait-free.

/// One reserved ID range `(offset, max]` inside a segment's ring.
///
/// Many callers drain a buffer concurrently. The fetch-and-add on `offset`
/// guarantees that exactly one caller receives each value, and the
/// `id == max` / `id > max` distinction below guarantees that exactly one
/// caller learns it took the final ID.
#[derive(Debug)]
pub struct Buffer {
    offset: AtomicI64,
    max: AtomicI64,
    step: AtomicI64,
    disabled: AtomicBool,
}

impl Buffer {
    /// Creates an empty, disabled buffer (the initial state of every ring
    /// slot).
    pub fn new() -> Self {
        Self {
            offset: AtomicI64::new(0),
            max: AtomicI64::new(0),
            step: AtomicI64::new(0),
            disabled: AtomicBool::new(true),
        }
    }

    /// Loads the reserved range `(min, min + step]` into this buffer and
    /// publishes it.
    ///
    /// The buffer must currently be disabled; the ring's write cursor is the
    /// sole caller.
    pub fn init(&self, min: i64, step: i64) {
        debug_assert!(self.is_disabled(), "init on a draining buffer");
        self.max.store(min + step, Ordering::Relaxed);
        self.offset.store(min, Ordering::Relaxed);
        self.step.store(step, Ordering::Relaxed);
        // Publish: readers Acquire-load `disabled` before touching the range.
        self.disabled.store(false, Ordering::Release);
    }

    /// Takes the next ID.
    ///
    /// Returns `Ok((id, exhausted))`. `exhausted` is `true` for exactly one
    /// caller per range: the one that drew `id == max`. That caller received
    /// a valid ID *and* is responsible for advancing the ring. Later callers
    /// overshoot (`id > max`) and get [`SegmentError::Empty`].
    ///
    /// Testing exhaustion by reading `offset` before the add would let two
    /// callers both observe `max - 1` and both claim the final ID; the
    /// fetch-and-add followed by the comparison is what closes that race.
    pub fn next(&self) -> Result<(i64, bool), SegmentError> {
        if self.is_disabled() {
            return Err(SegmentError::Empty);
        }
        let id = self.offset.fetch_add(1, Ordering::AcqRel) + 1;
        let max = self.max.load(Ordering::Acquire);
        if id >= max {
            self.set_disabled();
            if id > max {
                // Lost the race for the final ID.
                return Err(SegmentError::Empty);
            }
        }
        Ok((id, id == max))
    }

    /// Last issued value. Advisory: 0 once the buffer is exhausted, and may
    /// lag concurrent issues.
    pub fn last(&self) -> i64 {
        if self.is_disabled() {
            return 0;
        }
        self.offset.load(Ordering::Acquire)
    }

    /// Remaining IDs in this buffer. Advisory under concurrency.
    pub fn remainder(&self) -> i64 {
        let remainder = self.max.load(Ordering::Acquire) - self.offset.load(Ordering::Acquire);
        remainder.max(0)
    }

    /// Upper bound of the reserved range (stale once the slot is reused).
    pub fn max(&self) -> i64 {
        self.max.load(Ordering::Acquire)
    }

    /// Returns `true` once this buffer is exhausted or not yet filled.
    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Marks this buffer exhausted. Only transitions `false -> true`; `init`
    /// is the only path back.
    #[inline]
    pub fn set_disabled(&self) {
        self.disabled.store(true, Ordering::Release);
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}
