use crate::{Buffer, SegmentError, DATA_CENTER_MASK, EXPAND_THRESHOLD, RING_SIZE, SEQUENCE_BITS, SEQUENCE_MASK};
use crossbeam_utils::atomic::AtomicCell;
use crossbeam_utils::CachePadded;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Instant;

/// Per-key ID allocator: a fixed ring of [`Buffer`]s fed by a coordinator.
///
/// The ring is driven by two monotonic `u32` cursors; the active slot is
/// `cursor % RING_SIZE`. `expand` claims the slot behind the write cursor and
/// fills it with a fresh range; `next` drains the slot under the read cursor
/// and advances it once the buffer reports exhaustion. The cursors never
/// close the gap completely: the write side refuses to fill the last free
/// slot, so `write_cursor - read_cursor` stays within `[0, RING_SIZE - 1]`.
///
/// Slot lifecycle: disabled -> initialized (expand) -> draining (next) ->
/// disabled again -> reclaimed when the read cursor passes.
///
/// Many tasks may call `next` concurrently; refills are expected from a
/// single background task plus occasional inline callers, which the free-slot
/// sentinel absorbs.
pub struct Segment {
    /// Pre-shifted data-center tag, merged into every issued ID.
    dc_shift: i64,
    db: String,
    table: String,
    /// Slots are cache-line padded: neighbouring buffers are drained by
    /// different cores at the same time.
    ring: Box<[CachePadded<Buffer>]>,
    read_cursor: AtomicU32,
    write_cursor: AtomicU32,
    /// Batch size of the most recent refill.
    step: AtomicI64,
    /// Wall clock of the last successful refill; drives adaptive sizing.
    update_time: AtomicCell<Instant>,
}

impl Segment {
    /// Creates an empty segment for `(db, table)` tagged with `data_center`
    /// (low 4 bits).
    pub fn new(data_center: u8, db: impl Into<String>, table: impl Into<String>, step: i64) -> Self {
        let ring: Vec<CachePadded<Buffer>> = (0..RING_SIZE)
            .map(|_| CachePadded::new(Buffer::new()))
            .collect();
        Self {
            dc_shift: (i64::from(data_center) & DATA_CENTER_MASK) << SEQUENCE_BITS,
            db: db.into(),
            table: table.into(),
            ring: ring.into_boxed_slice(),
            read_cursor: AtomicU32::new(0),
            write_cursor: AtomicU32::new(0),
            step: AtomicI64::new(step),
            update_time: AtomicCell::new(Instant::now()),
        }
    }

    /// Loads the reserved range `(min, min + size]` into the next ring slot.
    ///
    /// Fails with [`SegmentError::Full`] when no slot is free; the caller
    /// drops the refill and tries again later. [`SegmentError::ExpandDuplicated`]
    /// means the claimed slot is still draining, which a sane cursor history
    /// cannot produce.
    pub fn expand(&self, min: i64, size: i64) -> Result<(), SegmentError> {
        let rc = self.read_cursor.load(Ordering::Acquire);
        let wc = self.write_cursor.load(Ordering::Acquire);
        // One slot stays free between the cursors.
        if wc.wrapping_sub(rc) >= RING_SIZE - 1 {
            return Err(SegmentError::Full);
        }
        let next_w = self.write_cursor.fetch_add(1, Ordering::AcqRel) + 1;
        let slot = (next_w.wrapping_add(RING_SIZE - 1) % RING_SIZE) as usize;
        let buf = &self.ring[slot];
        if !buf.is_disabled() {
            debug_assert!(false, "expand claimed a live slot (rc={rc}, wc={next_w})");
            return Err(SegmentError::ExpandDuplicated);
        }
        self.step.store(size, Ordering::Relaxed);
        self.update_time.store(Instant::now());
        buf.init(min, size);
        Ok(())
    }

    /// Takes the next ID, tagged with the data center.
    ///
    /// The caller that drains a buffer's final ID advances the read cursor
    /// with a CAS from the cursor value it read; the single-winner guarantee
    /// of [`Buffer::next`] means only one such CAS can succeed per
    /// exhaustion. Callers that lose the final-ID race observe the disabled
    /// buffer, help with the same CAS, and report
    /// [`SegmentError::Empty`] so the caller retries on the next buffer.
    pub fn next(&self) -> Result<i64, SegmentError> {
        let cur = self.read_cursor.load(Ordering::Acquire);
        let buf = &self.ring[(cur % RING_SIZE) as usize];
        match buf.next() {
            Ok((id, exhausted)) => {
                if exhausted {
                    self.advance_read_cursor(cur);
                }
                Ok(self.dc_shift | (id & SEQUENCE_MASK))
            }
            Err(SegmentError::Empty) => {
                // Skip the drained buffer, but never march past the write
                // cursor: an unfilled slot is empty, not exhausted.
                let wc = self.write_cursor.load(Ordering::Acquire);
                if buf.is_disabled() && wc.wrapping_sub(cur) > 0 {
                    self.advance_read_cursor(cur);
                }
                Err(SegmentError::Empty)
            }
            Err(e) => Err(e),
        }
    }

    fn advance_read_cursor(&self, cur: u32) {
        // Losing the CAS means another caller already moved the cursor on.
        let _ = self.read_cursor.compare_exchange(
            cur,
            cur.wrapping_add(1),
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Last locally issued value. Best effort: stale under load and 0 while
    /// the active buffer is exhausted.
    pub fn last(&self) -> i64 {
        let cur = self.read_cursor.load(Ordering::Acquire);
        self.ring[(cur % RING_SIZE) as usize].last()
    }

    /// Total IDs still cached across usable buffers. Best effort.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> i64 {
        let rc = self.read_cursor.load(Ordering::Acquire);
        let wc = self.write_cursor.load(Ordering::Acquire);
        let mut count = 0;
        let mut i = rc;
        while i != wc {
            let buf = &self.ring[(i % RING_SIZE) as usize];
            if !buf.is_disabled() {
                count += buf.remainder();
            }
            i = i.wrapping_add(1);
        }
        count
    }

    /// Upper bound of every locally reserved range, drained or not.
    pub fn max(&self) -> i64 {
        self.ring.iter().map(|b| b.max()).max().unwrap_or(0)
    }

    /// Number of usable buffers between the cursors.
    pub fn expand_size(&self) -> u32 {
        let rc = self.read_cursor.load(Ordering::Acquire);
        let wc = self.write_cursor.load(Ordering::Acquire);
        let size = wc.wrapping_sub(rc);
        if size == 0 && !self.ring[(rc % RING_SIZE) as usize].is_disabled() {
            return 1;
        }
        size
    }

    /// Low-water check: `true` when the ring holds fewer usable buffers than
    /// the refill threshold.
    pub fn need_expand(&self) -> bool {
        self.expand_size() < EXPAND_THRESHOLD
    }

    /// Batch size of the most recent refill.
    pub fn step(&self) -> i64 {
        self.step.load(Ordering::Relaxed)
    }

    /// Wall clock of the most recent successful refill.
    pub fn update_time(&self) -> Instant {
        self.update_time.load()
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{db:{}, table:{}, rc:{}, wc:{}, step:{}, len:{}}}",
            self.db,
            self.table,
            self.read_cursor.load(Ordering::Relaxed),
            self.write_cursor.load(Ordering::Relaxed),
            self.step(),
            self.len(),
        )
    }
}
