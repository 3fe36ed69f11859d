//! Lock-free segmented ID allocator.
//!
//! A [`Segment`] owns the ID space of one `(db, table)` key. It caches
//! pre-reserved ranges in a fixed ring of [`Buffer`]s and vends IDs with a
//! single atomic fetch-and-add per call, so issuing is wait-free with respect
//! to other issuers. An external coordinator hands out the ranges; this crate
//! only consumes them.
//!
//! # ID layout
//!
//! Issued IDs are 63-bit positive integers: the top 4 bits carry the data
//! center, the low 59 bits the locally increasing sequence.
//!
//! ```text
//! [ sign = 0 | data center : 4 | sequence : 59 ]
//! ```
//!
//! Each data center therefore owns a disjoint stripe of the positive `i64`
//! space, and IDs from one segment are strictly increasing in issue order.
//!
//! # Example
//!
//! ```
//! use rabbitid_segment::Segment;
//!
//! let seg = Segment::new(0, "orders", "invoice", 10);
//! seg.expand(0, 10).unwrap();
//! assert_eq!(seg.next().unwrap(), 1);
//! assert_eq!(seg.len(), 9);
//! ```

mod buffer;
mod error;
mod segment;

pub use buffer::Buffer;
pub use error::SegmentError;
pub use segment::Segment;

/// Bits reserved for the data-center tag.
pub const DATA_CENTER_BITS: u32 = 4;

/// Largest representable data center (the tag must fit in 4 bits).
pub const DATA_CENTER_MASK: i64 = (1 << DATA_CENTER_BITS) - 1;

/// Bits left for the locally increasing sequence (63 - 4).
pub const SEQUENCE_BITS: u32 = 64 - 1 - DATA_CENTER_BITS;

/// Mask applied to local IDs before the data-center tag is merged in.
pub const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;

/// Number of buffer slots in a segment's ring. One slot always stays free as
/// a sentinel between the write and read cursors.
pub const RING_SIZE: u32 = 64;

/// Low-water mark: a segment with fewer usable buffers than this asks for a
/// refill.
pub const EXPAND_THRESHOLD: u32 = 3;
