//! Sequence numbering for the fixed capacity rings.
//!
//! Every ring is addressed by a monotonically increasing 64-bit sequence number.
//! `slot = n % capacity`, `trip = n / capacity`. Slots carry a tag derived from the
//! trip of their last writer, and a reader for sequence `n` only accepts a slot whose
//! tag equals `ready_tag(trip(n))`. Tags are compared by equality, never by ordering.

/// Number of bits a tag occupies in a slot word.
pub(crate) const TAG_BITS: u32 = 16;
pub(crate) const TAG_MASK: u64 = (1 << TAG_BITS) - 1;

/// The tag a slot written during `trip` carries.
///
/// Never zero, so a zero-initialized slot is never ready, and consecutive trips always
/// map to different tags.
#[inline(always)]
pub(crate) fn ready_tag(trip: u64) -> u64 {
    (trip % TAG_MASK) + 1
}

/// A position in a conceptually unbounded ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Seq(pub(crate) u64);

impl Seq {
    #[inline(always)]
    pub(crate) fn slot(self, capacity: usize) -> usize {
        (self.0 % capacity as u64) as usize
    }

    #[inline(always)]
    pub(crate) fn trip(self, capacity: usize) -> u64 {
        self.0 / capacity as u64
    }

    #[inline(always)]
    pub(crate) fn tag(self, capacity: usize) -> u64 {
        ready_tag(self.trip(capacity))
    }

    /// Number of sequence numbers from `self` up to (excluding) the next wraparound.
    #[inline(always)]
    pub(crate) fn until_wrap(self, capacity: usize) -> u64 {
        capacity as u64 - self.slot(capacity) as u64
    }
}

impl std::fmt::Display for Seq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
