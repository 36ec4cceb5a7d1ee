//! Slot ranges over the key-hash space.
//!
//! Keys hash to a 32-bit slot; each partition owns one contiguous range of
//! slots. Ranges are half-open `[begin, end)`, except that a range ending at
//! [`SLOT_MAX`] also contains the final slot, so adjacent ranges tile the
//! whole space with no gap at the top. Ranges are metadata carried on chain
//! descriptors; routing itself only consults range begins (see the partition
//! table in `strand-client`), so the last partition of a table owns every
//! slot from its begin upward.

/// The highest addressable slot.
pub const SLOT_MAX: u32 = u32::MAX;

/// A half-open range of slots `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRange {
    /// Start of the range (inclusive).
    pub begin: u32,
    /// End of the range (exclusive).
    pub end: u32,
}

impl SlotRange {
    /// Creates a new slot range.
    ///
    /// # Panics
    ///
    /// Panics if begin >= end.
    #[must_use]
    pub fn new(begin: u32, end: u32) -> Self {
        assert!(begin < end, "slot range begin must be < end");
        Self { begin, end }
    }

    /// The range spanning the whole slot space.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            begin: 0,
            end: SLOT_MAX,
        }
    }

    /// Returns true if this range contains the given slot.
    ///
    /// A range ending at [`SLOT_MAX`] is closed at the top: there is no
    /// slot past it to hand the final slot to.
    #[must_use]
    pub const fn contains(&self, slot: u32) -> bool {
        slot >= self.begin && (slot < self.end || (self.end == SLOT_MAX && slot == SLOT_MAX))
    }

    /// Returns the number of slots in this range.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.end - self.begin
    }

    /// Splits this range at the given point.
    ///
    /// Returns (low, high) where low covers `[begin, mid)` and high covers
    /// `[mid, end)`.
    ///
    /// # Panics
    ///
    /// Panics if mid is not strictly inside the range.
    #[must_use]
    pub fn split_at(&self, mid: u32) -> (Self, Self) {
        assert!(
            mid > self.begin && mid < self.end,
            "split point must be inside the range"
        );
        (Self::new(self.begin, mid), Self::new(mid, self.end))
    }
}
