/// A contiguous, inclusive run of sequence numbers reserved for exclusive use
/// by one `(service_id, container_id)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SegmentRange {
    pub service_id: u32,
    pub container_id: u32,
    pub start: u32,
    pub end: u32,
}

impl SegmentRange {
    /// Number of sequence values in the range.
    pub const fn len(&self) -> u64 {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start) as u64 + 1
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a single [`get_segment`] call.
///
/// [`get_segment`]: crate::SegmentAllocator::get_segment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Segment {
    /// A range was reserved. `clamped` is set when the request ran into the
    /// sequence ceiling, in which case the range is short and the container
    /// has already been given a new id.
    Reserved { range: SegmentRange, clamped: bool },
    /// The counter was already at the ceiling. No range was reserved and the
    /// container has been given a new id; ask again.
    Exhausted,
}
