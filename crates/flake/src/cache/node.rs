use crate::allocator::SegmentRange;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// One value taken from the head of a node's queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Taken {
    pub service_id: u32,
    pub container_id: u32,
    pub sequence_id: u32,
    /// Whether this take crossed the low-water mark and claimed the
    /// read-ahead slot.
    pub(crate) prefetch: bool,
}

#[derive(Debug)]
pub(crate) struct NodeState {
    pub(crate) ranges: VecDeque<SegmentRange>,
    pub(crate) remaining: u64,
    pub(crate) target: u32,
    pub(crate) fetching: bool,
}

impl NodeState {
    /// Pops the next sequence value, retiring the head range once spent.
    fn pop(&mut self) -> Option<(u32, u32, u32)> {
        let head = self.ranges.front_mut()?;
        let taken = (head.service_id, head.container_id, head.start);
        if head.start >= head.end {
            self.ranges.pop_front();
        } else {
            head.start += 1;
        }
        self.remaining = self.remaining.saturating_sub(1);
        Some(taken)
    }

    pub(crate) fn below_low_water(&self) -> bool {
        self.remaining < u64::from(self.target) / 2
    }
}

/// Buffered ranges for one service name.
///
/// Two independent locks guard a node. `state` is the take lock: memory-only
/// and held for a handful of instructions. `fetch` serializes refills so at
/// most one network round trip per node is in flight.
#[derive(Debug)]
pub(crate) struct CacheNode {
    pub(crate) service_name: String,
    pub(crate) state: Mutex<NodeState>,
    pub(crate) fetch: tokio::sync::Mutex<()>,
}

impl CacheNode {
    pub(crate) fn new(service_name: &str, target: u32) -> Self {
        Self {
            service_name: service_name.to_string(),
            state: Mutex::new(NodeState {
                ranges: VecDeque::new(),
                remaining: 0,
                target,
                fetching: false,
            }),
            fetch: tokio::sync::Mutex::new(()),
        }
    }

    /// Takes one value if any is buffered. With `prefetch` enabled, the take
    /// that drops the node below half its target claims the read-ahead slot,
    /// reported through [`Taken::prefetch`].
    pub(crate) fn try_take(&self, prefetch: bool) -> Option<Taken> {
        let mut state = self.state.lock();
        let (service_id, container_id, sequence_id) = state.pop()?;
        let claim = prefetch && !state.fetching && state.below_low_water();
        if claim {
            state.fetching = true;
        }
        Some(Taken {
            service_id,
            container_id,
            sequence_id,
            prefetch: claim,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u32, end: u32) -> SegmentRange {
        SegmentRange {
            service_id: 11,
            container_id: 12,
            start,
            end,
        }
    }

    #[test]
    fn drains_ranges_in_order() {
        let node = CacheNode::new("svc", 4);
        {
            let mut state = node.state.lock();
            state.ranges.extend([range(1, 2), range(7, 7)]);
            state.remaining = 3;
        }

        let seq: Vec<u32> = std::iter::from_fn(|| node.try_take(false))
            .map(|t| t.sequence_id)
            .collect();
        assert_eq!(seq, vec![1, 2, 7]);
        assert!(node.state.lock().ranges.is_empty());
        assert_eq!(node.state.lock().remaining, 0);
    }

    #[test]
    fn claims_read_ahead_once_below_half() {
        let node = CacheNode::new("svc", 4);
        {
            let mut state = node.state.lock();
            state.ranges.push_back(range(1, 4));
            state.remaining = 4;
        }

        // 3 left, not below 2
        assert!(!node.try_take(true).unwrap().prefetch);
        // 2 left, not below 2
        assert!(!node.try_take(true).unwrap().prefetch);
        // 1 left, claims the slot
        assert!(node.try_take(true).unwrap().prefetch);
        // slot already claimed
        assert!(!node.try_take(true).unwrap().prefetch);
        assert!(node.state.lock().fetching);
    }

    #[test]
    fn read_ahead_disabled() {
        let node = CacheNode::new("svc", 4);
        {
            let mut state = node.state.lock();
            state.ranges.push_back(range(1, 1));
            state.remaining = 1;
        }
        assert!(!node.try_take(false).unwrap().prefetch);
        assert!(!node.state.lock().fetching);
    }

    #[test]
    fn range_ending_at_u32_max_does_not_overflow() {
        let node = CacheNode::new("svc", 4);
        {
            let mut state = node.state.lock();
            state.ranges.push_back(range(u32::MAX - 1, u32::MAX));
            state.remaining = 2;
        }
        assert_eq!(node.try_take(false).unwrap().sequence_id, u32::MAX - 1);
        assert_eq!(node.try_take(false).unwrap().sequence_id, u32::MAX);
        assert!(node.try_take(false).is_none());
    }
}
