/// Slot → node ownership index.
///
/// Grounded on `modes/redis/slots.rs::SlotMap` (the teacher's dense
/// `HashMap<u16, String>` slot table) and Design Notes §9, which permits
/// replacing the source implementation's big-endian-keyed radix tree with
/// "any ordered map over the 14-bit integer key". A `BTreeMap` keyed by the
/// slot's owning node's handle, storing only range endpoints, gives O(log n)
/// lookup with footprint proportional to the number of contiguous slot
/// ranges rather than to 16384.
use std::collections::BTreeMap;

use super::arena::NodeHandle;
use super::slot::SLOT_COUNT;

/// Maps every slot either to the `NodeHandle` owning it, or leaves it
/// unmapped (a slot Redis Cluster itself has not yet assigned to anyone).
#[derive(Debug, Default)]
pub struct SlotIndex {
    /// Sparse: one entry per (slot, handle) pair just for the first slot of
    /// a contiguous range owned by that handle, plus a sentinel marking
    /// where the range currently owned by `handle` ends.
    ranges: BTreeMap<u16, (u16, NodeHandle)>,
}

impl SlotIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the inclusive range `[start, end]` to `handle`. Ranges are
    /// expected to come from a single topology snapshot and not overlap;
    /// a `reset()` clears the whole index before the next fetch repopulates
    /// it, so there is no need to merge or split existing ranges here.
    pub fn map_range(&mut self, start: u16, end: u16, handle: NodeHandle) {
        debug_assert!(start <= end && end < SLOT_COUNT);
        self.ranges.insert(start, (end, handle));
    }

    /// Unmap every slot currently owned by `handle`. Used when a node is
    /// removed from the cluster without an immediate replacement mapping.
    pub fn unmap_node(&mut self, handle: NodeHandle) {
        self.ranges.retain(|_, (_, h)| *h != handle);
    }

    pub fn node_for_slot(&self, slot: u16) -> Option<NodeHandle> {
        self.ranges
            .range(..=slot)
            .next_back()
            .and_then(|(_, &(end, handle))| if slot <= end { Some(handle) } else { None })
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The handle owning the lowest mapped slot, if any are mapped.
    pub fn first_mapped(&self) -> Option<NodeHandle> {
        self.ranges.values().next().map(|&(_, h)| h)
    }

    /// Every (start, end, owner) range, in ascending order. Used by the
    /// duplication facility to rebuild an equivalent index against a
    /// different cluster's node handles.
    pub fn ranges(&self) -> impl Iterator<Item = (u16, u16, NodeHandle)> + '_ {
        self.ranges.iter().map(|(&start, &(end, handle))| (start, end, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::arena::NodeArena;
    use crate::cluster::node::Node;

    fn handle(arena: &mut NodeArena, port: u16) -> NodeHandle {
        arena.insert(Node::new("127.0.0.1".to_string(), port))
    }

    #[test]
    fn maps_and_looks_up_a_single_range() {
        let mut arena = NodeArena::new();
        let h = handle(&mut arena, 7000);
        let mut index = SlotIndex::new();
        index.map_range(0, 100, h);

        assert_eq!(index.node_for_slot(0), Some(h));
        assert_eq!(index.node_for_slot(100), Some(h));
        assert_eq!(index.node_for_slot(101), None);
    }

    #[test]
    fn disjoint_ranges_resolve_independently() {
        let mut arena = NodeArena::new();
        let a = handle(&mut arena, 7000);
        let b = handle(&mut arena, 7001);
        let mut index = SlotIndex::new();
        index.map_range(0, 99, a);
        index.map_range(200, 299, b);

        assert_eq!(index.node_for_slot(50), Some(a));
        assert_eq!(index.node_for_slot(150), None);
        assert_eq!(index.node_for_slot(250), Some(b));
    }

    #[test]
    fn remapping_a_range_overrides_the_previous_owner() {
        let mut arena = NodeArena::new();
        let a = handle(&mut arena, 7000);
        let b = handle(&mut arena, 7001);
        let mut index = SlotIndex::new();
        index.map_range(0, 99, a);
        index.map_range(0, 99, b);

        assert_eq!(index.node_for_slot(50), Some(b));
    }

    #[test]
    fn unmap_node_clears_only_its_ranges() {
        let mut arena = NodeArena::new();
        let a = handle(&mut arena, 7000);
        let b = handle(&mut arena, 7001);
        let mut index = SlotIndex::new();
        index.map_range(0, 99, a);
        index.map_range(200, 299, b);

        index.unmap_node(a);
        assert_eq!(index.node_for_slot(50), None);
        assert_eq!(index.node_for_slot(250), Some(b));
    }

    #[test]
    fn clear_empties_the_index() {
        let mut arena = NodeArena::new();
        let a = handle(&mut arena, 7000);
        let mut index = SlotIndex::new();
        index.map_range(0, 99, a);
        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.node_for_slot(50), None);
    }
}
