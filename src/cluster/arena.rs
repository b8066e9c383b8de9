/// Generation-checked arena for `Node` ownership.
///
/// Cluster owns every Node by value in one of these; external code only ever
/// holds a copy `NodeHandle`, which is cheap and `Copy` but becomes dangling
/// (resolves to `None`) the moment the slot it pointed at is freed or reused.
/// This is the "stable indices" arena ownership Design Notes §9 calls for, so
/// that `reset()` can invalidate every outstanding handle in one step by
/// simply clearing the arena and bumping nothing else — old handles carry
/// the generation they were issued under, and a freed-then-reused slot gets
/// a new generation, so a stale handle never aliases onto the wrong Node.
use super::node::Node;

/// A non-owning, copyable reference to a `Node` inside a `NodeArena`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    index: usize,
    generation: u64,
}

#[derive(Default)]
pub struct NodeArena {
    slots: Vec<Option<(u64, Node)>>,
    free: Vec<usize>,
    generation: u64,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a Node, returning a handle that resolves to it until the next
    /// `remove`/`clear` touches this slot.
    pub fn insert(&mut self, node: Node) -> NodeHandle {
        self.generation += 1;
        let generation = self.generation;
        if let Some(index) = self.free.pop() {
            self.slots[index] = Some((generation, node));
            NodeHandle { index, generation }
        } else {
            let index = self.slots.len();
            self.slots.push(Some((generation, node)));
            NodeHandle { index, generation }
        }
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&Node> {
        match self.slots.get(handle.index) {
            Some(Some((generation, node))) if *generation == handle.generation => Some(node),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut Node> {
        match self.slots.get_mut(handle.index) {
            Some(Some((generation, node))) if *generation == handle.generation => Some(node),
            _ => None,
        }
    }

    pub fn remove(&mut self, handle: NodeHandle) -> Option<Node> {
        match self.slots.get_mut(handle.index) {
            Some(slot @ Some((generation, _))) if *generation == handle.generation => {
                let (_, node) = slot.take().unwrap();
                self.free.push(handle.index);
                Some(node)
            }
            _ => None,
        }
    }

    /// Drop every Node, invalidating every handle issued so far.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeHandle, &Node)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref().map(|(generation, node)| {
                (
                    NodeHandle {
                        index,
                        generation: *generation,
                    },
                    node,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (NodeHandle, &mut Node)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_mut().map(|(generation, node)| {
                    (
                        NodeHandle {
                            index,
                            generation: *generation,
                        },
                        node,
                    )
                })
            })
    }

    /// The handle at the lowest occupied index, used by `first_node`/
    /// "first primary encountered" style scans when iteration order over a
    /// `Vec` is good enough (insertion order, which is topology-fetch order).
    pub fn first(&self) -> Option<(NodeHandle, &Node)> {
        self.iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn node(ip: &str, port: u16) -> Node {
        Node::new(ip.parse::<Ipv4Addr>().unwrap().to_string(), port)
    }

    #[test]
    fn insert_and_get() {
        let mut arena = NodeArena::new();
        let h = arena.insert(node("127.0.0.1", 7000));
        assert_eq!(arena.get(h).unwrap().port, 7000);
    }

    #[test]
    fn remove_invalidates_handle() {
        let mut arena = NodeArena::new();
        let h = arena.insert(node("127.0.0.1", 7000));
        arena.remove(h).unwrap();
        assert!(arena.get(h).is_none());
    }

    #[test]
    fn reused_slot_gets_fresh_generation() {
        let mut arena = NodeArena::new();
        let h1 = arena.insert(node("127.0.0.1", 7000));
        arena.remove(h1).unwrap();
        let h2 = arena.insert(node("127.0.0.1", 7001));
        // Same slot index is very likely reused, but the stale handle must
        // not resolve to the new Node.
        assert!(arena.get(h1).is_none());
        assert_eq!(arena.get(h2).unwrap().port, 7001);
    }

    #[test]
    fn clear_invalidates_everything() {
        let mut arena = NodeArena::new();
        let h = arena.insert(node("127.0.0.1", 7000));
        arena.clear();
        assert!(arena.get(h).is_none());
        assert_eq!(arena.len(), 0);
    }
}
