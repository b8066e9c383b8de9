/// Cluster duplication: a per-worker sibling snapshot sharing no mutable
/// runtime state with its source.
///
/// Grounded on spec.md §4.7 and Design Notes §9's "arena ownership ... back-
/// references are non-owning handles (stable indices or weak pointers)"
/// guidance; no teacher file owns an equivalent concept. Each `Cluster` is
/// expected to be wrapped in `Arc<Mutex<_>>` by its owning worker so that a
/// duplicate can hold a `Weak` back-link without keeping its source alive.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{ClusterError, ClusterResult};

use super::arena::NodeHandle;
use super::node::Node;
use super::Cluster;

/// Deep-copy `source` into a new cluster for the same worker thread. Every
/// Node is copied by value (fresh string allocations, fresh unconnected
/// Connection); the slot index is rebuilt against the copies' handles.
/// Registers the result in `source`'s duplicates list via a `Weak` link.
pub fn duplicate_cluster(source: &Arc<Mutex<Cluster>>) -> ClusterResult<Arc<Mutex<Cluster>>> {
    let mut src = source.lock().expect("cluster mutex poisoned");

    let mut new_cluster = Cluster::new(src.thread_id);
    let mut name_to_new: HashMap<String, NodeHandle> = HashMap::new();
    let mut src_handle_to_name: HashMap<NodeHandle, String> = HashMap::new();

    for (handle, node) in src.nodes.iter() {
        let name = node
            .name
            .clone()
            .ok_or_else(|| ClusterError::DuplicationMissingNode(node.address()))?;

        let mut copy = Node::new(node.ip.clone(), node.port);
        copy.name = Some(name.clone());
        copy.is_replica = node.is_replica;
        copy.replicate = node.replicate.clone();
        copy.slots = node.slots.clone();
        copy.migrating = node.migrating.clone();
        copy.importing = node.importing.clone();
        copy.duplicated_from = Some(name.clone());

        let new_handle = new_cluster.nodes.insert(copy);
        name_to_new.insert(name.clone(), new_handle);
        src_handle_to_name.insert(handle, name);
    }

    for (start, end, src_handle) in src.slot_index.ranges() {
        let name = src_handle_to_name
            .get(&src_handle)
            .ok_or_else(|| ClusterError::DuplicationMissingNode("<unnamed node>".to_string()))?;
        let new_handle = *name_to_new
            .get(name)
            .ok_or_else(|| ClusterError::DuplicationMissingNode(name.clone()))?;
        new_cluster.slot_index.map_range(start, end, new_handle);
    }

    let duplicate = Arc::new(Mutex::new(new_cluster));
    duplicate
        .lock()
        .expect("new cluster mutex poisoned")
        .duplicated_from = Some(Arc::downgrade(source));
    src.duplicates.push(Arc::downgrade(&duplicate));

    Ok(duplicate)
}

/// Tear down `cluster`: release its reprocess queue, sever every one of
/// *its* duplicates' back-links, and mark it `broken`. Does not remove
/// `cluster` from its own parent's duplicates list — that list is pruned
/// lazily (`Weak` upgrades fail once this cluster is dropped).
pub fn free_cluster(cluster: &Arc<Mutex<Cluster>>) {
    cluster.lock().expect("cluster mutex poisoned").free();
}
