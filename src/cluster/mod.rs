/// The cluster aggregate: node list, slot index, reprocess queue, update
/// flags, and the synchronous topology fetch that populates them.
///
/// Grounded on spec.md §3 ("Cluster") and §4.3's `fetchClusterConfiguration`
/// two-pass algorithm (seed, then each friend); no teacher file owns an
/// equivalent aggregate, since the teacher never treats "the cluster" as a
/// single owned object with its own lifecycle.
pub mod arena;
pub mod duplicate;
pub mod node;
pub mod parser;
pub mod reconfig;
pub mod request;
pub mod slot;
pub mod slot_index;

use std::sync::Weak;
use std::time::Duration;

use tracing::{debug, error};

use crate::error::{ClusterError, ClusterResult};

use arena::{NodeArena, NodeHandle};
use node::Node;
use request::ReprocessQueue;
use slot_index::SlotIndex;

pub use reconfig::UpdateResult;

/// Per-worker topology and routing state. Owned by exactly one worker
/// thread; never shared except through the duplication facility's
/// `duplicated_from`/`duplicates` back-links (§5).
pub struct Cluster {
    thread_id: u64,
    nodes: NodeArena,
    slot_index: SlotIndex,
    reprocess: ReprocessQueue,
    updating: bool,
    update_required: bool,
    broken: bool,
    /// Contact address remembered from the last successful fetch, used by
    /// `update()` when no primary survives quiescence (falls back to
    /// `first_mapped_node`).
    last_contact: Option<(String, u16)>,
    duplicated_from: Option<Weak<std::sync::Mutex<Cluster>>>,
    duplicates: Vec<Weak<std::sync::Mutex<Cluster>>>,
}

impl Cluster {
    pub fn new(thread_id: u64) -> Self {
        Self {
            thread_id,
            nodes: NodeArena::new(),
            slot_index: SlotIndex::new(),
            reprocess: ReprocessQueue::new(),
            updating: false,
            update_required: false,
            broken: false,
            last_contact: None,
            duplicated_from: None,
            duplicates: Vec::new(),
        }
    }

    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn is_updating(&self) -> bool {
        self.updating
    }

    pub fn update_required(&self) -> bool {
        self.update_required
    }

    pub fn request_update(&mut self) {
        self.update_required = true;
    }

    /// Inspect the reprocess queue (length/emptiness) without parking or
    /// unparking anything; mutation goes through `add_to_reprocess` /
    /// `remove_from_reprocess` so the client-side mirror stays consistent.
    pub fn reprocess_queue(&self) -> &ReprocessQueue {
        &self.reprocess
    }

    /// Park `request` for replay once reconfiguration ends (spec.md §4.6
    /// `add_to_reprocess`), and mirror it into the client's own reprocess
    /// list via `tracker` (spec.md §6 `client.requests_to_reprocess`).
    pub fn add_to_reprocess(
        &mut self,
        request: request::Request,
        tracker: &mut dyn request::ClientReprocessTracker,
    ) {
        let id = request.id;
        self.reprocess.push(request);
        tracker.track_parked(id);
    }

    /// Unpark a specific request without altering its fields (spec.md §4.6
    /// "reverses the indexing only"), also removing it from the client's
    /// own reprocess list.
    pub fn remove_from_reprocess(
        &mut self,
        id: request::RequestId,
        tracker: &mut dyn request::ClientReprocessTracker,
    ) -> Option<request::Request> {
        let removed = self.reprocess.remove(id);
        if removed.is_some() {
            tracker.untrack_parked(id);
        }
        removed
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeHandle, &Node)> {
        self.nodes.iter()
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&Node> {
        self.nodes.get(handle)
    }

    pub fn node_mut(&mut self, handle: NodeHandle) -> Option<&mut Node> {
        self.nodes.get_mut(handle)
    }

    pub fn slot_of_key(&self, key: &[u8]) -> u16 {
        slot::slot_of(key)
    }

    pub fn node_for_key(&self, key: &[u8]) -> Option<NodeHandle> {
        self.node_for_slot(self.slot_of_key(key))
    }

    pub fn node_for_slot(&self, slot: u16) -> Option<NodeHandle> {
        self.slot_index.node_for_slot(slot)
    }

    pub fn first_mapped_node(&self) -> Option<NodeHandle> {
        self.slot_index.first_mapped()
    }

    /// The first primary encountered in node-list (topology-fetch) order,
    /// ignoring replicas. Used by the reconfiguration controller to pick a
    /// surviving contact and by callers with no better candidate.
    pub fn first_primary(&self) -> Option<(NodeHandle, &Node)> {
        self.nodes.iter().find(|(_, node)| !node.is_replica)
    }

    pub fn node_connect(
        &mut self,
        handle: NodeHandle,
        timeout: Duration,
        keepalive_interval: Duration,
        mut on_disconnect: impl FnMut(&Node),
    ) -> ClusterResult<()> {
        let node = self
            .nodes
            .get_mut(handle)
            .ok_or(ClusterError::DuplicationMissingNode("<unknown>".to_string()))?;
        node.connect(timeout, keepalive_interval, &mut on_disconnect)
    }

    pub fn node_disconnect(&mut self, handle: NodeHandle, mut on_disconnect: impl FnMut(&Node)) {
        if let Some(node) = self.nodes.get_mut(handle) {
            node.disconnect(&mut on_disconnect);
        }
    }

    pub fn node_auth(
        &mut self,
        handle: NodeHandle,
        secret: &str,
        timeout: Duration,
    ) -> ClusterResult<()> {
        let node = self
            .nodes
            .get_mut(handle)
            .ok_or(ClusterError::DuplicationMissingNode("<unknown>".to_string()))?;
        node.authenticate(secret, timeout)
    }

    /// Drop the slot index and every Node (releasing their Connections and
    /// queues), reinstalling empty state. `requests_to_reprocess` and
    /// duplication links survive (§4.5). Every Node still holding a live
    /// transport is disconnected first, firing `on_disconnect` before its
    /// Connection is released, per spec.md §3's Node invariant and §6's
    /// `on_cluster_node_disconnection` hook contract.
    pub fn reset(&mut self, on_disconnect: &mut dyn FnMut(&Node)) -> ClusterResult<()> {
        for (_, node) in self.nodes.iter_mut() {
            node.disconnect(&mut *on_disconnect);
        }
        self.nodes.clear();
        self.slot_index.clear();
        Ok(())
    }

    /// Release the reprocess queue, sever every duplicate's back-link, and
    /// detach from any parent's duplicates list (§4.5). Marks the cluster
    /// unusable for further work; callers must not call `update`/`reset`
    /// afterward.
    pub fn free(&mut self) {
        self.reprocess = ReprocessQueue::new();
        for weak in self.duplicates.drain(..) {
            if let Some(duplicate) = weak.upgrade() {
                if let Ok(mut duplicate) = duplicate.lock() {
                    duplicate.duplicated_from = None;
                    for (_, node) in duplicate.nodes.iter_mut() {
                        node.duplicated_from = None;
                    }
                }
            }
        }
        self.broken = true;
    }

    /// Synchronously fetch and ingest the cluster's topology starting from
    /// `ip:port`: connect to the seed, parse its own record plus collect
    /// friend addresses, then connect to and ingest each friend's own
    /// record in turn. Any failure — including a friend's — is fatal to
    /// the fetch and marks the cluster `broken` if called mid-`update()`
    /// (open question resolved: failures are never papered over, §9).
    pub fn fetch_configuration(
        &mut self,
        ip: &str,
        port: u16,
        timeout: Duration,
        keepalive_interval: Duration,
    ) -> ClusterResult<()> {
        self.fetch_configuration_with_hook(ip, port, timeout, keepalive_interval, &mut |_| {})
    }

    /// Bootstrap a fetch from a Unix domain socket seed (spec.md §4.3,
    /// §6's `seed_port_or_unix_socket`). Gossip always reports every node —
    /// including the seed itself — as an `ip:port` pair, so a Unix socket
    /// can only ever serve as the *first* contact: this issues one
    /// "CLUSTER NODES" over the socket purely to learn the seed's own
    /// announced network address, then delegates node-list/slot-index
    /// population to the ordinary TCP path via that address. Every
    /// steady-state `Node::connection` remains TCP-only.
    #[cfg(unix)]
    pub fn fetch_configuration_via_unix_socket(
        &mut self,
        path: &std::path::Path,
        timeout: Duration,
        keepalive_interval: Duration,
    ) -> ClusterResult<()> {
        use std::io::{Read, Write};
        use std::os::unix::net::UnixStream;

        let label = path.display().to_string();
        let mut stream = UnixStream::connect(path).map_err(ClusterError::Network)?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(ClusterError::Network)?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(ClusterError::Network)?;
        stream
            .write_all(b"*2\r\n$7\r\nCLUSTER\r\n$5\r\nNODES\r\n")
            .map_err(ClusterError::Network)?;

        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let text = loop {
            let n = stream.read(&mut chunk).map_err(ClusterError::Network)?;
            if n == 0 {
                return Err(ClusterError::topology_fetch(
                    label,
                    "connection closed mid-reply",
                ));
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = node::find_resp_bulk_end(&buf) {
                buf.truncate(end);
                break node::parse_resp_bulk_string(&buf).ok_or_else(|| {
                    ClusterError::topology_fetch(label.clone(), "malformed RESP reply")
                })?;
            }
            if buf.len() > 16 * 1024 * 1024 {
                return Err(ClusterError::topology_fetch(label, "reply too large"));
            }
        };

        let records = parser::parse_nodes_text(&text)?;
        let myself = records
            .iter()
            .find(|r| r.is_myself)
            .ok_or_else(|| ClusterError::topology_fetch(label, "reply carried no myself record"))?;

        self.fetch_configuration(&myself.ip, myself.port, timeout, keepalive_interval)
    }

    /// Same as `fetch_configuration`, but forwards `on_disconnect` to every
    /// `Node::connect` call so a caller (the reconfiguration controller) can
    /// react to connections torn down along the way.
    pub(crate) fn fetch_configuration_with_hook(
        &mut self,
        ip: &str,
        port: u16,
        timeout: Duration,
        keepalive_interval: Duration,
        on_disconnect: &mut dyn FnMut(&Node),
    ) -> ClusterResult<()> {
        let seed_handle = self.nodes.insert(Node::new(ip.to_string(), port));
        self.ingest_from(
            seed_handle,
            timeout,
            keepalive_interval,
            true,
            &mut *on_disconnect,
        )?;

        let friends: Vec<NodeHandle> = self
            .nodes
            .iter()
            .map(|(handle, _)| handle)
            .filter(|&h| h != seed_handle)
            .collect();

        for friend in friends {
            self.ingest_from(
                friend,
                timeout,
                keepalive_interval,
                false,
                &mut *on_disconnect,
            )?;
        }

        self.last_contact = Some((ip.to_string(), port));
        debug!(ip, port, nodes = self.nodes.len(), "topology fetch complete");
        Ok(())
    }

    /// Connect to the Node at `handle`, fetch its "CLUSTER NODES" reply,
    /// apply its own record to itself, and — only when `collect_friends` is
    /// set — create a bare Node for every other record seen.
    fn ingest_from(
        &mut self,
        handle: NodeHandle,
        timeout: Duration,
        keepalive_interval: Duration,
        collect_friends: bool,
        on_disconnect: &mut dyn FnMut(&Node),
    ) -> ClusterResult<()> {
        let address = self
            .nodes
            .get(handle)
            .map(|n| n.address())
            .unwrap_or_default();

        {
            let node = self.nodes.get_mut(handle).expect("handle just inserted");
            node.connect(timeout, keepalive_interval, &mut *on_disconnect)
                .map_err(|e| ClusterError::topology_fetch(address.clone(), e.to_string()))?;
        }

        let text = {
            let node = self.nodes.get(handle).expect("handle just inserted");
            node.fetch_topology_text(timeout)
                .map_err(|e| ClusterError::topology_fetch(address.clone(), e.to_string()))?
        };

        let records = parser::parse_nodes_text(&text)?;

        let mut applied_self = false;
        for record in &records {
            if record.is_myself {
                let node = self.nodes.get_mut(handle).expect("handle just inserted");
                parser::apply_self_record(record, node, handle, &mut self.slot_index);
                applied_self = true;
            } else if collect_friends {
                self.nodes.insert(Node::new(record.ip.clone(), record.port));
            }
        }

        if !applied_self {
            error!(address = %address, "topology reply carried no myself record");
            return Err(ClusterError::topology_fetch(
                address,
                "reply carried no myself record",
            ));
        }

        Ok(())
    }
}
