/// In-flight request bookkeeping: identity, the reprocess (parking) queue
/// used during reconfiguration, and the trait seams external collaborators
/// (the socket multiplexer, the worker dispatcher) implement.
///
/// Grounded on spec.md §3 ("Request") and §6 (collaborator interfaces); no
/// teacher file owns an equivalent concept, since the teacher's proxy modes
/// never pause and replay in-flight work across a topology swap.
use std::collections::BTreeMap;

#[cfg(test)]
use super::arena::NodeArena;
use super::arena::NodeHandle;
#[cfg(test)]
use super::node::Node;

/// Identifies a request across a reconfiguration: which client it arrived
/// on, and a sequence number unique within that client's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId {
    pub client_id: u64,
    pub id: u64,
}

impl RequestId {
    /// Lexicographic `"<client_id>:<id>"` key, used as the `ReprocessQueue`
    /// ordering key so replay order matches the source implementation's
    /// observable behavior (Open Question, resolved: preserve it).
    fn sort_key(&self) -> String {
        format!("{}:{}", self.client_id, self.id)
    }
}

/// A request in flight against the cluster: its routing key, the command
/// bytes, which node (if any) it has been dispatched to, and whether a
/// reply is still owed to the client that sent it.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub key: Vec<u8>,
    /// Cached slot for `key`, `None` while unassigned (reset to `None`,
    /// rather than a sentinel, when parked).
    pub slot: Option<u16>,
    /// The node this request is currently addressed to, `None` before first
    /// dispatch or after the owning node has been torn down by `reset`.
    pub node: Option<NodeHandle>,
    /// Bytes of the command already written to the node's socket; a
    /// request with `written > 0` is mid-write and must not be relocated.
    pub written: usize,
    pub has_write_handler: bool,
    /// Set while this request is parked in the reprocess queue awaiting a
    /// reconfiguration to finish.
    pub need_reprocessing: bool,
    /// Multi-key fan-out relationships; severed (set to `None`/emptied of
    /// dangling entries) alongside `node` whenever a reconfig invalidates
    /// the Node they pointed into.
    pub parent: Option<RequestId>,
    pub children: Vec<RequestId>,
}

impl Request {
    pub fn new(client_id: u64, id: u64, key: Vec<u8>) -> Self {
        Self {
            id: RequestId { client_id, id },
            key,
            slot: None,
            node: None,
            written: 0,
            has_write_handler: false,
            need_reprocessing: false,
            parent: None,
            children: Vec::new(),
        }
    }
}

/// Requests parked during a reconfiguration, ordered the way the source
/// implementation walks them: lexicographically by `"client_id:id"`.
#[derive(Debug, Default)]
pub struct ReprocessQueue {
    requests: BTreeMap<String, Request>,
}

impl ReprocessQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a request: mark it for reprocessing and strip the routing state
    /// that a reconfiguration is about to invalidate (§4.6 `add_to_reprocess`).
    pub fn push(&mut self, mut request: Request) {
        request.need_reprocessing = true;
        request.node = None;
        request.slot = None;
        request.written = 0;
        self.requests.insert(request.id.sort_key(), request);
    }

    /// Unpark a specific request without altering its fields (§4.6
    /// `remove_from_reprocess` "reverses the indexing only").
    pub fn remove(&mut self, id: RequestId) -> Option<Request> {
        self.requests.remove(&id.sort_key())
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Drain every parked request in replay order, clearing
    /// `need_reprocessing` on each as it leaves the queue (§4.6 step 6).
    pub fn drain(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.requests)
            .into_values()
            .map(|mut r| {
                r.need_reprocessing = false;
                r
            })
            .collect()
    }
}

/// Hands a request back to its eventual destination: either re-dispatched
/// to a node, or (when `node` is `None`) answered directly (e.g. with an
/// error the cluster itself produced).
pub trait RequestProcessor {
    fn process_request(&mut self, request: Request, node: Option<NodeHandle>);
}

/// Resolves a `RequestId` back to the live `Request` it names, for code
/// that only has an id (e.g. a parsed redirection) and needs the original
/// key/command bytes to resend.
pub trait RequestRegistry {
    fn resolve(&mut self, id: RequestId) -> Option<&mut Request>;
}

/// Mirrors a parked request into its owning client's own reprocess list
/// (spec.md §6's `client.requests_to_reprocess`), kept by the host
/// application rather than this crate so a client that disconnects
/// mid-reconfiguration can find and cancel its own parked requests without
/// walking the whole cluster-wide `ReprocessQueue`.
pub trait ClientReprocessTracker {
    fn track_parked(&mut self, id: RequestId);
    fn untrack_parked(&mut self, id: RequestId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reprocess_queue_orders_lexicographically() {
        let mut queue = ReprocessQueue::new();
        queue.push(Request::new(2, 1, b"a".to_vec()));
        queue.push(Request::new(10, 1, b"b".to_vec()));
        queue.push(Request::new(2, 2, b"c".to_vec()));

        let drained = queue.drain();
        let ids: Vec<RequestId> = drained.iter().map(|r| r.id).collect();
        // "10:1" < "2:1" < "2:2" lexicographically, not numerically.
        assert_eq!(
            ids,
            vec![
                RequestId { client_id: 10, id: 1 },
                RequestId { client_id: 2, id: 1 },
                RequestId { client_id: 2, id: 2 },
            ]
        );
    }

    #[test]
    fn push_parks_and_clears_node() {
        let mut arena = NodeArena::new();
        let handle = arena.insert(Node::new("127.0.0.1".to_string(), 7000));

        let mut queue = ReprocessQueue::new();
        let mut request = Request::new(1, 1, b"k".to_vec());
        request.node = Some(handle);
        queue.push(request);
        let parked = queue.drain().pop().unwrap();
        assert!(!parked.need_reprocessing);
        assert!(parked.node.is_none());
    }

    #[test]
    fn remove_takes_specific_request() {
        let mut queue = ReprocessQueue::new();
        queue.push(Request::new(1, 1, b"a".to_vec()));
        queue.push(Request::new(1, 2, b"b".to_vec()));

        let removed = queue.remove(RequestId { client_id: 1, id: 1 }).unwrap();
        assert_eq!(removed.key, b"a");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drain_empties_queue() {
        let mut queue = ReprocessQueue::new();
        queue.push(Request::new(1, 1, b"a".to_vec()));
        assert!(!queue.is_empty());
        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert!(queue.is_empty());
    }
}
