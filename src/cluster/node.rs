/// Per-server node record and its outbound connection.
///
/// Grounded on `core/connection.rs` (stream setup / keepalive tuning) and
/// `health/redis.rs` (synchronous-style request/reply over a raw socket,
/// the model for the blocking `AUTH` exchange). The steady-state `Connection`
/// is driven by an external, out-of-scope event loop; this module only
/// exposes the queue/connect/auth primitives spec.md §4.2 and §6 name.
use crate::error::{ClusterError, ClusterResult};
use socket2::{SockRef, TcpKeepalive};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, warn};

use super::request::Request;

/// (slot, peer-name) pair recorded while a slot is migrating away from or
/// importing into this node.
pub type SlotTransfer = (u16, String);

/// A server in the cluster: address, cluster-assigned identity, role, the
/// slots it owns, and its one outbound `Connection`.
#[derive(Debug)]
pub struct Node {
    pub ip: String,
    pub port: u16,
    /// Opaque cluster-assigned identifier; unknown (`None`) until the first
    /// "myself" record names it.
    pub name: Option<String>,
    pub is_replica: bool,
    /// Name of the primary this node replicates, if it is a replica.
    pub replicate: Option<String>,
    /// Sorted slot numbers this node currently owns.
    pub slots: Vec<u16>,
    pub migrating: Vec<SlotTransfer>,
    pub importing: Vec<SlotTransfer>,
    pub connection: Connection,
    /// Set on a duplicate's Node to record which source node it was copied
    /// from; cleared when the parent cluster is freed (invariant 5, §8).
    pub duplicated_from: Option<String>,
}

impl Node {
    /// Allocate a Node bound to no cluster yet (the arena is the owner); a
    /// fresh, unconnected `Connection` and an empty slot set, matching
    /// spec.md §4.2's `create(ip, port, cluster)`.
    pub fn new(ip: String, port: u16) -> Self {
        Self {
            ip,
            port,
            name: None,
            is_replica: false,
            replicate: None,
            slots: Vec::with_capacity(16384),
            migrating: Vec::new(),
            importing: Vec::new(),
            connection: Connection::new(),
            duplicated_from: None,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    fn socket_addr(&self) -> ClusterResult<SocketAddr> {
        self.address()
            .to_socket_addrs()
            .map_err(ClusterError::Network)?
            .next()
            .ok_or_else(|| ClusterError::topology_fetch(self.address(), "unresolvable address"))
    }

    /// Tear down any existing transport (firing `on_disconnect` first), then
    /// open a fresh non-blocking TCP connection with a 15s TCP keepalive
    /// interval. Failure leaves the connection unset; the node stays usable
    /// for a later retry (spec.md §4.2, §7).
    pub fn connect(
        &mut self,
        timeout: Duration,
        keepalive_interval: Duration,
        mut on_disconnect: impl FnMut(&Node),
    ) -> ClusterResult<()> {
        if self.connection.connected {
            on_disconnect(self);
            self.connection.teardown();
        }

        let addr = self.socket_addr()?;
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(ClusterError::Network)?;
        stream.set_nodelay(true).map_err(ClusterError::Network)?;

        let keepalive = TcpKeepalive::new()
            .with_time(keepalive_interval)
            .with_interval(keepalive_interval);
        SockRef::from(&stream)
            .set_tcp_keepalive(&keepalive)
            .map_err(ClusterError::Network)?;

        stream.set_nonblocking(true).map_err(ClusterError::Network)?;

        self.connection.stream = Some(stream);
        self.connection.connected = true;
        debug!(node = %self.address(), "connected");
        Ok(())
    }

    /// Release the transport if one exists, firing the external disconnect
    /// hook first; queues are preserved (spec.md §4.2).
    pub fn disconnect(&mut self, mut on_disconnect: impl FnMut(&Node)) {
        if self.connection.stream.is_some() {
            on_disconnect(self);
            self.connection.teardown();
        }
    }

    /// Issue "CLUSTER NODES" synchronously and return the reply body as
    /// text. Framing follows the RESP bulk-string format (`$<len>\r\n<data>\r\n`),
    /// ported from `parse_cluster_nodes_response`/`find_resp_end`.
    pub fn fetch_topology_text(&self, timeout: Duration) -> ClusterResult<String> {
        let Some(stream) = self.connection.stream.as_ref() else {
            return Err(ClusterError::topology_fetch(self.address(), "not connected"));
        };

        stream
            .set_nonblocking(false)
            .map_err(ClusterError::Network)?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(ClusterError::Network)?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(ClusterError::Network)?;

        let result = (|| -> ClusterResult<String> {
            let mut stream = stream;
            stream
                .write_all(b"*2\r\n$7\r\nCLUSTER\r\n$5\r\nNODES\r\n")
                .map_err(ClusterError::Network)?;

            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = stream.read(&mut chunk).map_err(ClusterError::Network)?;
                if n == 0 {
                    return Err(ClusterError::topology_fetch(
                        self.address(),
                        "connection closed mid-reply",
                    ));
                }
                buf.extend_from_slice(&chunk[..n]);
                if let Some(end) = find_resp_bulk_end(&buf) {
                    buf.truncate(end);
                    break;
                }
                if buf.len() > 16 * 1024 * 1024 {
                    return Err(ClusterError::topology_fetch(self.address(), "reply too large"));
                }
            }

            parse_resp_bulk_string(&buf)
                .ok_or_else(|| ClusterError::topology_fetch(self.address(), "malformed RESP reply"))
        })();

        if let Some(stream) = self.connection.stream.as_ref() {
            let _ = stream.set_nonblocking(true);
        }
        result
    }

    /// Issue `AUTH <secret>` synchronously and parse the reply. Briefly puts
    /// the (non-blocking, steady-state) socket back into blocking mode with
    /// a bounded timeout for this one round trip, then restores it.
    pub fn authenticate(&mut self, secret: &str, timeout: Duration) -> ClusterResult<()> {
        let Some(stream) = self.connection.stream.as_ref() else {
            return Err(ClusterError::auth(self.address(), "not connected"));
        };

        self.connection.authenticating = true;
        let result = (|| -> ClusterResult<()> {
            stream
                .set_nonblocking(false)
                .map_err(ClusterError::Network)?;
            stream
                .set_read_timeout(Some(timeout))
                .map_err(ClusterError::Network)?;
            stream
                .set_write_timeout(Some(timeout))
                .map_err(ClusterError::Network)?;

            let command = format!("*2\r\n$4\r\nAUTH\r\n${}\r\n{}\r\n", secret.len(), secret);
            let mut stream = stream;
            stream
                .write_all(command.as_bytes())
                .map_err(ClusterError::Network)?;

            let mut buf = [0u8; 512];
            let n = stream.read(&mut buf).map_err(ClusterError::Network)?;
            if n == 0 {
                return Err(ClusterError::auth(self.address(), "connection closed"));
            }
            let reply = String::from_utf8_lossy(&buf[..n]);
            if reply.starts_with("+OK") {
                Ok(())
            } else {
                Err(ClusterError::auth(
                    self.address(),
                    reply.trim().trim_start_matches('-').to_string(),
                ))
            }
        })();

        if let Some(stream) = self.connection.stream.as_ref() {
            let _ = stream.set_nonblocking(true);
        }
        self.connection.authenticating = false;

        match result {
            Ok(()) => {
                self.connection.authenticated = true;
                Ok(())
            }
            Err(e) => {
                warn!(node = %self.address(), error = %e, "auth failed");
                Err(e)
            }
        }
    }
}

/// An outbound connection to a `Node`. Owned and mutated only by the worker
/// thread that owns the `Cluster`; never touched across workers (§5).
#[derive(Debug, Default)]
pub struct Connection {
    pub stream: Option<TcpStream>,
    pub connected: bool,
    pub authenticating: bool,
    pub authenticated: bool,
    pub has_read_handler: bool,
    /// Sent, awaiting a reply.
    pub requests_pending: VecDeque<Request>,
    /// Queued, not yet (fully) sent; the front may be mid-write.
    pub requests_to_send: VecDeque<Request>,
}

impl Connection {
    pub fn new() -> Self {
        Self::default()
    }

    fn teardown(&mut self) {
        self.stream = None;
        self.connected = false;
        self.authenticating = false;
        self.authenticated = false;
        self.has_read_handler = false;
    }

    pub fn enqueue(&mut self, request: Request) {
        self.requests_to_send.push_back(request);
    }
}

/// Locate the end of a RESP bulk string (`$<len>\r\n<data>\r\n`) in `buf`,
/// returning the total byte length once the full reply has arrived.
pub(crate) fn find_resp_bulk_end(buf: &[u8]) -> Option<usize> {
    if buf.len() < 4 || buf[0] != b'$' {
        return None;
    }
    let crlf = buf.windows(2).position(|w| w == b"\r\n")?;
    let length: usize = std::str::from_utf8(&buf[1..crlf]).ok()?.parse().ok()?;
    let data_start = crlf + 2;
    let expected_end = data_start + length + 2;
    (buf.len() >= expected_end).then_some(expected_end)
}

pub(crate) fn parse_resp_bulk_string(buf: &[u8]) -> Option<String> {
    if buf.len() < 4 || buf[0] != b'$' {
        return None;
    }
    let crlf = buf.windows(2).position(|w| w == b"\r\n")?;
    let length: usize = std::str::from_utf8(&buf[1..crlf]).ok()?.parse().ok()?;
    let data_start = crlf + 2;
    let data = buf.get(data_start..data_start + length)?;
    Some(String::from_utf8_lossy(data).into_owned())
}
