/// Background node liveness probe.
///
/// Supplemental ambient component (SPEC_FULL.md §2.1): a lightweight
/// PING-based reachability tracker, grounded on the teacher's
/// `health/redis.rs::redis_ping_check`. It exists purely so a long-running
/// process has some visibility into which nodes answer between
/// reconfiguration cycles; it is advisory only and the reconfiguration
/// controller's "first primary encountered" contact selection (spec.md
/// §4.6 step 2) never consults it.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, warn};

const PING_COMMAND: &[u8] = b"*1\r\n$4\r\nPING\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable,
}

/// Tracks the last-observed reachability of a set of `ip:port` addresses.
/// Cheap to clone: the status table is shared behind an `Arc`.
#[derive(Clone, Default)]
pub struct LivenessProbe {
    status: Arc<RwLock<HashMap<String, Reachability>>>,
}

impl LivenessProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_reachable(&self, address: &str) -> Option<Reachability> {
        self.status.read().await.get(address).copied()
    }

    pub async fn snapshot(&self) -> HashMap<String, Reachability> {
        self.status.read().await.clone()
    }

    /// Run forever, pinging every address in `addresses` once per `interval`.
    /// Intended to be spawned onto the host binary's `tokio` runtime.
    pub async fn run(&self, addresses: Vec<String>, interval: Duration, timeout_per_node: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for address in &addresses {
                let result = ping_once(address, timeout_per_node).await;
                let mut guard = self.status.write().await;
                match &result {
                    Ok(()) => {
                        debug!(address, "node reachable");
                        guard.insert(address.clone(), Reachability::Reachable);
                    }
                    Err(error) => {
                        warn!(address, %error, "node unreachable");
                        guard.insert(address.clone(), Reachability::Unreachable);
                    }
                }
            }
        }
    }
}

async fn ping_once(address: &str, timeout_duration: Duration) -> Result<(), String> {
    let mut stream = timeout(timeout_duration, TcpStream::connect(address))
        .await
        .map_err(|_| "connect timed out".to_string())?
        .map_err(|e| e.to_string())?;

    timeout(timeout_duration, stream.write_all(PING_COMMAND))
        .await
        .map_err(|_| "write timed out".to_string())?
        .map_err(|e| e.to_string())?;

    let mut buf = [0u8; 64];
    let n = timeout(timeout_duration, stream.read(&mut buf))
        .await
        .map_err(|_| "read timed out".to_string())?
        .map_err(|e| e.to_string())?;

    if n == 0 {
        return Err("connection closed".to_string());
    }
    if buf[..n].starts_with(b"+PONG") {
        Ok(())
    } else {
        Err(format!(
            "unexpected reply: {:?}",
            String::from_utf8_lossy(&buf[..n])
        ))
    }
}
