use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Identity key of a cluster member. Addresses may change across rejoins, ids do not.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub i32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether this process coordinates the cluster or follows it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    /// Admits joins, broadcasts snapshots and runs failure detection.
    Leader,
    Member,
}

impl Role {
    pub fn is_leader(self) -> bool {
        matches!(self, Role::Leader)
    }
}

/// A single member in the cluster.
///
/// `last_seen` is local bookkeeping only: it never travels on the wire and is reset to
/// "now" whenever a record is admitted or refreshed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub host: String,
    pub port: u16,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

impl NodeRecord {
    pub fn new(id: NodeId, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            host: host.into(),
            port,
            last_seen: None,
        }
    }

    /// `(host, port)` pair accepted by `tokio::net::UdpSocket::send_to`.
    pub fn endpoint(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }

    /// Time since this node was last admitted or refreshed, as of `now`.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.last_seen
            .map(|seen| now.saturating_duration_since(seen))
    }
}

impl PartialEq for NodeRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.host == other.host && self.port == other.port
    }
}

impl fmt::Display for NodeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {} at {}:{}", self.id, self.host, self.port)
    }
}
