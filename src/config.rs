//! Cluster Configuration
//!
//! Protocol constants plus the per-process settings each service is built from.
//! Values come from code defaults, overridden by CLI flags or, for the client side,
//! by environment variables (`MANAGER_HOST`, `MANAGER_PORT`, `STORAGE_NODES`).

use anyhow::{Result, anyhow};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::membership::types::{NodeId, NodeRecord, Role};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_FAILURE_TIMEOUT: Duration = Duration::from_millis(15000);
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(15000);

/// Distributor chunk size (1 MiB). The final chunk of a buffer may be shorter.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
/// Largest payload one IPv4 UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;
/// Data bytes per sequenced transfer frame: 70 records, fits a 1500-byte MTU.
pub const TRANSFER_PAYLOAD_SIZE: usize = 1400;

/// Storage data sockets accept one 1 MiB chunk plus its frame header.
pub const STORAGE_RECEIVE_BUFFER_SIZE: usize = DEFAULT_CHUNK_SIZE + 1024;

/// Storage nodes answer queries on `data port + QUERY_PORT_OFFSET`.
pub const QUERY_PORT_OFFSET: u16 = 1000;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(8);

pub const DEFAULT_MANAGER_HOST: &str = "manager";
pub const DEFAULT_MANAGER_PORT: u16 = 9000;
pub const DEFAULT_STATIC_NODES: &str = "node1:8001:1,node2:8002:2,node3:8003:3";
pub const DEFAULT_FILE_PREFIX: &str = "chunk-store";

/// Settings for one [`MembershipService`](crate::membership::service::MembershipService).
#[derive(Debug, Clone)]
pub struct MembershipConfig {
    pub node_id: NodeId,
    pub bind_addr: SocketAddr,
    /// Host other nodes should use to reach us; sent in heartbeats and snapshots.
    pub advertise_host: String,
    pub role: Role,
    pub heartbeat_interval: Duration,
    pub failure_timeout: Duration,
    pub scan_interval: Duration,
}

impl MembershipConfig {
    pub fn new(node_id: NodeId, bind_addr: SocketAddr, role: Role) -> Self {
        let advertise_host = if bind_addr.ip().is_unspecified() {
            "127.0.0.1".to_string()
        } else {
            bind_addr.ip().to_string()
        };

        Self {
            node_id,
            bind_addr,
            advertise_host,
            role,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            failure_timeout: DEFAULT_FAILURE_TIMEOUT,
            scan_interval: DEFAULT_SCAN_INTERVAL,
        }
    }

    pub fn with_advertise_host(mut self, host: impl Into<String>) -> Self {
        self.advertise_host = host.into();
        self
    }
}

/// Where a storage node keeps its data log and index.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub node_id: NodeId,
    pub data_dir: PathBuf,
    pub file_prefix: String,
}

impl StorageConfig {
    pub fn new(node_id: NodeId, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            node_id,
            data_dir: data_dir.into(),
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
        }
    }

    pub fn data_path(&self) -> PathBuf {
        self.data_dir
            .join(format!("{}-{}.dat", self.file_prefix, self.node_id))
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir
            .join(format!("{}-{}.idx", self.file_prefix, self.node_id))
    }
}

/// How distributors and query clients find storage nodes.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub manager_host: String,
    pub manager_port: u16,
    pub static_nodes: String,
    pub bootstrap_timeout: Duration,
    pub query_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            manager_host: DEFAULT_MANAGER_HOST.to_string(),
            manager_port: DEFAULT_MANAGER_PORT,
            static_nodes: DEFAULT_STATIC_NODES.to_string(),
            bootstrap_timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let manager_host =
            std::env::var("MANAGER_HOST").unwrap_or_else(|_| defaults.manager_host.clone());
        let manager_port = std::env::var("MANAGER_PORT")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(defaults.manager_port);
        let static_nodes = std::env::var("STORAGE_NODES")
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .unwrap_or_else(|| defaults.static_nodes.clone());

        Self {
            manager_host,
            manager_port,
            static_nodes,
            ..defaults
        }
    }

    pub fn static_nodes(&self) -> Result<Vec<NodeRecord>> {
        parse_static_nodes(&self.static_nodes)
    }
}

/// Parses `host:port:id` entries separated by commas.
pub fn parse_static_nodes(list: &str) -> Result<Vec<NodeRecord>> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').collect();
            let [host, port, id] = parts.as_slice() else {
                return Err(anyhow!("Expected host:port:id, got '{}'", entry));
            };

            let port: u16 = port
                .parse()
                .map_err(|_| anyhow!("Invalid port in '{}'", entry))?;
            let id: i32 = id
                .parse()
                .map_err(|_| anyhow!("Invalid node id in '{}'", entry))?;

            Ok(NodeRecord::new(NodeId(id), *host, port))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_static_nodes() {
        let nodes = parse_static_nodes("node1:8001:1, node2:8002:2").unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0], NodeRecord::new(NodeId(1), "node1", 8001));
        assert_eq!(nodes[1], NodeRecord::new(NodeId(2), "node2", 8002));
    }

    #[test]
    fn test_parse_static_nodes_rejects_bad_entries() {
        assert!(parse_static_nodes("node1:8001").is_err());
        assert!(parse_static_nodes("node1:port:1").is_err());
        assert!(parse_static_nodes("").unwrap().is_empty());
    }

    #[test]
    fn test_default_static_nodes() {
        let nodes = ClientConfig::default().static_nodes().unwrap();
        let ports: Vec<u16> = nodes.iter().map(|n| n.port).collect();
        assert_eq!(ports, vec![8001, 8002, 8003]);
    }

    #[test]
    fn test_storage_paths_keyed_by_node() {
        let config = StorageConfig::new(NodeId(3), "/tmp/store");
        assert_eq!(
            config.data_path(),
            PathBuf::from("/tmp/store/chunk-store-3.dat")
        );
        assert_eq!(
            config.index_path(),
            PathBuf::from("/tmp/store/chunk-store-3.idx")
        );
    }

    #[test]
    fn test_advertise_host_defaults() {
        let wildcard = MembershipConfig::new(NodeId(1), "0.0.0.0:9000".parse().unwrap(), Role::Leader);
        assert_eq!(wildcard.advertise_host, "127.0.0.1");

        let bound = MembershipConfig::new(NodeId(2), "10.1.2.3:9001".parse().unwrap(), Role::Member);
        assert_eq!(bound.advertise_host, "10.1.2.3");
        assert_eq!(bound.heartbeat_interval, Duration::from_millis(5000));
    }
}
