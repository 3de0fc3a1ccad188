use anyhow::{Result, anyhow};
use std::time::Duration;
use tokio::net::UdpSocket;

use super::node::query_port;
use crate::config::DEFAULT_QUERY_TIMEOUT;
use crate::membership::types::NodeRecord;
use crate::wire::{FixedRecord, QueryRequest, QueryResponse};

/// Looks a record up across storage nodes, one node at a time.
#[derive(Debug, Clone)]
pub struct QueryClient {
    timeout: Duration,
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_TIMEOUT)
    }
}

impl QueryClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Asks each node in order and returns the first record found.
    ///
    /// A node that times out or fails is logged and skipped. `Ok(None)` means every
    /// node answered `NOT_FOUND` or was unreachable.
    pub async fn query(&self, nodes: &[NodeRecord], id: i32) -> Result<Option<FixedRecord>> {
        for node in nodes {
            let port = query_port(node.port)?;

            match self.query_node(&node.host, port, id).await {
                Ok(QueryResponse::Found(record)) => {
                    tracing::info!("Record {} found on {}", id, node);
                    return Ok(Some(record));
                }
                Ok(QueryResponse::NotFound) => {
                    tracing::debug!("Record {} not on {}", id, node);
                }
                Err(e) => {
                    tracing::warn!("Query to {} failed: {}", node, e);
                }
            }
        }

        Ok(None)
    }

    /// Sends one `QUERY:<id>` to `host:port` and waits for the answer.
    pub async fn query_node(&self, host: &str, port: u16, id: i32) -> Result<QueryResponse> {
        // Connected so that a late answer from a previous node cannot be mistaken for this one.
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((host, port)).await?;
        socket.send(QueryRequest { id }.encode().as_bytes()).await?;

        let mut buf = vec![0u8; 1024];
        let len = tokio::time::timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| anyhow!("No answer from {}:{} within {:?}", host, port, self.timeout))??;

        Ok(QueryResponse::decode(&buf[..len])?)
    }
}
