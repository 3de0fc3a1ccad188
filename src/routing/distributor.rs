use anyhow::{Result, bail};
use serde::Serialize;
use std::path::Path;
use tokio::net::{ToSocketAddrs, UdpSocket};

use super::placement::ReplicaPlacement;
use crate::config::DEFAULT_CHUNK_SIZE;
use crate::membership::types::{NodeId, NodeRecord};
use crate::wire::{RECORD_SIZE, Role, StoredChunkFrame};

/// Where one chunk was sent, and which of the two datagrams actually left the socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkPlacement {
    pub chunk_id: i32,
    pub primary: NodeId,
    pub backup: NodeId,
    pub len: usize,
    pub primary_sent: bool,
    pub backup_sent: bool,
}

impl ChunkPlacement {
    /// At least one replica was handed to the network.
    pub fn is_sent(&self) -> bool {
        self.primary_sent || self.backup_sent
    }
}

/// Splits a payload into chunks and sends each one to a primary and a backup node.
pub struct Distributor {
    socket: UdpSocket,
    nodes: Vec<NodeRecord>,
    placement: ReplicaPlacement,
    chunk_size: usize,
}

impl Distributor {
    pub async fn bind(addr: impl ToSocketAddrs, nodes: Vec<NodeRecord>) -> Result<Self> {
        if nodes.is_empty() {
            bail!("No storage nodes to distribute to");
        }

        Ok(Self {
            socket: UdpSocket::bind(addr).await?,
            nodes,
            placement: ReplicaPlacement::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Chunks above the UDP datagram limit will fail to send and be logged.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_placement(mut self, placement: ReplicaPlacement) -> Self {
        self.placement = placement;
        self
    }

    pub fn nodes(&self) -> &[NodeRecord] {
        &self.nodes
    }

    /// Sends every chunk of `data` twice.
    ///
    /// Send failures are logged and recorded on the returned placements rather than
    /// aborting the run.
    pub async fn distribute(&self, data: &[u8]) -> Result<Vec<ChunkPlacement>> {
        let mut placements = Vec::new();

        for (chunk_id, chunk) in (0i32..).zip(data.chunks(self.chunk_size)) {
            let Some((primary, backup)) = self.placement.replicas(&self.nodes) else {
                bail!("No storage nodes to distribute to");
            };

            let primary_sent = self.send_chunk(chunk_id, chunk, Role::Primary, primary).await;
            let backup_sent = self.send_chunk(chunk_id, chunk, Role::Backup, backup).await;

            tracing::debug!(
                "Chunk {} ({} bytes): primary {}, backup {}",
                chunk_id,
                chunk.len(),
                primary.id,
                backup.id
            );

            placements.push(ChunkPlacement {
                chunk_id,
                primary: primary.id,
                backup: backup.id,
                len: chunk.len(),
                primary_sent,
                backup_sent,
            });
        }

        tracing::info!(
            "Distributed {} bytes as {} chunks across {} nodes",
            data.len(),
            placements.len(),
            self.nodes.len()
        );

        let unsent = placements.iter().filter(|p| !p.is_sent()).count();
        if unsent > 0 {
            tracing::warn!("{} of {} chunks reached no storage node", unsent, placements.len());
        }

        Ok(placements)
    }

    pub async fn distribute_file(&self, path: impl AsRef<Path>) -> Result<Vec<ChunkPlacement>> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;

        if data.len() % RECORD_SIZE != 0 {
            tracing::warn!(
                "{} is {} bytes, not a whole number of {}-byte records",
                path.display(),
                data.len(),
                RECORD_SIZE
            );
        }

        self.distribute(&data).await
    }

    async fn send_chunk(&self, chunk_id: i32, chunk: &[u8], role: Role, node: &NodeRecord) -> bool {
        let frame = StoredChunkFrame::new(chunk_id, role, chunk.to_vec());

        match self.socket.send_to(&frame.encode(), node.endpoint()).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    "Failed to send chunk {} ({}, {} bytes) to {}: {}",
                    chunk_id,
                    role,
                    frame.encoded_len(),
                    node,
                    e
                );
                false
            }
        }
    }
}
