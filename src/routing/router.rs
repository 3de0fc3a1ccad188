use anyhow::{Result, bail};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::info;

use super::placement::ReplicaPlacement;
use crate::config::MAX_DATAGRAM_SIZE;
use crate::endpoint::{Endpoint, stop_tasks};
use crate::membership::types::{NodeId, NodeRecord};
use crate::wire::ChunkFrame;
use crate::wire::chunk::SEQUENCE_HEADER_LEN;

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Stateless relay in front of the storage nodes.
pub struct Router {
    socket: Endpoint<UdpSocket>,
    peers: Vec<NodeRecord>,
    placement: ReplicaPlacement,
    routed: AtomicU64,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Router {
    /// Needs at least two peers so that every frame has two distinct destinations.
    pub async fn bind(addr: SocketAddr, peers: Vec<NodeRecord>) -> Result<Arc<Self>> {
        Self::with_placement(addr, peers, ReplicaPlacement::new()).await
    }

    pub async fn with_placement(
        addr: SocketAddr,
        peers: Vec<NodeRecord>,
        placement: ReplicaPlacement,
    ) -> Result<Arc<Self>> {
        if peers.len() < 2 {
            bail!("Router needs at least 2 peers, got {}", peers.len());
        }

        let socket = UdpSocket::bind(addr).await?;
        info!(
            "Router listening on {}, forwarding to {} peers",
            socket.local_addr()?,
            peers.len()
        );

        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            socket: Endpoint::new(socket),
            peers,
            placement,
            routed: AtomicU64::new(0),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peers(&self) -> &[NodeRecord] {
        &self.peers
    }

    /// Frames forwarded so far.
    pub fn routed(&self) -> u64 {
        self.routed.load(Ordering::Relaxed)
    }

    pub async fn start(self: Arc<Self>) {
        let router = self.clone();
        let shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            router.receive_loop(shutdown).await;
        });

        self.tasks.lock().await.push(handle);
    }

    async fn receive_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let Ok(socket) = self.socket.get() else {
            return;
        };
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, src)) if len < SEQUENCE_HEADER_LEN => {
                    tracing::warn!("Ignoring {}-byte frame from {}", len, src);
                }
                Ok((len, _)) => {
                    self.route(&buf[..len]).await;
                }
                Err(e) => {
                    tracing::error!("Failed to receive frame: {}", e);
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Forwards `frame` unmodified to a random peer and the one after it.
    ///
    /// `None` once the router has been shut down.
    pub async fn route(&self, frame: &[u8]) -> Option<(NodeId, NodeId)> {
        let socket = self.socket.get().ok()?;
        let (primary, backup) = self.placement.replicas(&self.peers)?;

        for peer in [primary, backup] {
            if let Err(e) = socket.send_to(frame, peer.endpoint()).await {
                tracing::warn!("Failed to forward {} bytes to {}: {}", frame.len(), peer, e);
            }
        }

        match ChunkFrame::decode(frame) {
            Ok(ChunkFrame::Terminal { total }) => {
                tracing::debug!("Forwarded terminal marker ({} frames) to {} and {}", total, primary.id, backup.id);
            }
            Ok(ChunkFrame::Data { sequence, payload }) => {
                tracing::debug!(
                    "Forwarded frame {} ({} bytes) to {} and {}",
                    sequence,
                    payload.len(),
                    primary.id,
                    backup.id
                );
            }
            Err(_) => {}
        }

        self.routed.fetch_add(1, Ordering::Relaxed);
        Some((primary.id, backup.id))
    }

    /// Stops the relay loop and closes the socket.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        stop_tasks(handles).await;
        self.socket.close();

        info!("Router stopped after {} frames", self.routed());
    }
}
