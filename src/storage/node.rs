use anyhow::{Result, anyhow};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::info;

use super::engine::StorageEngine;
use crate::config::{QUERY_PORT_OFFSET, STORAGE_RECEIVE_BUFFER_SIZE};
use crate::endpoint::{Endpoint, stop_tasks};
use crate::transfer::receiver::TransferReceiver;
use crate::wire::{QueryRequest, QueryResponse, Role, StoredChunkFrame};

const QUERY_BUFFER_SIZE: usize = 1024;
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Query port for a node whose data port is `data_port`.
pub fn query_port(data_port: u16) -> Result<u16> {
    data_port
        .checked_add(QUERY_PORT_OFFSET)
        .ok_or_else(|| anyhow!("Data port {} leaves no room for a query port", data_port))
}

/// A storage process: persists incoming chunks and answers point queries.
///
/// Listens on the data port for [`StoredChunkFrame`]s, on the query port for
/// `QUERY:<id>`, and optionally on a transfer port for sequenced transfers.
pub struct StorageNode {
    engine: Arc<StorageEngine>,
    data_socket: Endpoint<UdpSocket>,
    query_socket: Endpoint<UdpSocket>,
    transfer: Option<Endpoint<TransferReceiver>>,
    next_transfer_chunk: AtomicI32,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StorageNode {
    /// Binds the data socket at `data_addr` and the query socket one offset above the
    /// port actually bound.
    pub async fn bind(
        engine: StorageEngine,
        data_addr: SocketAddr,
        transfer_addr: Option<SocketAddr>,
    ) -> Result<Arc<Self>> {
        let data_socket = UdpSocket::bind(data_addr).await?;
        let data_bound = data_socket.local_addr()?;

        let query_addr = SocketAddr::new(data_bound.ip(), query_port(data_bound.port())?);
        let query_socket = UdpSocket::bind(query_addr).await?;

        let transfer = match transfer_addr {
            Some(addr) => Some(Endpoint::new(TransferReceiver::bind(addr).await?)),
            None => None,
        };

        info!(
            "Storage node {} listening for chunks on {}, queries on {}",
            engine.config().node_id,
            data_bound,
            query_socket.local_addr()?
        );

        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            engine: Arc::new(engine),
            data_socket: Endpoint::new(data_socket),
            query_socket: Endpoint::new(query_socket),
            transfer,
            next_transfer_chunk: AtomicI32::new(0),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn engine(&self) -> Arc<StorageEngine> {
        self.engine.clone()
    }

    pub fn data_addr(&self) -> Result<SocketAddr> {
        self.data_socket.local_addr()
    }

    pub fn query_addr(&self) -> Result<SocketAddr> {
        self.query_socket.local_addr()
    }

    pub fn transfer_addr(&self) -> Option<SocketAddr> {
        self.transfer
            .as_ref()
            .and_then(|receiver| receiver.get().ok())
            .and_then(|receiver| receiver.local_addr().ok())
    }

    pub async fn start(self: Arc<Self>) {
        let mut handles = Vec::new();

        handles.push({
            let node = self.clone();
            let shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                node.data_loop(shutdown).await;
            })
        });

        handles.push({
            let node = self.clone();
            let shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                node.query_loop(shutdown).await;
            })
        });

        if let Some(receiver) = self.transfer.as_ref().and_then(|t| t.get().ok()) {
            let node = self.clone();
            let shutdown = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                node.transfer_loop(receiver, shutdown).await;
            }));
        }

        self.tasks.lock().await.extend(handles);
        info!("Storage node {} started", self.engine.config().node_id);
    }

    async fn data_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let Ok(socket) = self.data_socket.get() else {
            return;
        };
        let mut buf = vec![0u8; STORAGE_RECEIVE_BUFFER_SIZE];

        loop {
            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, src)) => self.handle_chunk(&buf[..len], src).await,
                Err(e) => {
                    tracing::error!("Failed to receive chunk: {}", e);
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                }
            }
        }
    }

    async fn handle_chunk(&self, bytes: &[u8], src: SocketAddr) {
        let frame = match StoredChunkFrame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Dropping chunk frame from {}: {}", src, e);
                return;
            }
        };

        tracing::debug!(
            "Chunk {} ({}) from {}, {} bytes",
            frame.chunk_id,
            frame.role,
            src,
            frame.payload.len()
        );

        if let Err(e) = self
            .engine
            .store_chunk(frame.chunk_id, &frame.payload, frame.role)
            .await
        {
            tracing::error!("Failed to store chunk {}: {:#}", frame.chunk_id, e);
        }
    }

    async fn query_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let Ok(socket) = self.query_socket.get() else {
            return;
        };
        let mut buf = vec![0u8; QUERY_BUFFER_SIZE];

        loop {
            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, src)) => self.handle_query(&socket, &buf[..len], src).await,
                Err(e) => {
                    tracing::error!("Failed to receive query: {}", e);
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                }
            }
        }
    }

    async fn handle_query(&self, socket: &UdpSocket, bytes: &[u8], src: SocketAddr) {
        let request = match QueryRequest::decode(bytes) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Dropping query from {}: {}", src, e);
                return;
            }
        };

        let response = match self.engine.query_record(request.id).await {
            Ok(Some(record)) => QueryResponse::Found(record),
            Ok(None) => QueryResponse::NotFound,
            Err(e) => {
                tracing::error!("Query for {} failed: {:#}", request.id, e);
                QueryResponse::NotFound
            }
        };

        tracing::debug!("Query {} from {}: {}", request.id, src, response.encode());

        if let Err(e) = socket.send_to(response.encode().as_bytes(), src).await {
            tracing::warn!("Failed to answer query from {}: {}", src, e);
        }
    }

    /// Stores each completed transfer as one primary chunk with a node-local id.
    async fn transfer_loop(
        self: Arc<Self>,
        receiver: Arc<TransferReceiver>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let payload = tokio::select! {
                _ = shutdown.changed() => break,
                received = receiver.receive() => match received {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!("Transfer failed: {:#}", e);
                        continue;
                    }
                },
            };

            let chunk_id = self.next_transfer_chunk.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = self
                .engine
                .store_chunk(chunk_id, &payload, Role::Primary)
                .await
            {
                tracing::error!("Failed to store transfer as chunk {}: {:#}", chunk_id, e);
            }
        }
    }

    /// Stops every loop and closes the data, query and transfer sockets.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        stop_tasks(handles).await;

        self.data_socket.close();
        self.query_socket.close();
        if let Some(receiver) = &self.transfer {
            receiver.close();
        }

        info!("Storage node {} stopped", self.engine.config().node_id);
    }
}
