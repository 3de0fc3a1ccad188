use anyhow::Result;
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{ToSocketAddrs, UdpSocket};

use super::reassembler::ChunkReassembler;
use crate::config::MAX_DATAGRAM_SIZE;
use crate::wire::record::{DecodedRecords, decode_records};
use crate::wire::ChunkFrame;

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Receives one sequenced transfer at a time on its own socket.
pub struct TransferReceiver {
    socket: UdpSocket,
}

impl TransferReceiver {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        tracing::info!("Transfer receiver listening on {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Blocks until a whole transfer has been reassembled and returns its bytes.
    ///
    /// Every datagram on the socket is treated as part of the same transfer. Receive
    /// errors and undecodable frames are logged and skipped.
    pub async fn receive(&self) -> Result<Bytes> {
        let mut reassembler = ChunkReassembler::new();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (len, src) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    tracing::error!("Failed to receive transfer frame: {}", e);
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                    continue;
                }
            };

            let frame = match ChunkFrame::decode(&buf[..len]) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("Ignoring frame from {}: {}", src, e);
                    continue;
                }
            };

            if reassembler.accept(frame)
                && let Some(payload) = reassembler.assemble()
            {
                tracing::info!(
                    "Transfer from {} complete: {} frames, {} bytes",
                    src,
                    reassembler.received(),
                    payload.len()
                );
                return Ok(payload);
            }
        }
    }

    /// [`receive`](Self::receive), then parses the payload as fixed-width records.
    pub async fn receive_records(&self) -> Result<DecodedRecords> {
        let payload = self.receive().await?;
        let decoded = decode_records(&payload);

        if !decoded.is_aligned() {
            tracing::warn!(
                "Transfer of {} bytes ends with {} bytes that do not form a record",
                payload.len(),
                decoded.remainder
            );
        }

        Ok(decoded)
    }
}
