use anyhow::{Result, anyhow};
use tokio::net::{ToSocketAddrs, UdpSocket};

use crate::config::TRANSFER_PAYLOAD_SIZE;
use crate::wire::ChunkFrame;

/// Sends a payload as numbered frames plus a terminal marker.
///
/// Nothing is acknowledged. A lost frame leaves the receiver waiting forever.
pub struct ChunkSender {
    socket: UdpSocket,
    frame_size: usize,
}

impl ChunkSender {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        Ok(Self {
            socket: UdpSocket::bind(addr).await?,
            frame_size: TRANSFER_PAYLOAD_SIZE,
        })
    }

    /// Payload bytes per data frame. Zero is treated as one.
    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size.max(1);
        self
    }

    /// Sends `payload` to `target` and returns the number of data frames declared.
    pub async fn send(&self, payload: &[u8], target: impl ToSocketAddrs) -> Result<u32> {
        let target = tokio::net::lookup_host(target)
            .await?
            .next()
            .ok_or_else(|| anyhow!("Transfer target did not resolve"))?;

        let total = u32::try_from(payload.len().div_ceil(self.frame_size))?;

        for (sequence, slice) in (0u32..).zip(payload.chunks(self.frame_size)) {
            let frame = ChunkFrame::data(sequence, slice.to_vec());
            if let Err(e) = self.socket.send_to(&frame.encode(), target).await {
                tracing::warn!("Failed to send frame {} to {}: {}", sequence, target, e);
            }
        }

        self.socket
            .send_to(&ChunkFrame::terminal(total).encode(), target)
            .await?;

        tracing::info!(
            "Sent {} bytes to {} as {} frames plus terminal marker",
            payload.len(),
            target,
            total
        );

        Ok(total)
    }
}
