//! Membership Bootstrap
//!
//! The integration boundary between the best-effort control plane and callers that need
//! a node list now (distributors, query clients). The core protocol never retries; this
//! module adds a caller-chosen timeout and [`RetryPolicy`], then falls back to the static
//! node list when the manager cannot be reached.

use anyhow::{Result, anyhow};
use std::time::Duration;
use tokio::net::UdpSocket;

use super::types::NodeRecord;
use crate::config::ClientConfig;
use crate::wire::ControlMessage;

/// Decides whether and when a failed bootstrap request is retried.
pub trait RetryPolicy: Send + Sync {
    /// Delay before the next try after `attempt` (1-based) failed, or `None` to give up.
    fn next_delay(&self, attempt: usize) -> Option<Duration>;
}

/// One attempt, no retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_delay(&self, _attempt: usize) -> Option<Duration> {
        None
    }
}

/// Exponential backoff with up to 50 ms of jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub attempts: usize,
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 3,
            base: Duration::from_millis(150),
            max: Duration::from_millis(1200),
        }
    }
}

impl RetryPolicy for Backoff {
    fn next_delay(&self, attempt: usize) -> Option<Duration> {
        if attempt >= self.attempts {
            return None;
        }

        let exponent = attempt.saturating_sub(1).min(16) as u32;
        let delay = self.base.saturating_mul(1 << exponent).min(self.max);
        let jitter = rand::random::<u64>() % 50;

        Some(delay + Duration::from_millis(jitter))
    }
}

/// Asks the manager at `host:port` for its snapshot, waiting at most `timeout` per attempt.
pub async fn fetch_snapshot(
    host: &str,
    port: u16,
    timeout: Duration,
    policy: &dyn RetryPolicy,
) -> Result<Vec<NodeRecord>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let mut attempt = 0;

    loop {
        attempt += 1;

        match request_snapshot(&socket, host, port, timeout).await {
            Ok(members) => {
                tracing::info!(
                    "Fetched {} members from manager {}:{}",
                    members.len(),
                    host,
                    port
                );
                return Ok(members);
            }
            Err(e) => match policy.next_delay(attempt) {
                Some(delay) => {
                    tracing::warn!(
                        "Membership request to {}:{} failed (attempt {}): {}",
                        host,
                        port,
                        attempt,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(e),
            },
        }
    }
}

async fn request_snapshot(
    socket: &UdpSocket,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<Vec<NodeRecord>> {
    socket
        .send_to(
            ControlMessage::MembershipRequest.encode().as_bytes(),
            (host, port),
        )
        .await?;

    let deadline = tokio::time::Instant::now() + timeout;
    let mut buf = vec![0u8; 65536];

    loop {
        let (len, src) = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf))
            .await
            .map_err(|_| anyhow!("No membership response within {:?}", timeout))??;

        match ControlMessage::decode(&buf[..len]) {
            Ok(ControlMessage::MembershipResponse { members }) => return Ok(members),
            Ok(other) => {
                tracing::debug!("Ignoring {} from {} while bootstrapping", other.kind(), src);
            }
            Err(e) => {
                tracing::warn!("Dropping malformed frame from {}: {}", src, e);
            }
        }
    }
}

/// The storage nodes a client should talk to.
///
/// Uses the manager's snapshot minus the manager itself; falls back to
/// `config.static_nodes` when the manager is unreachable or reports no storage nodes.
pub async fn resolve_storage_nodes(
    config: &ClientConfig,
    policy: &dyn RetryPolicy,
) -> Result<Vec<NodeRecord>> {
    match fetch_snapshot(
        &config.manager_host,
        config.manager_port,
        config.bootstrap_timeout,
        policy,
    )
    .await
    {
        Ok(members) => {
            let nodes: Vec<NodeRecord> = members
                .into_iter()
                .filter(|member| member.port != config.manager_port)
                .collect();

            if !nodes.is_empty() {
                return Ok(nodes);
            }
            tracing::warn!("Manager reported no storage nodes, using static configuration");
        }
        Err(e) => {
            tracing::warn!("Manager unavailable ({}), using static configuration", e);
        }
    }

    config.static_nodes()
}
