use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::info;

use super::table::MembershipTable;
use super::types::{NodeId, NodeRecord, Role};
use crate::config::MembershipConfig;
use crate::endpoint::{Endpoint, stop_tasks};
use crate::wire::ControlMessage;

const RECEIVE_BUFFER_SIZE: usize = 65536;
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub struct MembershipService {
    pub local_node: NodeRecord,
    pub role: Role,
    members: Arc<MembershipTable>,
    socket: Endpoint<UdpSocket>,
    config: MembershipConfig,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MembershipService {
    pub async fn bind(config: MembershipConfig) -> Result<Arc<Self>> {
        Self::with_table(config, Arc::new(MembershipTable::new())).await
    }

    /// Binds the control socket and registers the local node in `members`.
    ///
    /// When `config.bind_addr` uses port 0 the advertised port is the one the OS picked.
    pub async fn with_table(
        config: MembershipConfig,
        members: Arc<MembershipTable>,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(config.bind_addr).await?;
        let port = socket.local_addr()?.port();

        let local_node = NodeRecord::new(config.node_id, config.advertise_host.clone(), port);
        members.upsert(local_node.clone());

        info!(
            "Membership socket bound to {} as node {} ({:?})",
            socket.local_addr()?,
            config.node_id,
            config.role
        );

        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            local_node,
            role: config.role,
            members,
            socket: Endpoint::new(socket),
            config,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn table(&self) -> Arc<MembershipTable> {
        self.members.clone()
    }

    /// The current snapshot, ordered by node id.
    pub fn members(&self) -> Vec<NodeRecord> {
        self.members.snapshot()
    }

    /// Every known member except this node.
    pub fn peers(&self) -> Vec<NodeRecord> {
        self.members.peers(self.local_node.id)
    }

    pub fn get_member(&self, id: NodeId) -> Option<NodeRecord> {
        self.members.get(id)
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Announces this node to the leader and asks for the full snapshot.
    ///
    /// Both frames are fire-and-forget: if neither arrives the node simply stays alone
    /// until a heartbeat reaches someone who knows it.
    pub async fn join(&self, leader_host: &str, leader_port: u16) -> Result<()> {
        if self.role.is_leader() {
            info!("Leader does not join a cluster");
            return Ok(());
        }

        let join = ControlMessage::Join {
            node_id: self.local_node.id,
            port: self.local_node.port,
        };

        let socket = self.socket.get()?;
        socket
            .send_to(join.encode().as_bytes(), (leader_host, leader_port))
            .await?;
        info!("Sent join request to {}:{}", leader_host, leader_port);

        socket
            .send_to(
                ControlMessage::MembershipRequest.encode().as_bytes(),
                (leader_host, leader_port),
            )
            .await?;

        Ok(())
    }

    pub async fn start(self: Arc<Self>) {
        info!(
            "Starting membership service for node {} ({:?})",
            self.local_node.id, self.role
        );

        let mut handles = Vec::new();

        handles.push({
            let service = self.clone();
            let shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                service.receive_loop(shutdown).await;
            })
        });

        handles.push({
            let service = self.clone();
            let shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                service.heartbeat_loop(shutdown).await;
            })
        });

        if self.role.is_leader() {
            let service = self.clone();
            let shutdown = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                service.failure_detection_loop(shutdown).await;
            }));
        }

        self.tasks.lock().await.extend(handles);

        info!("All background tasks started");
    }

    async fn receive_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let Ok(socket) = self.socket.get() else {
            return;
        };
        let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];

        loop {
            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, src)) => match ControlMessage::decode(&buf[..len]) {
                    Ok(msg) => self.handle_message(msg, src).await,
                    Err(e) => {
                        tracing::warn!("Dropping malformed control frame from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                }
            }
        }

        tracing::debug!("Receive loop for node {} stopped", self.local_node.id);
    }

    pub(crate) async fn handle_message(&self, msg: ControlMessage, src: SocketAddr) {
        tracing::debug!("Received {} from {}", msg.kind(), src);

        match msg {
            ControlMessage::Join { node_id, port } => {
                self.handle_join(node_id, port, src).await;
            }

            ControlMessage::Heartbeat { node_id, endpoint } => {
                self.handle_heartbeat(node_id, endpoint, src);
            }

            ControlMessage::Leave { node_id } => {
                self.handle_leave(node_id).await;
            }

            ControlMessage::MembershipRequest => {
                let host = src.ip().to_string();
                self.send_snapshot((&host, src.port())).await;
            }

            ControlMessage::MembershipResponse { members } => {
                self.handle_membership_response(members);
            }
        }
    }

    /// Registers the joiner under the packet's observed source IP, never a client-declared one.
    async fn handle_join(&self, node_id: NodeId, port: u16, src: SocketAddr) {
        if !self.role.is_leader() {
            tracing::debug!("Ignoring JOIN from {} on a non-leader", src);
            return;
        }

        let node = NodeRecord::new(node_id, src.ip().to_string(), port);
        info!("Node {} joining cluster at {}:{}", node.id, node.host, node.port);
        self.members.upsert(node);

        info!("Cluster size now: {}", self.members.len());

        let host = src.ip().to_string();
        self.send_snapshot((&host, src.port())).await;
        self.broadcast_snapshot(Some(node_id)).await;
    }

    /// Any node may self-announce through a heartbeat, not only through JOIN.
    fn handle_heartbeat(&self, node_id: NodeId, endpoint: Option<(String, u16)>, src: SocketAddr) {
        if self.members.touch(node_id) {
            return;
        }

        let (host, port) = endpoint.unwrap_or_else(|| (src.ip().to_string(), src.port()));
        let node = NodeRecord::new(node_id, host, port);

        info!("Discovered new member via heartbeat: {}", node);
        self.members.upsert(node);
    }

    async fn handle_leave(&self, node_id: NodeId) {
        if node_id == self.local_node.id {
            return;
        }

        match self.members.remove(node_id) {
            Some(node) => info!("{} left the cluster", node),
            None => tracing::debug!("LEAVE for unknown node {}", node_id),
        }

        if self.role.is_leader() {
            self.broadcast_snapshot(None).await;
        }
    }

    fn handle_membership_response(&self, members: Vec<NodeRecord>) {
        self.members.replace_all(members, Instant::now());

        if !self.members.contains(self.local_node.id) {
            self.members.upsert(self.local_node.clone());
        }

        info!("Membership snapshot updated, {} members", self.members.len());
    }

    async fn heartbeat_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => self.send_heartbeats().await,
            }
        }
    }

    pub async fn send_heartbeats(&self) {
        let heartbeat = ControlMessage::heartbeat(
            self.local_node.id,
            &self.config.advertise_host,
            self.local_node.port,
        );

        for peer in self.peers() {
            self.send_control(&heartbeat, peer.endpoint()).await;
        }
    }

    async fn failure_detection_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let scan = self.config.scan_interval;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + scan, scan);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    self.detect_failures_at(Instant::now()).await;
                }
            }
        }
    }

    /// Evicts every peer silent for longer than the failure timeout and, if anything
    /// was evicted, broadcasts the surviving snapshot. No-op on members.
    pub async fn detect_failures_at(&self, now: Instant) -> Vec<NodeRecord> {
        if !self.role.is_leader() {
            return Vec::new();
        }

        let evicted =
            self.members
                .evict_stale(self.local_node.id, now, self.config.failure_timeout);

        for node in &evicted {
            tracing::warn!(
                "{} declared failed (no heartbeat for over {:?})",
                node,
                self.config.failure_timeout
            );
        }

        if !evicted.is_empty() {
            info!("Cluster size now: {}", self.members.len());
            self.broadcast_snapshot(None).await;
        }

        evicted
    }

    async fn send_snapshot(&self, target: (&str, u16)) {
        let response = ControlMessage::MembershipResponse {
            members: self.members.snapshot(),
        };
        self.send_control(&response, target).await;
    }

    async fn broadcast_snapshot(&self, exclude: Option<NodeId>) {
        let response = ControlMessage::MembershipResponse {
            members: self.members.snapshot(),
        };

        for peer in self.peers() {
            if Some(peer.id) == exclude {
                continue;
            }
            self.send_control(&response, peer.endpoint()).await;
        }
    }

    async fn send_control(&self, msg: &ControlMessage, target: (&str, u16)) {
        let Ok(socket) = self.socket.get() else {
            tracing::debug!("Not sending {}, socket closed", msg.kind());
            return;
        };

        if let Err(e) = socket.send_to(msg.encode().as_bytes(), target).await {
            tracing::warn!(
                "Failed to send {} to {}:{}: {}",
                msg.kind(),
                target.0,
                target.1,
                e
            );
        }
    }

    /// Tells every known peer this node is leaving, then stops.
    pub async fn leave(&self) {
        let leave = ControlMessage::Leave {
            node_id: self.local_node.id,
        };

        for peer in self.peers() {
            self.send_control(&leave, peer.endpoint()).await;
        }

        info!("Sent leave message to {} peers", self.peers().len());
        self.stop().await;
    }

    /// Stops all background activity. Members announce LEAVE first; a leader does not.
    pub async fn shutdown(&self) {
        if self.role.is_leader() {
            self.stop().await;
        } else {
            self.leave().await;
        }
    }

    /// Stops every loop and closes the control socket, freeing its port.
    async fn stop(&self) {
        self.shutdown.send_replace(true);

        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        stop_tasks(handles).await;
        self.socket.close();

        info!("Membership service for node {} stopped", self.local_node.id);
    }
}
