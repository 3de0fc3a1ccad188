//! Replicated Chunk Storage Cluster Library
//!
//! This library crate defines the core modules of the cluster. It serves as the
//! foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`wire`**: byte-exact codecs for every datagram the cluster exchanges: control text
//!   frames, sequenced chunk frames, stored chunk frames, queries and the 20-byte record.
//! - **`membership`**: leader-coordinated join/heartbeat/leave protocol with failure
//!   detection, plus the bootstrap call clients use to discover storage nodes.
//! - **`transfer`**: splitting a payload into sequenced datagrams and reassembling it in
//!   sequence order regardless of arrival order.
//! - **`storage`**: the append-only data log and text index behind each storage node,
//!   the node's receive loops and the query client.
//! - **`routing`**: replica placement, the stateless router and the chunk distributor.
//! - **`config`**: protocol constants and per-process settings.
//! - **`endpoint`**: closable socket handles so a stopped service frees its ports.
//! - **`generator`**: synthetic record files.

pub mod config;
pub mod endpoint;
pub mod generator;
pub mod membership;
pub mod routing;
pub mod storage;
pub mod transfer;
pub mod wire;
