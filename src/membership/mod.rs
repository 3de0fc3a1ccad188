//! Membership & Discovery Module
//!
//! Implements a leader-coordinated membership protocol over best-effort UDP. One process is
//! the leader; every other process is a member that joins through it.
//!
//! ## Core Mechanisms
//! - **Join**: a member sends `JOIN` plus `MEMBERSHIP_REQUEST`; the leader registers it under the
//!   observed source IP, replies with the snapshot and broadcasts the new snapshot to everyone else.
//! - **Heartbeats**: every node heartbeats every known peer; an unknown sender is admitted on the spot.
//! - **Failure Detection**: the leader evicts peers silent for longer than the failure timeout and
//!   broadcasts the surviving snapshot.
//! - **Snapshots**: membership is always exchanged wholesale, never as a diff.
//!
//! Nothing is acknowledged or retried. Callers that need a bounded wait use [`bootstrap`].

pub mod bootstrap;
pub mod service;
pub mod table;
pub mod types;
