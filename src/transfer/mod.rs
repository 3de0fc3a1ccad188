//! Sequenced Transfer Module
//!
//! Moves one payload that is too large for a single datagram as a stream of numbered
//! [`ChunkFrame`](crate::wire::ChunkFrame)s followed by a terminal marker.
//!
//! ## Core Mechanisms
//! - **Sending**: [`sender::ChunkSender`] slices the payload into frames numbered `0..N`, then
//!   declares `N` in the terminal marker.
//! - **Reassembly**: [`reassembler::ChunkReassembler`] buffers frames by sequence number and
//!   concatenates them in ascending order once it holds as many distinct frames as declared.
//! - **Receiving**: [`receiver::TransferReceiver`] feeds a socket into a reassembler.
//!
//! A transfer that loses a frame never completes. There is no timeout in here; callers
//! wrap [`receiver::TransferReceiver::receive`] in `tokio::time::timeout` when they need one.

pub mod reassembler;
pub mod receiver;
pub mod sender;

#[cfg(test)]
mod tests;
