//! Chunk Storage Module
//!
//! Persists replicated chunks on a storage node and answers point lookups.
//!
//! ## Core Concepts
//! - **Data Log**: every received chunk is appended to `<prefix>-<nodeId>.dat`; nothing is
//!   ever rewritten, compacted or deleted.
//! - **Index**: one `chunkId,byteOffset,length` line per append in `<prefix>-<nodeId>.idx`.
//! - **Lookup**: `StorageEngine::query_record` walks the index in append order, so the
//!   earliest stored copy of a record wins.
//! - **Node**: `StorageNode` runs the data, query and optional transfer receive loops;
//!   `QueryClient` is the matching client side.

pub mod client;
pub mod engine;
pub mod index;
pub mod node;

#[cfg(test)]
mod tests;
