//! Wire Codec Module
//!
//! Encodes and decodes every datagram exchanged by the cluster. The codec is stateless:
//! each function maps bytes to a closed set of frame types and back.
//!
//! ## Frame Families
//! - **Control** (`control`): ASCII membership messages (`JOIN`, `HEARTBEAT`, `LEAVE`,
//!   `MEMBERSHIP_REQUEST`, `MEMBERSHIP_RESPONSE`) decoded into [`ControlMessage`].
//! - **Chunk transport** (`chunk`): sequence-numbered data frames and the 8-byte terminal marker.
//! - **Chunk store** (`chunk`): `chunkId + role + length + payload` frames sent to storage nodes.
//! - **Query** (`query`): `QUERY:<id>` requests and `RECORD:`/`NOT_FOUND` responses.
//! - **Records** (`record`): the 20-byte big-endian [`FixedRecord`] carried by all of the above.

pub mod chunk;
pub mod control;
pub mod error;
pub mod query;
pub mod record;

pub use chunk::{ChunkFrame, Role, StoredChunkFrame};
pub use control::ControlMessage;
pub use error::WireError;
pub use query::{QueryRequest, QueryResponse};
pub use record::{DecodedRecords, FixedRecord, RECORD_SIZE};
