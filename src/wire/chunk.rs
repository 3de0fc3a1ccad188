use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::WireError;

/// Value carried in the second word of a terminal marker.
pub const TERMINAL_SENTINEL: u32 = 0xFFFF_FFFF;
/// A terminal marker is always exactly two 32-bit words.
pub const TERMINAL_FRAME_LEN: usize = 8;
/// Sequence number (or declared total) prefix.
pub const SEQUENCE_HEADER_LEN: usize = 4;
/// `chunkId(4) + role(1) + length(4)`.
pub const STORED_HEADER_LEN: usize = 9;

/// One datagram of a sequenced transfer.
///
/// The terminal marker reuses the sequence-number slot for the declared total
/// number of data frames in the transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkFrame {
    Data { sequence: u32, payload: Bytes },
    Terminal { total: u32 },
}

impl ChunkFrame {
    pub fn data(sequence: u32, payload: impl Into<Bytes>) -> Self {
        ChunkFrame::Data {
            sequence,
            payload: payload.into(),
        }
    }

    pub fn terminal(total: u32) -> Self {
        ChunkFrame::Terminal { total }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            ChunkFrame::Data { sequence, payload } => {
                let mut buf = BytesMut::with_capacity(SEQUENCE_HEADER_LEN + payload.len());
                buf.put_u32(*sequence);
                buf.put_slice(payload);
                buf.freeze()
            }
            ChunkFrame::Terminal { total } => {
                let mut buf = BytesMut::with_capacity(TERMINAL_FRAME_LEN);
                buf.put_u32(*total);
                buf.put_u32(TERMINAL_SENTINEL);
                buf.freeze()
            }
        }
    }

    /// An 8-byte frame whose second word is the sentinel is always read as a terminal
    /// marker, so a data frame can never carry exactly `FF FF FF FF` as its whole payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < SEQUENCE_HEADER_LEN {
            return Err(WireError::Truncated {
                needed: SEQUENCE_HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let mut buf = bytes;
        let sequence = buf.get_u32();

        if bytes.len() == TERMINAL_FRAME_LEN && buf.chunk() == TERMINAL_SENTINEL.to_be_bytes() {
            return Ok(ChunkFrame::Terminal { total: sequence });
        }

        Ok(ChunkFrame::Data {
            sequence,
            payload: Bytes::copy_from_slice(buf),
        })
    }
}

/// Replica placement tag carried by every stored chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Primary,
    Backup,
}

impl Role {
    pub fn flag(self) -> u8 {
        match self {
            Role::Primary => 1,
            Role::Backup => 0,
        }
    }

    pub fn from_flag(flag: u8) -> Result<Self, WireError> {
        match flag {
            1 => Ok(Role::Primary),
            0 => Ok(Role::Backup),
            other => Err(WireError::InvalidRole(other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Backup => write!(f, "backup"),
        }
    }
}

/// A chunk addressed to a storage node's store-on-receipt path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunkFrame {
    pub chunk_id: i32,
    pub role: Role,
    pub payload: Bytes,
}

impl StoredChunkFrame {
    pub fn new(chunk_id: i32, role: Role, payload: impl Into<Bytes>) -> Self {
        Self {
            chunk_id,
            role,
            payload: payload.into(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        STORED_HEADER_LEN + self.payload.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_i32(self.chunk_id);
        buf.put_u8(self.role.flag());
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Bytes past the declared payload length are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < STORED_HEADER_LEN {
            return Err(WireError::Truncated {
                needed: STORED_HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let mut buf = bytes;
        let chunk_id = buf.get_i32();
        let role = Role::from_flag(buf.get_u8())?;
        let length = buf.get_u32() as usize;

        if buf.remaining() < length {
            return Err(WireError::Truncated {
                needed: STORED_HEADER_LEN + length,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            chunk_id,
            role,
            payload: Bytes::copy_from_slice(&buf[..length]),
        })
    }
}
