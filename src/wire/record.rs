use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::WireError;

/// Size of one encoded [`FixedRecord`]: a 4-byte id followed by four 4-byte floats.
pub const RECORD_SIZE: usize = 20;

/// The payload unit carried end-to-end by the pipeline.
///
/// Layout is fixed-width and big-endian, so a byte stream can only be split at
/// 20-byte boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedRecord {
    pub id: i32,
    pub scores: [f32; 4],
}

impl FixedRecord {
    pub fn new(id: i32, scores: [f32; 4]) -> Self {
        Self { id, scores }
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(RECORD_SIZE);
        buf.put_i32(self.id);
        for score in self.scores {
            buf.put_f32(score);
        }
    }

    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = BytesMut::with_capacity(RECORD_SIZE);
        self.encode_into(&mut buf);

        let mut out = [0u8; RECORD_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Decodes exactly one record from the first 20 bytes of `bytes`.
    pub fn decode(mut bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < RECORD_SIZE {
            return Err(WireError::Truncated {
                needed: RECORD_SIZE,
                actual: bytes.len(),
            });
        }

        let id = bytes.get_i32();
        let scores = [
            bytes.get_f32(),
            bytes.get_f32(),
            bytes.get_f32(),
            bytes.get_f32(),
        ];

        Ok(Self { id, scores })
    }
}

impl fmt::Display for FixedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={} scores=[{:.1}, {:.1}, {:.1}, {:.1}]",
            self.id, self.scores[0], self.scores[1], self.scores[2], self.scores[3]
        )
    }
}

/// Result of splitting a byte buffer into records.
///
/// `remainder` counts the trailing bytes that did not form a whole record. A non-zero
/// remainder is a data-integrity problem the caller must report.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecords {
    pub records: Vec<FixedRecord>,
    pub remainder: usize,
}

impl DecodedRecords {
    pub fn is_aligned(&self) -> bool {
        self.remainder == 0
    }
}

pub fn encode_records(records: &[FixedRecord]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(records.len() * RECORD_SIZE);
    for record in records {
        record.encode_into(&mut buf);
    }
    buf
}

/// Parses every whole record in `bytes`, reporting how many trailing bytes were discarded.
pub fn decode_records(bytes: &[u8]) -> DecodedRecords {
    let chunks = bytes.chunks_exact(RECORD_SIZE);
    let remainder = chunks.remainder().len();

    let records = chunks
        .filter_map(|chunk| FixedRecord::decode(chunk).ok())
        .collect();

    DecodedRecords { records, remainder }
}

/// Strict variant of [`decode_records`]: a misaligned buffer is an error.
pub fn decode_records_exact(bytes: &[u8]) -> Result<Vec<FixedRecord>, WireError> {
    if bytes.len() % RECORD_SIZE != 0 {
        return Err(WireError::Misaligned {
            len: bytes.len(),
            record_size: RECORD_SIZE,
        });
    }

    Ok(decode_records(bytes).records)
}
