use anyhow::{Error, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One line of a storage node's index file: `chunkId,byteOffset,length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk_id: i32,
    /// Length of the data log immediately before this chunk was appended.
    pub byte_offset: i64,
    pub length: i32,
}

impl IndexEntry {
    /// First byte past this chunk in the data log.
    pub fn end(&self) -> i64 {
        self.byte_offset + i64::from(self.length)
    }
}

impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.chunk_id, self.byte_offset, self.length)
    }
}

impl FromStr for IndexEntry {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.trim().split(',').collect();
        let [chunk_id, byte_offset, length] = parts.as_slice() else {
            return Err(anyhow!("Expected chunkId,byteOffset,length, got '{}'", line));
        };

        let entry = IndexEntry {
            chunk_id: chunk_id.trim().parse()?,
            byte_offset: byte_offset.trim().parse()?,
            length: length.trim().parse()?,
        };

        if entry.byte_offset < 0 || entry.length < 0 {
            return Err(anyhow!("Negative offset or length in '{}'", line));
        }

        Ok(entry)
    }
}
