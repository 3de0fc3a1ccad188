use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;

use crate::wire::ChunkFrame;

/// Buffers the frames of one transfer and rebuilds the payload.
///
/// Frames may arrive in any order, including the terminal marker before the data it
/// counts. The transfer is complete exactly when the number of distinct sequence
/// numbers held equals the declared total.
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    frames: BTreeMap<u32, Bytes>,
    expected: Option<u32>,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one frame and reports whether the transfer is now complete.
    ///
    /// Frames arriving after completion are ignored. A repeated sequence number
    /// replaces the earlier payload and does not count twice.
    pub fn accept(&mut self, frame: ChunkFrame) -> bool {
        if self.is_complete() {
            tracing::debug!("Transfer already complete, ignoring late frame");
            return true;
        }

        match frame {
            ChunkFrame::Data { sequence, payload } => {
                if self.frames.insert(sequence, payload).is_some() {
                    tracing::debug!("Duplicate frame {} replaced", sequence);
                }
            }
            ChunkFrame::Terminal { total } => {
                tracing::debug!(
                    "Terminal marker declares {} frames, {} received",
                    total,
                    self.frames.len()
                );
                self.expected = Some(total);
            }
        }

        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.expected
            .is_some_and(|total| self.frames.len() == total as usize)
    }

    /// Total declared by the terminal marker, once it has arrived.
    pub fn expected(&self) -> Option<u32> {
        self.expected
    }

    /// Number of distinct data frames held so far.
    pub fn received(&self) -> usize {
        self.frames.len()
    }

    /// Concatenates payloads in ascending sequence order. `None` until complete.
    pub fn assemble(&self) -> Option<Bytes> {
        if !self.is_complete() {
            return None;
        }

        let len = self.frames.values().map(Bytes::len).sum();
        let mut buf = BytesMut::with_capacity(len);
        for payload in self.frames.values() {
            buf.extend_from_slice(payload);
        }

        Some(buf.freeze())
    }
}
