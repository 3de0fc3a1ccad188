use anyhow::{Context, Result};
use serde::Serialize;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use super::index::IndexEntry;
use crate::config::StorageConfig;
use crate::membership::types::NodeId;
use crate::wire::chunk::Role;
use crate::wire::record::decode_records;
use crate::wire::FixedRecord;

/// Summary of a node's on-disk state.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StorageStatus {
    pub node_id: NodeId,
    pub data_path: PathBuf,
    pub index_path: PathBuf,
    pub data_bytes: u64,
    pub index_exists: bool,
    pub index_entries: usize,
}

/// Append-only data log plus a parallel text index.
///
/// Appends are serialized through `writer` so that each entry's offset is the exact log
/// length before its own write. Queries open their own read handle and use positioned
/// reads, so they never wait on the writer.
pub struct StorageEngine {
    config: StorageConfig,
    writer: Mutex<()>,
}

impl StorageEngine {
    pub async fn open(config: StorageConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

        tracing::info!(
            "Storage for node {} at {}",
            config.node_id,
            config.data_path().display()
        );

        Ok(Self {
            config,
            writer: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Appends `payload` to the data log and records it in the index.
    ///
    /// On failure neither file keeps a partial update: both are truncated back to
    /// their length before the call.
    pub async fn store_chunk(&self, chunk_id: i32, payload: &[u8], role: Role) -> Result<IndexEntry> {
        let length = i32::try_from(payload.len()).context("Chunk too large to index")?;

        let _guard = self.writer.lock().await;

        let data_path = self.config.data_path();
        let index_path = self.config.index_path();

        let mut data = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&data_path)
            .await
            .with_context(|| format!("Failed to open {}", data_path.display()))?;
        let offset = data.metadata().await?.len();

        if let Err(e) = append(&mut data, payload).await {
            rollback(&data_path, offset).await;
            return Err(e).with_context(|| format!("Failed to append chunk {}", chunk_id));
        }

        let entry = IndexEntry {
            chunk_id,
            byte_offset: i64::try_from(offset)?,
            length,
        };

        if let Err(e) = append_index_line(&index_path, &entry).await {
            rollback(&data_path, offset).await;
            return Err(e).with_context(|| format!("Failed to index chunk {}", chunk_id));
        }

        tracing::info!(
            "Stored chunk {} ({}), {} bytes at offset {}",
            chunk_id,
            role,
            payload.len(),
            offset
        );

        Ok(entry)
    }

    /// Scans the index in append order and returns the first record with `target_id`.
    ///
    /// Cost is proportional to everything stored on this node.
    pub async fn query_record(&self, target_id: i32) -> Result<Option<FixedRecord>> {
        let entries = self.entries().await?;
        if entries.is_empty() {
            return Ok(None);
        }

        let data_path = self.config.data_path();
        let mut data = File::open(&data_path)
            .await
            .with_context(|| format!("Failed to open {}", data_path.display()))?;

        let mut buf = Vec::new();
        for entry in entries {
            buf.resize(entry.length as usize, 0);
            data.seek(SeekFrom::Start(entry.byte_offset as u64)).await?;
            data.read_exact(&mut buf)
                .await
                .with_context(|| format!("Failed to read chunk {} at {}", entry.chunk_id, entry.byte_offset))?;

            let decoded = decode_records(&buf);
            if !decoded.is_aligned() {
                tracing::warn!(
                    "Chunk {} ends with {} bytes that do not form a record",
                    entry.chunk_id,
                    decoded.remainder
                );
            }

            if let Some(record) = decoded.records.into_iter().find(|r| r.id == target_id) {
                return Ok(Some(record));
            }
        }

        Ok(None)
    }

    /// The index in append order. Malformed lines are skipped with a warning.
    pub async fn entries(&self) -> Result<Vec<IndexEntry>> {
        let index_path = self.config.index_path();

        let contents = match tokio::fs::read_to_string(&index_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", index_path.display()));
            }
        };

        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match line.parse::<IndexEntry>() {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("Skipping index line '{}': {}", line, e);
                    None
                }
            })
            .collect())
    }

    pub async fn status(&self) -> Result<StorageStatus> {
        let data_path = self.config.data_path();
        let index_path = self.config.index_path();

        Ok(StorageStatus {
            node_id: self.config.node_id,
            data_bytes: file_len(&data_path).await?.unwrap_or(0),
            index_exists: file_len(&index_path).await?.is_some(),
            index_entries: self.entries().await?.len(),
            data_path,
            index_path,
        })
    }
}

async fn append(file: &mut File, bytes: &[u8]) -> Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(())
}

async fn append_index_line(path: &Path, entry: &IndexEntry) -> Result<()> {
    let mut index = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let before = index.metadata().await?.len();

    if let Err(e) = append(&mut index, format!("{}\n", entry).as_bytes()).await {
        rollback(path, before).await;
        return Err(e);
    }

    Ok(())
}

/// Truncates `path` back to `len`. Failure here is only logged.
async fn rollback(path: &Path, len: u64) {
    let truncated = async {
        let file = OpenOptions::new().write(true).open(path).await?;
        file.set_len(len).await?;
        Ok::<_, std::io::Error>(())
    };

    match truncated.await {
        Ok(()) => tracing::warn!("Rolled back {} to {} bytes", path.display(), len),
        Err(e) => tracing::error!("Failed to roll back {}: {}", path.display(), e),
    }
}

async fn file_len(path: &Path) -> Result<Option<u64>> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(Some(metadata.len())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
