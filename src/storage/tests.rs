//! Storage Module Tests
//!
//! Validates the append-only log, its index and the node-level network surface.
//!
//! ## Test Scopes
//! - **Index**: line format and parsing.
//! - **StorageEngine**: offset accounting, first-match lookups, concurrent appends and rollback.
//! - **StorageNode / QueryClient**: chunk receipt, transfers and queries over loopback UDP.

#[cfg(test)]
mod tests {
    use crate::config::StorageConfig;
    use crate::membership::types::{NodeId, NodeRecord};
    use crate::storage::client::QueryClient;
    use crate::storage::engine::StorageEngine;
    use crate::storage::index::IndexEntry;
    use crate::storage::node::StorageNode;
    use crate::transfer::sender::ChunkSender;
    use crate::wire::record::encode_records;
    use crate::wire::{FixedRecord, QueryResponse, Role, StoredChunkFrame};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::net::UdpSocket;

    fn record(id: i32, first: f32) -> FixedRecord {
        FixedRecord::new(id, [first, 75.0, 80.5, 91.25])
    }

    fn chunk(records: &[FixedRecord]) -> Vec<u8> {
        encode_records(records).to_vec()
    }

    async fn engine(dir: &TempDir) -> StorageEngine {
        StorageEngine::open(StorageConfig::new(NodeId(1), dir.path()))
            .await
            .expect("Failed to open storage")
    }

    async fn running_node(dir: &TempDir, with_transfer: bool) -> Arc<StorageNode> {
        let transfer = with_transfer.then(|| "127.0.0.1:0".parse().unwrap());
        let node = StorageNode::bind(engine(dir).await, "127.0.0.1:0".parse().unwrap(), transfer)
            .await
            .expect("Failed to bind storage node");
        node.clone().start().await;
        node
    }

    async fn wait_for_entries(engine: &StorageEngine, count: usize) -> Vec<IndexEntry> {
        for _ in 0..100 {
            let entries = engine.entries().await.unwrap();
            if entries.len() >= count {
                return entries;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("Expected {} index entries", count);
    }

    // ============================================================
    // INDEX ENTRY TESTS
    // ============================================================

    #[test]
    fn test_index_line_format() {
        let entry = IndexEntry {
            chunk_id: 3,
            byte_offset: 1048576,
            length: 400,
        };

        assert_eq!(entry.to_string(), "3,1048576,400");
        assert_eq!("3,1048576,400".parse::<IndexEntry>().unwrap(), entry);
        assert_eq!(entry.end(), 1048976);
    }

    #[test]
    fn test_index_line_rejects_garbage() {
        assert!("3,100".parse::<IndexEntry>().is_err());
        assert!("a,b,c".parse::<IndexEntry>().is_err());
        assert!("1,-5,20".parse::<IndexEntry>().is_err());
        assert!("1,2,3,4".parse::<IndexEntry>().is_err());
    }

    // ============================================================
    // STORAGE ENGINE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_offsets_follow_log_length() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        let sizes = [40usize, 20, 100, 60];
        for (i, size) in sizes.iter().enumerate() {
            let records: Vec<FixedRecord> = (0..(*size / 20) as i32).map(|n| record(n, 60.0)).collect();
            engine
                .store_chunk(i as i32, &chunk(&records), Role::Primary)
                .await
                .unwrap();
        }

        let entries = engine.entries().await.unwrap();
        assert_eq!(entries.len(), sizes.len());
        assert_eq!(entries[0].byte_offset, 0);

        for pair in entries.windows(2) {
            assert!(pair[0].byte_offset < pair[1].byte_offset);
            assert_eq!(pair[0].end(), pair[1].byte_offset);
        }

        let status = engine.status().await.unwrap();
        assert_eq!(status.data_bytes, 220);
        assert_eq!(status.index_entries, 4);
        assert!(status.index_exists);
    }

    #[tokio::test]
    async fn test_index_file_is_plain_text() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        engine.store_chunk(7, &chunk(&[record(1, 60.0)]), Role::Backup).await.unwrap();
        engine.store_chunk(2, &chunk(&[record(2, 60.0)]), Role::Primary).await.unwrap();

        let index = std::fs::read_to_string(engine.config().index_path()).unwrap();
        assert_eq!(index, "7,0,20\n2,20,20\n");
    }

    #[tokio::test]
    async fn test_earliest_stored_record_wins() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        engine
            .store_chunk(5, &chunk(&[record(10, 61.0), record(42, 62.0)]), Role::Primary)
            .await
            .unwrap();
        engine
            .store_chunk(1, &chunk(&[record(42, 99.0)]), Role::Backup)
            .await
            .unwrap();

        let found = engine.query_record(42).await.unwrap().unwrap();
        assert_eq!(found, record(42, 62.0));
    }

    #[tokio::test]
    async fn test_query_miss() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        assert!(engine.query_record(1).await.unwrap().is_none(), "Empty store");

        engine.store_chunk(0, &chunk(&[record(1, 60.0)]), Role::Primary).await.unwrap();
        assert!(engine.query_record(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_misaligned_chunk_keeps_whole_records() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        let mut payload = chunk(&[record(8, 70.0)]);
        payload.extend_from_slice(&[0xAB; 5]);
        engine.store_chunk(0, &payload, Role::Primary).await.unwrap();

        assert_eq!(engine.query_record(8).await.unwrap(), Some(record(8, 70.0)));
        assert_eq!(engine.entries().await.unwrap()[0].length, 25);
    }

    #[tokio::test]
    async fn test_concurrent_appends_stay_contiguous() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(engine(&dir).await);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let records: Vec<FixedRecord> =
                        (0..(i % 4 + 1)).map(|n| record(i * 10 + n, 65.0)).collect();
                    engine.store_chunk(i, &chunk(&records), Role::Primary).await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut entries = engine.entries().await.unwrap();
        assert_eq!(entries.len(), 16);

        entries.sort_by_key(|entry| entry.byte_offset);
        assert_eq!(entries[0].byte_offset, 0);
        for pair in entries.windows(2) {
            assert_eq!(pair[0].end(), pair[1].byte_offset);
        }

        let status = engine.status().await.unwrap();
        assert_eq!(status.data_bytes as i64, entries.last().unwrap().end());
    }

    #[tokio::test]
    async fn test_failed_index_append_rolls_back_data() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        engine.store_chunk(0, &chunk(&[record(1, 60.0)]), Role::Primary).await.unwrap();

        // Replace the index with a directory so the next index append fails.
        let index_path = engine.config().index_path();
        std::fs::remove_file(&index_path).unwrap();
        std::fs::create_dir(&index_path).unwrap();

        let result = engine
            .store_chunk(1, &chunk(&[record(2, 60.0)]), Role::Primary)
            .await;

        assert!(result.is_err());
        let data_len = std::fs::metadata(engine.config().data_path()).unwrap().len();
        assert_eq!(data_len, 20, "Data log must be truncated back");
    }

    #[tokio::test]
    async fn test_entries_skip_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        engine.store_chunk(0, &chunk(&[record(1, 60.0)]), Role::Primary).await.unwrap();
        let index_path = engine.config().index_path();
        let mut contents = std::fs::read_to_string(&index_path).unwrap();
        contents.push_str("not,an-entry\n\n");
        std::fs::write(&index_path, contents).unwrap();

        engine.store_chunk(1, &chunk(&[record(2, 60.0)]), Role::Primary).await.unwrap();

        let ids: Vec<i32> = engine.entries().await.unwrap().iter().map(|e| e.chunk_id).collect();
        assert_eq!(ids, vec![0, 1]);
        assert!(engine.query_record(2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_status_of_fresh_store() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        let status = engine.status().await.unwrap();
        assert_eq!(status.node_id, NodeId(1));
        assert_eq!(status.data_bytes, 0);
        assert!(!status.index_exists);
        assert_eq!(status.index_entries, 0);
    }

    // ============================================================
    // STORAGE NODE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_node_stores_received_chunks() {
        let dir = TempDir::new().unwrap();
        let node = running_node(&dir, false).await;
        let data_addr = node.data_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(&[1, 2, 3], data_addr).await.unwrap();

        let frame = StoredChunkFrame::new(4, Role::Backup, chunk(&[record(77, 88.0)]));
        sender.send_to(&frame.encode(), data_addr).await.unwrap();

        let entries = wait_for_entries(&node.engine(), 1).await;
        assert_eq!(
            entries,
            vec![IndexEntry {
                chunk_id: 4,
                byte_offset: 0,
                length: 20
            }]
        );

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_node_answers_queries() {
        let dir = TempDir::new().unwrap();
        let node = running_node(&dir, false).await;
        node.engine()
            .store_chunk(0, &chunk(&[record(55, 66.5)]), Role::Primary)
            .await
            .unwrap();

        let query_addr = node.query_addr().unwrap();
        assert_eq!(query_addr.port(), node.data_addr().unwrap().port() + 1000);

        let client = QueryClient::new(Duration::from_secs(2));
        let found = client.query_node("127.0.0.1", query_addr.port(), 55).await.unwrap();
        assert_eq!(found, QueryResponse::Found(record(55, 66.5)));

        let missing = client.query_node("127.0.0.1", query_addr.port(), 56).await.unwrap();
        assert_eq!(missing, QueryResponse::NotFound);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_node_stores_completed_transfers() {
        let dir = TempDir::new().unwrap();
        let node = running_node(&dir, true).await;
        let transfer_addr = node.transfer_addr().unwrap();

        let records: Vec<FixedRecord> = (0..150).map(|n| record(2_000_000 + n, 70.0)).collect();
        let sender = ChunkSender::bind("127.0.0.1:0").await.unwrap();
        sender.send(&chunk(&records), transfer_addr).await.unwrap();

        let entries = wait_for_entries(&node.engine(), 1).await;
        assert_eq!(entries[0].chunk_id, 0);
        assert_eq!(entries[0].length, 3000);

        let found = node.engine().query_record(2_000_149).await.unwrap();
        assert_eq!(found, Some(record(2_000_149, 70.0)));

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_releases_every_port() {
        let dir = TempDir::new().unwrap();
        let node = running_node(&dir, true).await;
        let data_addr = node.data_addr().unwrap();
        let query_addr = node.query_addr().unwrap();
        let transfer_addr = node.transfer_addr().unwrap();

        node.shutdown().await;

        assert!(node.data_addr().is_err());
        assert!(node.transfer_addr().is_none());
        for addr in [data_addr, query_addr, transfer_addr] {
            UdpSocket::bind(addr)
                .await
                .unwrap_or_else(|e| panic!("{} still bound after shutdown: {}", addr, e));
        }
    }

    // ============================================================
    // QUERY CLIENT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_client_skips_unreachable_and_empty_nodes() {
        let empty_dir = TempDir::new().unwrap();
        let full_dir = TempDir::new().unwrap();
        let empty = running_node(&empty_dir, false).await;
        let full = running_node(&full_dir, false).await;
        full.engine()
            .store_chunk(0, &chunk(&[record(9, 90.0)]), Role::Primary)
            .await
            .unwrap();

        // Bound but never answering.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let silent_data_port = silent.local_addr().unwrap().port() - 1000;

        let nodes = vec![
            NodeRecord::new(NodeId(1), "127.0.0.1", silent_data_port),
            NodeRecord::new(NodeId(2), "127.0.0.1", empty.data_addr().unwrap().port()),
            NodeRecord::new(NodeId(3), "127.0.0.1", full.data_addr().unwrap().port()),
        ];

        let client = QueryClient::new(Duration::from_millis(200));
        assert_eq!(client.query(&nodes, 9).await.unwrap(), Some(record(9, 90.0)));
        assert_eq!(client.query(&nodes, 10).await.unwrap(), None);

        empty.shutdown().await;
        full.shutdown().await;
    }
}
