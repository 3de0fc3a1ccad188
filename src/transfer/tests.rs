//! Transfer Module Tests
//!
//! Validates sequenced transfers end to end.
//!
//! ## Test Scopes
//! - **Reassembler**: ordering, completion counting, duplicates and lost frames.
//! - **Sender/Receiver**: loopback transfers, junk frames and caller-imposed timeouts.

#[cfg(test)]
mod tests {
    use crate::transfer::reassembler::ChunkReassembler;
    use crate::transfer::receiver::TransferReceiver;
    use crate::transfer::sender::ChunkSender;
    use crate::wire::record::encode_records;
    use crate::wire::{ChunkFrame, FixedRecord};
    use bytes::Bytes;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    fn frames(chunks: &[&[u8]]) -> Vec<ChunkFrame> {
        chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| ChunkFrame::data(i as u32, chunk.to_vec()))
            .collect()
    }

    // ============================================================
    // REASSEMBLER TESTS
    // ============================================================

    #[test]
    fn test_reassembles_in_order() {
        let mut reassembler = ChunkReassembler::new();
        for frame in frames(&[b"ab", b"cd", b"ef"]) {
            assert!(!reassembler.accept(frame));
        }

        assert!(reassembler.accept(ChunkFrame::terminal(3)));
        assert_eq!(reassembler.assemble().unwrap(), Bytes::from_static(b"abcdef"));
    }

    #[test]
    fn test_any_permutation_reassembles_by_sequence() {
        let chunks: Vec<Vec<u8>> = (0..12u8).map(|i| vec![i; (i as usize % 3) + 1]).collect();
        let expected: Vec<u8> = chunks.concat();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..50 {
            let mut stream: Vec<ChunkFrame> = chunks
                .iter()
                .enumerate()
                .map(|(i, chunk)| ChunkFrame::data(i as u32, chunk.clone()))
                .collect();
            stream.push(ChunkFrame::terminal(chunks.len() as u32));
            stream.shuffle(&mut rng);

            let mut reassembler = ChunkReassembler::new();
            let completions = stream
                .into_iter()
                .map(|frame| reassembler.accept(frame))
                .collect::<Vec<_>>();

            assert_eq!(completions.last(), Some(&true));
            assert_eq!(completions.iter().filter(|done| **done).count(), 1);
            assert_eq!(reassembler.assemble().unwrap().as_ref(), expected.as_slice());
        }
    }

    #[test]
    fn test_terminal_before_data() {
        let mut reassembler = ChunkReassembler::new();
        assert!(!reassembler.accept(ChunkFrame::terminal(2)));
        assert_eq!(reassembler.expected(), Some(2));

        assert!(!reassembler.accept(ChunkFrame::data(1, &b"world"[..])));
        assert!(reassembler.accept(ChunkFrame::data(0, &b"hello "[..])));
        assert_eq!(reassembler.assemble().unwrap(), Bytes::from_static(b"hello world"));
    }

    #[test]
    fn test_lost_frame_never_completes() {
        let mut reassembler = ChunkReassembler::new();
        reassembler.accept(ChunkFrame::data(0, &b"a"[..]));
        reassembler.accept(ChunkFrame::data(2, &b"c"[..]));
        reassembler.accept(ChunkFrame::terminal(3));

        assert!(!reassembler.is_complete());
        assert_eq!(reassembler.received(), 2);
        assert!(reassembler.assemble().is_none());
    }

    #[test]
    fn test_duplicates_count_once() {
        let mut reassembler = ChunkReassembler::new();
        reassembler.accept(ChunkFrame::terminal(2));
        assert!(!reassembler.accept(ChunkFrame::data(0, &b"x"[..])));
        assert!(!reassembler.accept(ChunkFrame::data(0, &b"y"[..])));
        assert!(reassembler.accept(ChunkFrame::data(1, &b"z"[..])));

        assert_eq!(reassembler.assemble().unwrap(), Bytes::from_static(b"yz"));
    }

    #[test]
    fn test_late_frames_ignored_after_completion() {
        let mut reassembler = ChunkReassembler::new();
        reassembler.accept(ChunkFrame::data(0, &b"done"[..]));
        assert!(reassembler.accept(ChunkFrame::terminal(1)));

        assert!(reassembler.accept(ChunkFrame::data(1, &b"late"[..])));
        assert_eq!(reassembler.assemble().unwrap(), Bytes::from_static(b"done"));
    }

    #[test]
    fn test_empty_transfer() {
        let mut reassembler = ChunkReassembler::new();
        assert!(reassembler.accept(ChunkFrame::terminal(0)));
        assert!(reassembler.assemble().unwrap().is_empty());
    }

    // ============================================================
    // SENDER / RECEIVER TESTS
    // ============================================================

    fn sample_records(count: i32) -> Vec<FixedRecord> {
        (0..count)
            .map(|i| FixedRecord::new(1_000_001 + i, [60.0, 70.5, 80.25, 99.0 - i as f32]))
            .collect()
    }

    #[tokio::test]
    async fn test_loopback_transfer_of_records() {
        let receiver = TransferReceiver::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();
        let records = sample_records(200);
        let payload = encode_records(&records).freeze();

        let handle = tokio::spawn(async move { receiver.receive_records().await });

        let sender = ChunkSender::bind("127.0.0.1:0").await.unwrap();
        let total = sender.send(&payload, target).await.unwrap();
        assert_eq!(total, 3, "4000 bytes at 1400 per frame");

        let decoded = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("Transfer did not complete")
            .unwrap()
            .unwrap();

        assert!(decoded.is_aligned());
        assert_eq!(decoded.records, records);
    }

    #[tokio::test]
    async fn test_custom_frame_size() {
        let receiver = TransferReceiver::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();
        let handle = tokio::spawn(async move { receiver.receive().await });

        let sender = ChunkSender::bind("127.0.0.1:0")
            .await
            .unwrap()
            .with_frame_size(3);
        let total = sender.send(b"0123456789", target).await.unwrap();
        assert_eq!(total, 4);

        let payload = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(payload, Bytes::from_static(b"0123456789"));
    }

    #[tokio::test]
    async fn test_receiver_skips_short_frames() {
        let receiver = TransferReceiver::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();

        let junk = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        junk.send_to(&[0x01, 0x02], target).await.unwrap();

        let handle = tokio::spawn(async move { receiver.receive().await });
        let sender = ChunkSender::bind("127.0.0.1:0").await.unwrap();
        sender.send(b"payload", target).await.unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(payload, Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn test_incomplete_transfer_needs_caller_timeout() {
        let receiver = TransferReceiver::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket
            .send_to(&ChunkFrame::data(0, &b"only"[..]).encode(), target)
            .await
            .unwrap();
        socket
            .send_to(&ChunkFrame::terminal(2).encode(), target)
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_millis(300), receiver.receive()).await;
        assert!(result.is_err(), "A transfer missing a frame must never complete");
    }
}
