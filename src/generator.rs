//! Synthetic record files for exercising a cluster.

use anyhow::{Context, Result};
use rand::Rng;
use std::path::Path;

use crate::wire::FixedRecord;
use crate::wire::record::encode_records;

pub const FIRST_RECORD_ID: i32 = 1_000_001;

/// `count` records with consecutive ids from [`FIRST_RECORD_ID`] and scores in `[60, 100)`.
pub fn generate_records<R: Rng>(count: usize, rng: &mut R) -> Vec<FixedRecord> {
    (FIRST_RECORD_ID..)
        .take(count)
        .map(|id| {
            let scores = [
                rng.gen_range(60.0..100.0),
                rng.gen_range(60.0..100.0),
                rng.gen_range(60.0..100.0),
                rng.gen_range(60.0..100.0),
            ];
            FixedRecord::new(id, scores)
        })
        .collect()
}

pub async fn write_records(path: impl AsRef<Path>, records: &[FixedRecord]) -> Result<()> {
    let path = path.as_ref();
    tokio::fs::write(path, encode_records(records))
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    tracing::info!("Wrote {} records to {}", records.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::RECORD_SIZE;
    use crate::wire::record::decode_records_exact;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_generated_ids_and_scores() {
        let mut rng = StdRng::seed_from_u64(1);
        let records = generate_records(50, &mut rng);

        assert_eq!(records.len(), 50);
        assert_eq!(records[0].id, FIRST_RECORD_ID);
        assert_eq!(records[49].id, FIRST_RECORD_ID + 49);
        assert!(
            records
                .iter()
                .flat_map(|r| r.scores)
                .all(|score| (60.0..100.0).contains(&score))
        );
    }

    #[tokio::test]
    async fn test_written_file_is_record_aligned() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("records.dat");
        let records = generate_records(7, &mut StdRng::seed_from_u64(2));

        write_records(&path, &records).await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 7 * RECORD_SIZE);
        assert_eq!(decode_records_exact(&bytes).unwrap(), records);
    }
}
