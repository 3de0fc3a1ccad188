use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

use crate::membership::types::NodeRecord;

/// Indices of the two replicas for `primary` in a list of `len` nodes.
///
/// With a single node both replicas are that node.
pub fn replica_indices(primary: usize, len: usize) -> (usize, usize) {
    (primary % len, (primary + 1) % len)
}

/// Random primary, next-in-list backup.
pub struct ReplicaPlacement {
    rng: Mutex<StdRng>,
}

impl Default for ReplicaPlacement {
    fn default() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }
}

impl ReplicaPlacement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic placement, for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    pub fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Picks `(primary, backup)` indices into a list of `len` nodes. `None` if empty.
    pub fn pick(&self, len: usize) -> Option<(usize, usize)> {
        if len == 0 {
            return None;
        }

        let primary = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..len),
            Err(poisoned) => poisoned.into_inner().gen_range(0..len),
        };

        Some(replica_indices(primary, len))
    }

    pub fn replicas<'a>(&self, nodes: &'a [NodeRecord]) -> Option<(&'a NodeRecord, &'a NodeRecord)> {
        self.pick(nodes.len())
            .map(|(primary, backup)| (&nodes[primary], &nodes[backup]))
    }
}
