use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::types::{NodeId, NodeRecord};

/// The node-identity directory.
///
/// Keyed by [`NodeId`] only; a second record for the same id replaces the first (last
/// writer wins). Every mutating call has an `_at` form taking an explicit `Instant` so
/// that failure detection can be driven by a synthetic clock.
#[derive(Debug, Default)]
pub struct MembershipTable {
    members: DashMap<NodeId, NodeRecord>,
}

impl MembershipTable {
    pub fn new() -> Self {
        Self {
            members: DashMap::new(),
        }
    }

    pub fn upsert(&self, record: NodeRecord) {
        self.upsert_at(record, Instant::now());
    }

    pub fn upsert_at(&self, mut record: NodeRecord, now: Instant) {
        record.last_seen = Some(now);
        self.members.insert(record.id, record);
    }

    /// Refreshes `last_seen` for a known node. Returns `false` if the id is unknown.
    pub fn touch(&self, id: NodeId) -> bool {
        self.touch_at(id, Instant::now())
    }

    pub fn touch_at(&self, id: NodeId, now: Instant) -> bool {
        match self.members.get_mut(&id) {
            Some(mut member) => {
                member.last_seen = Some(now);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: NodeId) -> Option<NodeRecord> {
        self.members.remove(&id).map(|(_, record)| record)
    }

    /// Replaces the whole table with `records`, all marked as seen at `now`.
    pub fn replace_all(&self, records: Vec<NodeRecord>, now: Instant) {
        self.members.clear();
        for record in records {
            self.upsert_at(record, now);
        }
    }

    pub fn get(&self, id: NodeId) -> Option<NodeRecord> {
        self.members.get(&id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Every known record, ordered by id.
    pub fn snapshot(&self) -> Vec<NodeRecord> {
        let mut records: Vec<NodeRecord> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }

    /// Every known record except `local`, ordered by id.
    pub fn peers(&self, local: NodeId) -> Vec<NodeRecord> {
        self.snapshot()
            .into_iter()
            .filter(|record| record.id != local)
            .collect()
    }

    /// Removes every node other than `local` not seen for longer than `timeout`.
    ///
    /// A record that was never stamped counts as stale.
    pub fn evict_stale(&self, local: NodeId, now: Instant, timeout: Duration) -> Vec<NodeRecord> {
        let stale: Vec<NodeId> = self
            .members
            .iter()
            .filter(|entry| entry.value().id != local)
            .filter(|entry| match entry.value().last_seen {
                Some(last_seen) => now.saturating_duration_since(last_seen) > timeout,
                None => true,
            })
            .map(|entry| *entry.key())
            .collect();

        let mut evicted: Vec<NodeRecord> = stale
            .into_iter()
            .filter_map(|id| self.remove(id))
            .collect();
        evicted.sort_by_key(|record| record.id);
        evicted
    }
}
