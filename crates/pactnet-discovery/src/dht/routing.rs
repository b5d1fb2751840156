//! Kademlia routing table: one k-bucket per distance prefix.
//!
//! The table keeps a bucket for every possible highest-differing-bit
//! position (the fully split form of the k-bucket tree, so the
//! split-when-covering-self rule is structural). Buckets are ordered
//! least-recently-seen first; when a full bucket sees a new node, the LRS
//! occupant becomes an eviction candidate to be probed for liveness.

use std::collections::VecDeque;
use std::net::SocketAddr;

use pactnet_core::constants::{DHT_K, DHT_NODE_ID_BYTES};
use pactnet_core::types::{EntityId, Timestamp};

use super::node_id::{cmp_distance, NodeId};

const BUCKET_COUNT: usize = DHT_NODE_ID_BYTES * 8;

/// One known peer in the overlay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeEntry {
    pub node_id: NodeId,
    pub entity_id: EntityId,
    pub addr: SocketAddr,
    pub last_seen: Timestamp,
}

/// Result of offering a node to the table.
#[derive(Debug)]
pub enum UpdateOutcome {
    /// New node stored.
    Inserted,
    /// Node was known; moved to most-recently-seen.
    Refreshed,
    /// Bucket full: probe this least-recently-seen occupant. If it fails
    /// to answer, call [`RoutingTable::evict_and_insert`].
    PendingEviction { candidate: NodeEntry },
}

pub struct RoutingTable {
    self_id: NodeId,
    k: usize,
    /// Front = least recently seen.
    buckets: Vec<VecDeque<NodeEntry>>,
}

impl RoutingTable {
    pub fn new(self_id: NodeId) -> Self {
        Self::with_k(self_id, DHT_K)
    }

    pub fn with_k(self_id: NodeId, k: usize) -> Self {
        Self {
            self_id,
            k,
            buckets: (0..BUCKET_COUNT).map(|_| VecDeque::new()).collect(),
        }
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    /// Offer a (possibly already known) node to the table.
    pub fn update(&mut self, entry: NodeEntry) -> UpdateOutcome {
        let Some(index) = self.self_id.bucket_index(&entry.node_id) else {
            // Our own id never enters the table.
            return UpdateOutcome::Refreshed;
        };
        let bucket = &mut self.buckets[index];

        if let Some(pos) = bucket.iter().position(|e| e.node_id == entry.node_id) {
            let mut existing = bucket.remove(pos).expect("position valid");
            existing.addr = entry.addr;
            existing.last_seen = entry.last_seen;
            bucket.push_back(existing);
            return UpdateOutcome::Refreshed;
        }

        if bucket.len() < self.k {
            bucket.push_back(entry);
            return UpdateOutcome::Inserted;
        }

        let candidate = bucket.front().expect("full bucket has a front").clone();
        UpdateOutcome::PendingEviction { candidate }
    }

    /// The probed LRS node answered: refresh it and drop the newcomer.
    pub fn note_alive(&mut self, node_id: &NodeId, now: Timestamp) {
        if let Some(index) = self.self_id.bucket_index(node_id) {
            let bucket = &mut self.buckets[index];
            if let Some(pos) = bucket.iter().position(|e| &e.node_id == node_id) {
                let mut entry = bucket.remove(pos).expect("position valid");
                entry.last_seen = now;
                bucket.push_back(entry);
            }
        }
    }

    /// The probed LRS node timed out: evict it and insert the newcomer.
    pub fn evict_and_insert(&mut self, evict: &NodeId, insert: NodeEntry) {
        if let Some(index) = self.self_id.bucket_index(evict) {
            let bucket = &mut self.buckets[index];
            bucket.retain(|e| &e.node_id != evict);
            if bucket.len() < self.k {
                bucket.push_back(insert);
            }
        }
    }

    pub fn remove(&mut self, node_id: &NodeId) {
        if let Some(index) = self.self_id.bucket_index(node_id) {
            self.buckets[index].retain(|e| &e.node_id != node_id);
        }
    }

    /// The `count` known nodes closest to `target` by XOR distance.
    pub fn closest(&self, target: &NodeId, count: usize) -> Vec<NodeEntry> {
        let mut all: Vec<NodeEntry> = self.buckets.iter().flatten().cloned().collect();
        all.sort_by(|a, b| cmp_distance(&a.node_id, &b.node_id, target));
        all.truncate(count);
        all
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn entry(name: &str, port: u16, now: Timestamp) -> NodeEntry {
        NodeEntry {
            node_id: NodeId::from_entity(name),
            entity_id: name.into(),
            addr: addr(port),
            last_seen: now,
        }
    }

    #[test]
    fn insert_refresh_and_self_exclusion() {
        let mut table = RoutingTable::new(NodeId::from_entity("self"));
        assert!(matches!(table.update(entry("a", 1, 0)), UpdateOutcome::Inserted));
        assert!(matches!(table.update(entry("a", 2, 5)), UpdateOutcome::Refreshed));
        assert_eq!(table.len(), 1);

        // Self never enters.
        assert!(matches!(table.update(entry("self", 3, 0)), UpdateOutcome::Refreshed));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn full_bucket_yields_lrs_candidate() {
        let self_id = NodeId::from_entity("self");
        let mut table = RoutingTable::with_k(self_id, 2);

        // Find three distinct peers landing in the same bucket.
        let mut same_bucket = Vec::new();
        let mut i = 0;
        while same_bucket.len() < 3 {
            let e = entry(&format!("peer-{i}"), 1000 + i as u16, i as i64);
            let idx = self_id.bucket_index(&e.node_id).unwrap();
            if same_bucket
                .first()
                .map(|(first_idx, _)| *first_idx == idx)
                .unwrap_or(true)
            {
                same_bucket.push((idx, e));
            }
            i += 1;
        }

        let (_, first) = same_bucket[0].clone();
        let (_, second) = same_bucket[1].clone();
        let (_, third) = same_bucket[2].clone();
        table.update(first.clone());
        table.update(second);

        match table.update(third.clone()) {
            UpdateOutcome::PendingEviction { candidate } => {
                assert_eq!(candidate.node_id, first.node_id, "LRS should be probed");
                // Probe timed out: newcomer replaces it.
                table.evict_and_insert(&candidate.node_id, third.clone());
            }
            other => panic!("expected pending eviction, got {other:?}"),
        }
        assert_eq!(table.len(), 2);
        assert!(table
            .closest(&third.node_id, 10)
            .iter()
            .any(|e| e.node_id == third.node_id));
    }

    #[test]
    fn closest_returns_sorted_by_distance() {
        let mut table = RoutingTable::new(NodeId::from_entity("self"));
        for i in 0..50 {
            table.update(entry(&format!("peer-{i}"), 2000 + i as u16, 0));
        }
        let target = NodeId::from_key("lookup-key");
        let closest = table.closest(&target, 3);
        assert_eq!(closest.len(), 3);
        for pair in closest.windows(2) {
            assert_ne!(
                cmp_distance(&pair[1].node_id, &pair[0].node_id, &target),
                std::cmp::Ordering::Less
            );
        }
    }
}
