//! Replay protection: a bounded per-sender LRU of observed nonces.
//!
//! Timestamps outside the ±300 s window are rejected before this stage, so
//! the LRU only needs to cover nonces that could still pass the window check.

use std::collections::{HashMap, HashSet, VecDeque};

use pactnet_core::constants::MAX_STORED_NONCES;
use pactnet_core::types::EntityId;
use pactnet_core::PactError;

struct SenderNonces {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl SenderNonces {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }
}

/// Tracks nonces per sender with LRU eviction at `capacity`.
pub struct ReplayGuard {
    capacity: usize,
    senders: HashMap<EntityId, SenderNonces>,
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(MAX_STORED_NONCES)
    }
}

impl ReplayGuard {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            senders: HashMap::new(),
        }
    }

    /// Accept a (sender, nonce) pair, or fail with `REPLAY_DETECTED` if the
    /// nonce was already observed. Accepted nonces are remembered; the oldest
    /// entry is evicted once the per-sender capacity is reached.
    pub fn check_and_insert(&mut self, sender: &EntityId, nonce: &str) -> Result<(), PactError> {
        let entry = self
            .senders
            .entry(sender.clone())
            .or_insert_with(SenderNonces::new);

        if entry.seen.contains(nonce) {
            return Err(PactError::ReplayDetected(sender.to_string()));
        }

        entry.seen.insert(nonce.to_string());
        entry.order.push_back(nonce.to_string());
        while entry.order.len() > self.capacity {
            if let Some(evicted) = entry.order.pop_front() {
                entry.seen.remove(&evicted);
            }
        }
        Ok(())
    }

    /// Forget all nonces for a sender (e.g. when the peer is deregistered).
    pub fn forget_sender(&mut self, sender: &EntityId) {
        self.senders.remove(sender);
    }

    pub fn tracked_senders(&self) -> usize {
        self.senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_nonce_is_replay() {
        let mut guard = ReplayGuard::new(10);
        let sender: EntityId = "s".into();
        guard.check_and_insert(&sender, "n1").unwrap();
        let err = guard.check_and_insert(&sender, "n1").unwrap_err();
        assert_eq!(err.code(), "REPLAY_DETECTED");
    }

    #[test]
    fn same_nonce_different_senders_ok() {
        let mut guard = ReplayGuard::new(10);
        guard.check_and_insert(&"a".into(), "n1").unwrap();
        guard.check_and_insert(&"b".into(), "n1").unwrap();
    }

    #[test]
    fn lru_eviction_bounds_memory() {
        let mut guard = ReplayGuard::new(3);
        let sender: EntityId = "s".into();
        for n in ["n1", "n2", "n3", "n4"] {
            guard.check_and_insert(&sender, n).unwrap();
        }
        // n1 was evicted, so it is accepted again; n4 is still remembered.
        guard.check_and_insert(&sender, "n1").unwrap();
        assert!(guard.check_and_insert(&sender, "n4").is_err());
    }

    #[test]
    fn forget_sender_clears_state() {
        let mut guard = ReplayGuard::new(10);
        let sender: EntityId = "s".into();
        guard.check_and_insert(&sender, "n1").unwrap();
        guard.forget_sender(&sender);
        guard.check_and_insert(&sender, "n1").unwrap();
    }
}
