//! Relay service for NAT-bound peers.
//!
//! Peers register with their public key and connection info and heartbeat
//! every minute; peers silent for five minutes are evicted. `forward`
//! checks TTL and hop budget, stamps the relay id, and either delivers into
//! the target's inbox or queues for its next registration. The relay never
//! inspects or modifies message payloads, so end-to-end signatures survive
//! the detour.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use pactnet_core::constants::{
    RELAY_MAX_HOPS, RELAY_MESSAGE_TTL_SECS, RELAY_PEER_TIMEOUT_SECS, RELAY_QUEUE_CAPACITY,
    RELAY_RATE_LIMIT_PER_MIN,
};
use pactnet_core::types::{EntityId, PublicKeyHex, Timestamp};
use pactnet_core::PactError;

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub relay_id: String,
    pub peer_timeout_secs: i64,
    pub message_ttl_secs: i64,
    pub max_hops: u32,
    pub rate_limit_per_min: u32,
    pub queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            relay_id: "relay-0".into(),
            peer_timeout_secs: RELAY_PEER_TIMEOUT_SECS,
            message_ttl_secs: RELAY_MESSAGE_TTL_SECS,
            max_hops: RELAY_MAX_HOPS,
            rate_limit_per_min: RELAY_RATE_LIMIT_PER_MIN,
            queue_capacity: RELAY_QUEUE_CAPACITY,
        }
    }
}

/// A registered NAT-bound peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayPeer {
    pub entity_id: EntityId,
    pub public_key: PublicKeyHex,
    pub connection_info: serde_json::Value,
    pub registered_at: Timestamp,
    pub last_heartbeat: Timestamp,
}

/// A message in transit through the relay. `payload` is opaque.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayMessage {
    pub message_id: String,
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub payload: serde_json::Value,
    pub timestamp: Timestamp,
    pub ttl_secs: i64,
    pub hop_count: u32,
    pub max_hops: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via_relay: Option<String>,
}

impl RelayMessage {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now - self.timestamp > self.ttl_secs
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Target online; message is in its inbox.
    Delivered,
    /// Target offline; queued at this position.
    Queued { position: usize },
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct RelayStats {
    pub registered_peers: usize,
    pub messages_forwarded: u64,
    pub messages_queued: u64,
    pub messages_dropped: u64,
    pub queue_depth: usize,
}

struct Inner {
    peers: HashMap<EntityId, RelayPeer>,
    /// Online peers poll these.
    inboxes: HashMap<EntityId, VecDeque<RelayMessage>>,
    /// Held for peers not currently registered; bounded per recipient.
    offline: HashMap<EntityId, VecDeque<RelayMessage>>,
    /// Sliding one-minute window of forward timestamps per source.
    rate: HashMap<EntityId, VecDeque<Timestamp>>,
    stats: RelayStats,
}

pub struct RelayService {
    config: RelayConfig,
    inner: Mutex<Inner>,
}

impl RelayService {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                peers: HashMap::new(),
                inboxes: HashMap::new(),
                offline: HashMap::new(),
                rate: HashMap::new(),
                stats: RelayStats::default(),
            }),
        }
    }

    // ── Registration & liveness ──────────────────────────────────────────────

    /// Register (or re-register) a peer. Queued offline messages move into
    /// the peer's inbox and are reported back.
    pub async fn register(
        &self,
        entity_id: EntityId,
        public_key: PublicKeyHex,
        connection_info: serde_json::Value,
        now: Timestamp,
    ) -> usize {
        let mut inner = self.inner.lock().await;
        inner.peers.insert(
            entity_id.clone(),
            RelayPeer {
                entity_id: entity_id.clone(),
                public_key,
                connection_info,
                registered_at: now,
                last_heartbeat: now,
            },
        );
        let queued = inner.offline.remove(&entity_id).unwrap_or_default();
        let count = queued.len();
        inner.inboxes.entry(entity_id.clone()).or_default().extend(queued);
        inner.stats.registered_peers = inner.peers.len();
        tracing::info!(entity = %entity_id, queued = count, "peer registered with relay");
        count
    }

    pub async fn unregister(&self, entity_id: &EntityId) -> bool {
        let mut inner = self.inner.lock().await;
        let removed = inner.peers.remove(entity_id).is_some();
        // Undelivered inbox messages go back to the offline queue.
        if let Some(inbox) = inner.inboxes.remove(entity_id) {
            inner.offline.entry(entity_id.clone()).or_default().extend(inbox);
        }
        inner.stats.registered_peers = inner.peers.len();
        removed
    }

    pub async fn heartbeat(&self, entity_id: &EntityId, now: Timestamp) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.peers.get_mut(entity_id) {
            Some(peer) => {
                peer.last_heartbeat = now;
                true
            }
            None => false,
        }
    }

    // ── Forwarding ───────────────────────────────────────────────────────────

    /// Forward a message toward its target, never touching the payload.
    pub async fn forward(
        &self,
        mut message: RelayMessage,
        now: Timestamp,
    ) -> Result<ForwardOutcome, PactError> {
        if message.is_expired(now) {
            let mut inner = self.inner.lock().await;
            inner.stats.messages_dropped += 1;
            return Err(PactError::Timeout);
        }
        if message.hop_count >= message.max_hops.min(self.config.max_hops) {
            let mut inner = self.inner.lock().await;
            inner.stats.messages_dropped += 1;
            return Err(PactError::Internal(format!(
                "hop budget exhausted for {}",
                message.message_id
            )));
        }

        let mut inner = self.inner.lock().await;

        // Per-source rate limit over a sliding minute.
        let window = inner.rate.entry(message.source_id.clone()).or_default();
        while window.front().map(|t| now - t >= 60).unwrap_or(false) {
            window.pop_front();
        }
        if window.len() >= self.config.rate_limit_per_min as usize {
            inner.stats.messages_dropped += 1;
            return Err(PactError::RateLimited);
        }
        window.push_back(now);

        message.hop_count += 1;
        message.via_relay = Some(self.config.relay_id.clone());

        let target_online = inner
            .peers
            .get(&message.target_id)
            .map(|p| now - p.last_heartbeat <= self.config.peer_timeout_secs)
            .unwrap_or(false);

        if target_online {
            inner
                .inboxes
                .entry(message.target_id.clone())
                .or_default()
                .push_back(message);
            inner.stats.messages_forwarded += 1;
            Ok(ForwardOutcome::Delivered)
        } else {
            let capacity = self.config.queue_capacity;
            let queue = inner.offline.entry(message.target_id.clone()).or_default();
            let mut dropped = 0u64;
            while queue.len() >= capacity {
                queue.pop_front();
                dropped += 1;
            }
            queue.push_back(message);
            let position = queue.len();
            inner.stats.messages_dropped += dropped;
            inner.stats.messages_queued += 1;
            inner.stats.queue_depth = inner.offline.values().map(|q| q.len()).sum();
            Ok(ForwardOutcome::Queued { position })
        }
    }

    /// Drain the inbox of an online peer (polled over its control channel).
    pub async fn drain_inbox(&self, entity_id: &EntityId) -> Vec<RelayMessage> {
        let mut inner = self.inner.lock().await;
        inner
            .inboxes
            .get_mut(entity_id)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    /// Evict peers whose heartbeat lapsed; their inboxes fall back to the
    /// offline queue. Also drops expired offline messages.
    pub async fn evict_stale(&self, now: Timestamp) -> usize {
        let mut inner = self.inner.lock().await;
        let timeout = self.config.peer_timeout_secs;
        let stale: Vec<EntityId> = inner
            .peers
            .values()
            .filter(|p| now - p.last_heartbeat > timeout)
            .map(|p| p.entity_id.clone())
            .collect();
        for entity in &stale {
            inner.peers.remove(entity);
            if let Some(inbox) = inner.inboxes.remove(entity) {
                inner.offline.entry(entity.clone()).or_default().extend(inbox);
            }
            tracing::info!(%entity, "evicted stale relay peer");
        }

        let mut dropped = 0u64;
        for queue in inner.offline.values_mut() {
            let before = queue.len();
            queue.retain(|m| !m.is_expired(now));
            dropped += (before - queue.len()) as u64;
        }
        inner.offline.retain(|_, q| !q.is_empty());
        inner.stats.messages_dropped += dropped;
        inner.stats.registered_peers = inner.peers.len();
        inner.stats.queue_depth = inner.offline.values().map(|q| q.len()).sum();
        stale.len()
    }

    pub async fn stats(&self) -> RelayStats {
        self.inner.lock().await.stats
    }

    pub async fn is_registered(&self, entity_id: &EntityId) -> bool {
        self.inner.lock().await.peers.contains_key(entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, source: &str, target: &str, now: Timestamp) -> RelayMessage {
        RelayMessage {
            message_id: id.into(),
            source_id: source.into(),
            target_id: target.into(),
            payload: serde_json::json!({"sealed": "opaque"}),
            timestamp: now,
            ttl_secs: RELAY_MESSAGE_TTL_SECS,
            hop_count: 0,
            max_hops: RELAY_MAX_HOPS,
            via_relay: None,
        }
    }

    fn relay() -> RelayService {
        RelayService::new(RelayConfig::default())
    }

    async fn register(relay: &RelayService, entity: &str, now: Timestamp) -> usize {
        relay
            .register(
                entity.into(),
                PublicKeyHex("00".repeat(32)),
                serde_json::json!({"nat": true}),
                now,
            )
            .await
    }

    #[tokio::test]
    async fn delivers_to_online_peer() {
        let relay = relay();
        register(&relay, "bob", 100).await;

        let outcome = relay.forward(message("m1", "alice", "bob", 100), 100).await.unwrap();
        assert_eq!(outcome, ForwardOutcome::Delivered);

        let inbox = relay.drain_inbox(&"bob".into()).await;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].hop_count, 1);
        assert_eq!(inbox[0].via_relay.as_deref(), Some("relay-0"));
        // Payload untouched.
        assert_eq!(inbox[0].payload, serde_json::json!({"sealed": "opaque"}));
    }

    #[tokio::test]
    async fn queues_for_offline_peer_until_registration() {
        let relay = relay();
        let outcome = relay.forward(message("m1", "alice", "bob", 100), 100).await.unwrap();
        assert!(matches!(outcome, ForwardOutcome::Queued { position: 1 }));

        let queued = register(&relay, "bob", 110).await;
        assert_eq!(queued, 1);
        assert_eq!(relay.drain_inbox(&"bob".into()).await.len(), 1);
    }

    #[tokio::test]
    async fn expired_and_over_hopped_messages_are_rejected() {
        let relay = relay();
        register(&relay, "bob", 100).await;

        let old = message("m1", "alice", "bob", 100);
        let err = relay.forward(old, 100 + RELAY_MESSAGE_TTL_SECS + 1).await.unwrap_err();
        assert_eq!(err.code(), "TIMEOUT");

        let mut hopped = message("m2", "alice", "bob", 200);
        hopped.hop_count = RELAY_MAX_HOPS;
        assert!(relay.forward(hopped, 200).await.is_err());
    }

    #[tokio::test]
    async fn per_source_rate_limit() {
        let relay = RelayService::new(RelayConfig {
            rate_limit_per_min: 3,
            ..RelayConfig::default()
        });
        register(&relay, "bob", 100).await;

        for i in 0..3 {
            relay
                .forward(message(&format!("m{i}"), "alice", "bob", 100), 100)
                .await
                .unwrap();
        }
        let err = relay.forward(message("m4", "alice", "bob", 100), 100).await.unwrap_err();
        assert_eq!(err.code(), "RATE_LIMITED");

        // The window slides: a minute later sends flow again.
        relay.forward(message("m5", "alice", "bob", 161), 161).await.unwrap();
    }

    #[tokio::test]
    async fn stale_peers_are_evicted_and_inbox_requeued() {
        let relay = relay();
        register(&relay, "bob", 100).await;
        relay.forward(message("m1", "alice", "bob", 100), 100).await.unwrap();

        let evicted = relay.evict_stale(100 + RELAY_PEER_TIMEOUT_SECS + 1).await;
        assert_eq!(evicted, 1);
        assert!(!relay.is_registered(&"bob".into()).await);

        // Re-registering recovers the undelivered message (if not expired).
        let queued = register(&relay, "bob", 100 + RELAY_PEER_TIMEOUT_SECS + 2).await;
        assert_eq!(queued, 1);
    }

    #[tokio::test]
    async fn offline_queue_is_bounded() {
        let relay = RelayService::new(RelayConfig {
            queue_capacity: 2,
            ..RelayConfig::default()
        });
        for i in 0..4 {
            relay
                .forward(message(&format!("m{i}"), "alice", "bob", 100), 100)
                .await
                .unwrap();
        }
        let queued = register(&relay, "bob", 110).await;
        assert_eq!(queued, 2);
        // The two newest survive.
        let inbox = relay.drain_inbox(&"bob".into()).await;
        let ids: Vec<_> = inbox.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3"]);
    }
}
