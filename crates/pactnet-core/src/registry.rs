//! Discovery record types: service registry entries and DHT peer info.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::constants::{REGISTRY_ALIVE_SECS, REGISTRY_STALE_SECS};
use crate::types::{EntityId, PublicKeyHex, Timestamp};

// ── Service registry entry ───────────────────────────────────────────────────

/// One registered service. The signature binds
/// `entity_id|endpoint|sha256(sorted capabilities)|version|registered_at|node_id`
/// under the entity's Ed25519 key; `capabilities` is a sorted set so the
/// digest is deterministic.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub entity_id: EntityId,
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    pub registered_at: Timestamp,
    pub last_heartbeat: Timestamp,
    pub version: String,
    /// 160-bit DHT node id, hex-encoded.
    pub node_id: String,
    pub public_key: PublicKeyHex,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ServiceEntry {
    /// The signing pre-image, minus the capabilities digest which the caller
    /// computes (crypto lives outside this crate).
    pub fn signing_input(&self, capabilities_digest_hex: &str) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.entity_id,
            self.endpoint,
            capabilities_digest_hex,
            self.version,
            self.registered_at,
            self.node_id,
        )
    }

    /// Deterministic byte string the capabilities digest is computed over.
    pub fn capabilities_preimage(&self) -> String {
        self.capabilities.iter().cloned().collect::<Vec<_>>().join(",")
    }

    /// Heartbeat within the alive window.
    pub fn is_alive(&self, now: Timestamp) -> bool {
        now - self.last_heartbeat <= REGISTRY_ALIVE_SECS
    }

    /// Past the stale cutoff; eligible for cleanup.
    pub fn is_stale(&self, now: Timestamp) -> bool {
        now - self.last_heartbeat > REGISTRY_STALE_SECS
    }
}

// ── DHT peer info ────────────────────────────────────────────────────────────

/// Signed peer record stored as a DHT value under the peer's key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: EntityId,
    pub public_key: PublicKeyHex,
    /// host:port the peer serves `/v1.1/message` on.
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl PeerInfo {
    /// Canonical bytes covered by the signature (all fields except it),
    /// serialized with sorted keys.
    pub fn signing_input(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.peer_id,
            self.public_key,
            self.endpoint,
            self.capabilities.join(","),
            self.timestamp,
        )
    }

    pub fn is_expired(&self, now: Timestamp, max_age_secs: i64) -> bool {
        now - self.timestamp > max_age_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hb: Timestamp) -> ServiceEntry {
        ServiceEntry {
            entity_id: "svc".into(),
            name: "svc".into(),
            endpoint: "http://127.0.0.1:9000".into(),
            capabilities: ["b", "a"].iter().map(|s| s.to_string()).collect(),
            registered_at: 0,
            last_heartbeat: hb,
            version: "1.1".into(),
            node_id: "ab".repeat(20),
            public_key: PublicKeyHex("00".repeat(32)),
            signature: None,
        }
    }

    #[test]
    fn alive_and_stale_windows() {
        let e = entry(1_000);
        assert!(e.is_alive(1_050));
        assert!(!e.is_alive(1_061));
        assert!(!e.is_stale(1_120));
        assert!(e.is_stale(1_121));
    }

    #[test]
    fn capabilities_preimage_is_sorted() {
        let e = entry(0);
        assert_eq!(e.capabilities_preimage(), "a,b");
    }
}
