//! The DHT node: UDP endpoint, request/reply correlation, the signed value
//! store with TTL and republish, and iterative lookups.
//!
//! Values are signed `PeerInfo` records keyed by entity id; a stored value
//! lives one hour and locally owned values are republished every ten
//! minutes. Lookups run with α = 3 parallelism and `find_value`
//! short-circuits on the first hit.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{oneshot, watch, Mutex};

use pactnet_core::constants::{
    DHT_ALPHA, DHT_K, DHT_REPUBLISH_INTERVAL_SECS, DHT_VALUE_TIMEOUT_SECS, DHT_VALUE_TTL_SECS,
};
use pactnet_core::registry::PeerInfo;
use pactnet_core::types::{EntityId, Timestamp};
use pactnet_core::PactError;
use pactnet_crypto::{verify_digest_b64, Keypair};

use super::node_id::{cmp_distance, NodeId};
use super::routing::{NodeEntry, RoutingTable, UpdateOutcome};
use super::wire::{Datagram, RpcBody, TxId, WireNode};

const LOOKUP_MAX_ROUNDS: usize = 8;
const MAX_DATAGRAM: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct DhtConfig {
    pub listen_addr: SocketAddr,
    pub bootstrap: Vec<SocketAddr>,
    pub k: usize,
    pub alpha: usize,
    pub value_ttl_secs: i64,
    pub republish_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:0".parse().expect("static addr parses"),
            bootstrap: Vec::new(),
            k: DHT_K,
            alpha: DHT_ALPHA,
            value_ttl_secs: DHT_VALUE_TTL_SECS,
            republish_interval_secs: DHT_REPUBLISH_INTERVAL_SECS,
            request_timeout_secs: DHT_VALUE_TIMEOUT_SECS,
        }
    }
}

struct StoredValue {
    info: PeerInfo,
    stored_at: Timestamp,
    /// Locally owned values are republished; foreign ones only expire.
    owned: bool,
}

pub struct DhtNode {
    entity_id: EntityId,
    node_id: NodeId,
    keypair: Arc<Keypair>,
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    config: DhtConfig,
    routing: Mutex<RoutingTable>,
    values: Mutex<HashMap<String, StoredValue>>,
    pending: Mutex<HashMap<TxId, oneshot::Sender<RpcBody>>>,
}

impl DhtNode {
    /// Bind the UDP socket and build the node.
    pub async fn bind(
        entity_id: EntityId,
        keypair: Arc<Keypair>,
        config: DhtConfig,
    ) -> Result<Arc<Self>, PactError> {
        let socket = UdpSocket::bind(config.listen_addr)
            .await
            .map_err(|e| PactError::Internal(format!("dht bind: {e}")))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| PactError::Internal(e.to_string()))?;
        let node_id = NodeId::from_entity(entity_id.as_str());
        tracing::info!(%entity_id, node_id = %node_id, %local_addr, "DHT node bound");
        Ok(Arc::new(Self {
            entity_id,
            node_id,
            keypair,
            socket: Arc::new(socket),
            local_addr,
            routing: Mutex::new(RoutingTable::with_k(node_id, config.k)),
            values: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            config,
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn wire_node(&self) -> WireNode {
        WireNode {
            node_id: self.node_id.to_hex(),
            entity_id: self.entity_id.clone(),
            addr: self.local_addr,
        }
    }

    // ── Event loop ───────────────────────────────────────────────────────────

    /// Drive the receive loop. Run in a dedicated tokio task.
    pub fn spawn(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let node = self;
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    received = node.socket.recv_from(&mut buf) => {
                        match received {
                            Ok((len, from)) => {
                                match Datagram::decode(&buf[..len]) {
                                    Ok(datagram) => {
                                        DhtNode::handle_datagram(&node, datagram, from).await
                                    }
                                    Err(e) => {
                                        tracing::debug!(%from, error = %e, "bad datagram dropped")
                                    }
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "dht recv failed"),
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn handle_datagram(node: &Arc<Self>, datagram: Datagram, from: SocketAddr) {
        let now = chrono::Utc::now().timestamp();
        match datagram.body {
            // ── Requests ────────────────────────────────────────────────────
            RpcBody::Ping { from: sender } => {
                DhtNode::observe(node, &sender, from, now).await;
                node.reply(datagram.txid, from, RpcBody::Pong { from: node.wire_node() })
                    .await;
            }
            RpcBody::Store { from: sender, key, value } => {
                DhtNode::observe(node, &sender, from, now).await;
                let reply = match verify_peer_info(&value) {
                    Ok(()) => {
                        node.values.lock().await.insert(
                            key.clone(),
                            StoredValue { info: value, stored_at: now, owned: false },
                        );
                        RpcBody::StoreAck { key }
                    }
                    Err(_) => {
                        tracing::warn!(key, "rejected unsigned or forged peer info");
                        RpcBody::StoreAck { key }
                    }
                };
                node.reply(datagram.txid, from, reply).await;
            }
            RpcBody::FindNode { from: sender, target } => {
                DhtNode::observe(node, &sender, from, now).await;
                let nodes = node.closest_wire(&target).await;
                node.reply(datagram.txid, from, RpcBody::FindNodeReply { nodes })
                    .await;
            }
            RpcBody::FindValue { from: sender, key } => {
                DhtNode::observe(node, &sender, from, now).await;
                let value = {
                    let values = node.values.lock().await;
                    values
                        .get(&key)
                        .filter(|v| now - v.stored_at <= node.config.value_ttl_secs)
                        .map(|v| v.info.clone())
                };
                let nodes = if value.is_some() {
                    Vec::new()
                } else {
                    node.closest_wire(&key_target(&key).to_hex()).await
                };
                node.reply(datagram.txid, from, RpcBody::FindValueReply { value, nodes })
                    .await;
            }
            // ── Replies ─────────────────────────────────────────────────────
            body @ (RpcBody::Pong { .. }
            | RpcBody::StoreAck { .. }
            | RpcBody::FindNodeReply { .. }
            | RpcBody::FindValueReply { .. }) => {
                if let RpcBody::Pong { from: sender } = &body {
                    DhtNode::observe(node, sender, from, now).await;
                }
                if let Some(waiter) = node.pending.lock().await.remove(&datagram.txid) {
                    let _ = waiter.send(body);
                }
            }
        }
    }

    async fn closest_wire(&self, target_hex: &str) -> Vec<WireNode> {
        let target = NodeId::from_hex(target_hex).unwrap_or(self.node_id);
        self.routing
            .lock()
            .await
            .closest(&target, self.config.k)
            .into_iter()
            .map(|e| WireNode {
                node_id: e.node_id.to_hex(),
                entity_id: e.entity_id,
                addr: e.addr,
            })
            .collect()
    }

    /// Track a node we heard from. A full bucket probes its LRS occupant
    /// for liveness and only evicts on timeout.
    async fn observe(node: &Arc<Self>, sender: &WireNode, actual_addr: SocketAddr, now: Timestamp) {
        let Some(node_id) = NodeId::from_hex(&sender.node_id) else {
            return;
        };
        let entry = NodeEntry {
            node_id,
            entity_id: sender.entity_id.clone(),
            addr: actual_addr,
            last_seen: now,
        };
        let outcome = node.routing.lock().await.update(entry.clone());
        if let UpdateOutcome::PendingEviction { candidate } = outcome {
            let node = Arc::clone(node);
            tokio::spawn(async move {
                let alive = node.ping(candidate.addr).await;
                let now = chrono::Utc::now().timestamp();
                let mut routing = node.routing.lock().await;
                if alive {
                    routing.note_alive(&candidate.node_id, now);
                } else {
                    routing.evict_and_insert(&candidate.node_id, entry);
                    tracing::debug!(evicted = %candidate.node_id, "replaced dead node");
                }
            });
        }
    }

    async fn reply(&self, txid: TxId, to: SocketAddr, body: RpcBody) {
        let datagram = Datagram::new(txid, body);
        if let Err(e) = self.socket.send_to(&datagram.encode(), to).await {
            tracing::debug!(%to, error = %e, "dht reply failed");
        }
    }

    // ── Outbound RPCs ────────────────────────────────────────────────────────

    async fn request(&self, addr: SocketAddr, body: RpcBody) -> Result<RpcBody, PactError> {
        let datagram = Datagram::fresh(body);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(datagram.txid, tx);

        self.socket
            .send_to(&datagram.encode(), addr)
            .await
            .map_err(|e| PactError::Internal(format!("dht send: {e}")))?;

        let timeout = std::time::Duration::from_secs(self.config.request_timeout_secs);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            _ => {
                self.pending.lock().await.remove(&datagram.txid);
                Err(PactError::Timeout)
            }
        }
    }

    pub async fn ping(&self, addr: SocketAddr) -> bool {
        matches!(
            self.request(addr, RpcBody::Ping { from: self.wire_node() }).await,
            Ok(RpcBody::Pong { .. })
        )
    }

    async fn store_remote(&self, addr: SocketAddr, key: &str, value: PeerInfo) -> bool {
        matches!(
            self.request(
                addr,
                RpcBody::Store { from: self.wire_node(), key: key.into(), value },
            )
            .await,
            Ok(RpcBody::StoreAck { .. })
        )
    }

    async fn find_node_remote(&self, addr: SocketAddr, target: &NodeId) -> Vec<WireNode> {
        match self
            .request(
                addr,
                RpcBody::FindNode { from: self.wire_node(), target: target.to_hex() },
            )
            .await
        {
            Ok(RpcBody::FindNodeReply { nodes }) => nodes,
            _ => Vec::new(),
        }
    }

    async fn find_value_remote(
        &self,
        addr: SocketAddr,
        key: &str,
    ) -> (Option<PeerInfo>, Vec<WireNode>) {
        match self
            .request(addr, RpcBody::FindValue { from: self.wire_node(), key: key.into() })
            .await
        {
            Ok(RpcBody::FindValueReply { value, nodes }) => (value, nodes),
            _ => (None, Vec::new()),
        }
    }

    // ── Bootstrap & lookups ──────────────────────────────────────────────────

    /// Ping the configured bootstrap nodes and walk toward our own id to
    /// populate the routing table.
    pub async fn bootstrap(&self) -> usize {
        for addr in self.config.bootstrap.clone() {
            if !self.ping(addr).await {
                tracing::warn!(%addr, "bootstrap node unreachable");
            }
        }
        let self_id = self.node_id;
        let found = self.iterative_find_node(&self_id).await;
        tracing::info!(discovered = found.len(), "dht bootstrap complete");
        self.routing.lock().await.len()
    }

    /// Iterative FIND_NODE toward `target`: query the α closest unqueried
    /// nodes each round until no closer node appears.
    pub async fn iterative_find_node(&self, target: &NodeId) -> Vec<WireNode> {
        let mut shortlist: Vec<WireNode> = self.closest_wire(&target.to_hex()).await;
        let mut queried: HashSet<SocketAddr> = HashSet::new();

        for _ in 0..LOOKUP_MAX_ROUNDS {
            let batch: Vec<WireNode> = shortlist
                .iter()
                .filter(|n| !queried.contains(&n.addr))
                .take(self.config.alpha)
                .cloned()
                .collect();
            if batch.is_empty() {
                break;
            }

            let mut progressed = false;
            for peer in batch {
                queried.insert(peer.addr);
                for found in self.find_node_remote(peer.addr, target).await {
                    if found.entity_id == self.entity_id {
                        continue;
                    }
                    if !shortlist.iter().any(|n| n.node_id == found.node_id) {
                        shortlist.push(found);
                        progressed = true;
                    }
                }
            }
            sort_by_distance(&mut shortlist, target);
            shortlist.truncate(self.config.k);
            if !progressed {
                break;
            }
        }
        shortlist.truncate(self.config.alpha);
        shortlist
    }

    // ── Registry interface ───────────────────────────────────────────────────

    /// Publish our own signed `PeerInfo` locally and on the closest nodes.
    pub async fn register_self(
        &self,
        endpoint: &str,
        capabilities: Vec<String>,
        now: Timestamp,
    ) -> Result<usize, PactError> {
        let mut info = PeerInfo {
            peer_id: self.entity_id.clone(),
            public_key: self.keypair.public_key_hex(),
            endpoint: endpoint.to_string(),
            capabilities,
            timestamp: now,
            signature: None,
        };
        info.signature = Some(self.keypair.sign_digest_b64(info.signing_input().as_bytes()));

        let key = self.entity_id.to_string();
        self.values.lock().await.insert(
            key.clone(),
            StoredValue { info: info.clone(), stored_at: now, owned: true },
        );

        let target = key_target(&key);
        let closest = self.iterative_find_node(&target).await;
        let mut stored = 1; // local copy
        for peer in closest {
            if self.store_remote(peer.addr, &key, info.clone()).await {
                stored += 1;
            }
        }
        tracing::info!(replicas = stored, "registered self in DHT");
        Ok(stored)
    }

    /// Resolve a peer's signed record, checking signature and freshness.
    pub async fn lookup_peer(&self, peer_id: &EntityId) -> Option<PeerInfo> {
        let now = chrono::Utc::now().timestamp();
        let key = peer_id.to_string();

        // Local hit first.
        if let Some(stored) = self.values.lock().await.get(&key) {
            if now - stored.stored_at <= self.config.value_ttl_secs {
                return Some(stored.info.clone());
            }
        }

        let target = key_target(&key);
        let mut shortlist = self.closest_wire(&target.to_hex()).await;
        let mut queried: HashSet<SocketAddr> = HashSet::new();

        for _ in 0..LOOKUP_MAX_ROUNDS {
            let batch: Vec<WireNode> = shortlist
                .iter()
                .filter(|n| !queried.contains(&n.addr))
                .take(self.config.alpha)
                .cloned()
                .collect();
            if batch.is_empty() {
                break;
            }
            for peer in batch {
                queried.insert(peer.addr);
                let (value, nodes) = self.find_value_remote(peer.addr, &key).await;
                if let Some(info) = value {
                    // Short-circuit on the first verified hit.
                    if verify_peer_info(&info).is_ok()
                        && !info.is_expired(now, self.config.value_ttl_secs)
                    {
                        self.values.lock().await.insert(
                            key.clone(),
                            StoredValue { info: info.clone(), stored_at: now, owned: false },
                        );
                        return Some(info);
                    }
                    tracing::warn!(peer = %peer_id, "discarded invalid peer info from lookup");
                }
                for found in nodes {
                    if !shortlist.iter().any(|n| n.node_id == found.node_id) {
                        shortlist.push(found);
                    }
                }
            }
            sort_by_distance(&mut shortlist, &target);
            shortlist.truncate(self.config.k);
        }
        None
    }

    /// Expire foreign values and republish owned ones.
    pub async fn republish_owned(&self) -> usize {
        let now = chrono::Utc::now().timestamp();
        let owned: Vec<(String, PeerInfo)> = {
            let mut values = self.values.lock().await;
            let ttl = self.config.value_ttl_secs;
            values.retain(|_, v| v.owned || now - v.stored_at <= ttl);
            values
                .iter_mut()
                .filter(|(_, v)| v.owned)
                .map(|(k, v)| {
                    v.stored_at = now;
                    (k.clone(), v.info.clone())
                })
                .collect()
        };

        let mut republished = 0;
        for (key, info) in owned {
            let target = key_target(&key);
            for peer in self.iterative_find_node(&target).await {
                if self.store_remote(peer.addr, &key, info.clone()).await {
                    republished += 1;
                }
            }
        }
        republished
    }

    /// Periodic republish/expiry task.
    pub fn spawn_republisher(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let node = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                node.config.republish_interval_secs.max(1),
            ));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let n = node.republish_owned().await;
                        if n > 0 {
                            tracing::debug!(replicas = n, "republished owned DHT values");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    pub async fn known_nodes(&self) -> usize {
        self.routing.lock().await.len()
    }
}

fn key_target(key: &str) -> NodeId {
    NodeId::from_key(key)
}

fn sort_by_distance(nodes: &mut [WireNode], target: &NodeId) {
    nodes.sort_by(|a, b| {
        let a_id = NodeId::from_hex(&a.node_id).unwrap_or(*target);
        let b_id = NodeId::from_hex(&b.node_id).unwrap_or(*target);
        cmp_distance(&a_id, &b_id, target)
    });
}

fn verify_peer_info(info: &PeerInfo) -> Result<(), PactError> {
    let signature = info.signature.as_deref().ok_or(PactError::InvalidSignature)?;
    verify_digest_b64(
        info.public_key.as_str(),
        info.signing_input().as_bytes(),
        signature,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn node(name: &str, bootstrap: Vec<SocketAddr>) -> Arc<DhtNode> {
        let keypair = Arc::new(Keypair::generate(name.into()));
        let config = DhtConfig {
            bootstrap,
            request_timeout_secs: 2,
            ..DhtConfig::default()
        };
        DhtNode::bind(name.into(), keypair, config).await.unwrap()
    }

    fn spawn_all(nodes: &[Arc<DhtNode>]) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        for n in nodes {
            Arc::clone(n).spawn(rx.clone());
        }
        tx
    }

    #[tokio::test]
    async fn ping_populates_routing_tables() {
        let a = node("node-a", vec![]).await;
        let b = node("node-b", vec![a.local_addr()]).await;
        let _shutdown = spawn_all(&[Arc::clone(&a), Arc::clone(&b)]);

        assert!(b.ping(a.local_addr()).await);
        assert_eq!(b.known_nodes().await, 1);
        // The pong taught a about b as well.
        assert_eq!(a.known_nodes().await, 1);
    }

    #[tokio::test]
    async fn register_then_lookup_through_peer() {
        let a = node("node-a", vec![]).await;
        let b = node("node-b", vec![a.local_addr()]).await;
        let _shutdown = spawn_all(&[Arc::clone(&a), Arc::clone(&b)]);

        b.ping(a.local_addr()).await;
        let now = chrono::Utc::now().timestamp();
        let replicas = a
            .register_self("http://127.0.0.1:8100", vec!["code_review".into()], now)
            .await
            .unwrap();
        assert!(replicas >= 1);

        let info = b.lookup_peer(&"node-a".into()).await.expect("peer found");
        assert_eq!(info.endpoint, "http://127.0.0.1:8100");
        assert_eq!(info.capabilities, vec!["code_review".to_string()]);
    }

    #[tokio::test]
    async fn lookup_of_unknown_peer_is_none() {
        let a = node("node-a", vec![]).await;
        let b = node("node-b", vec![a.local_addr()]).await;
        let _shutdown = spawn_all(&[Arc::clone(&a), Arc::clone(&b)]);
        b.ping(a.local_addr()).await;

        assert!(b.lookup_peer(&"node-z".into()).await.is_none());
    }

    #[tokio::test]
    async fn forged_peer_info_is_discarded() {
        let a = node("node-a", vec![]).await;
        let b = node("node-b", vec![a.local_addr()]).await;
        let _shutdown = spawn_all(&[Arc::clone(&a), Arc::clone(&b)]);
        b.ping(a.local_addr()).await;

        let now = chrono::Utc::now().timestamp();
        a.register_self("http://127.0.0.1:8100", vec![], now)
            .await
            .unwrap();

        // Tamper with a's stored copy of its own record before b asks.
        {
            let mut values = a.values.lock().await;
            let stored = values.get_mut("node-a").unwrap();
            stored.info.endpoint = "http://evil.example:1".into();
        }
        assert!(b.lookup_peer(&"node-a".into()).await.is_none());
    }
}
