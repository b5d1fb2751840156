//! Shared state handed to every HTTP handler.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use pactnet_contract::{ContractEngine, EscrowVault};
use pactnet_core::message::MessageBody;
use pactnet_core::types::{EntityId, PublicKeyHex};
use pactnet_crypto::Keypair;
use pactnet_discovery::{RelayService, ServiceRegistry};
use pactnet_ledger::{EconomyMonitor, TokenEconomy};
use pactnet_proto::{ChunkManager, ReplayGuard};
use pactnet_reputation::ReputationLedger;
use pactnet_session::SessionManager;

use crate::auth::AuthService;
use crate::client::PeerClient;

/// A peer we can verify and reach.
#[derive(Clone, Debug)]
pub struct PeerRecord {
    pub public_key: PublicKeyHex,
    pub endpoint: Option<String>,
}

/// Counters surfaced by the health endpoint.
#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct NodeStats {
    pub messages_received: u64,
    pub messages_verified: u64,
    pub messages_rejected: u64,
    pub messages_sent: u64,
}

/// Everything the HTTP surface needs, created once at process start and
/// shared by reference (no hidden globals).
pub struct ApiState {
    pub entity_id: EntityId,
    pub keypair: Arc<Keypair>,
    pub sessions: Arc<SessionManager>,
    pub economy: Arc<TokenEconomy>,
    pub monitor: Arc<EconomyMonitor>,
    pub reputation: Arc<ReputationLedger>,
    pub registry: Arc<ServiceRegistry>,
    pub relay: Option<Arc<RelayService>>,
    pub contracts: Arc<ContractEngine>,
    pub escrow: Arc<EscrowVault>,
    pub replay: Mutex<ReplayGuard>,
    pub chunks: Mutex<ChunkManager>,
    /// Known peers: public keys for verification, endpoints for sending.
    pub peers: Mutex<HashMap<EntityId, PeerRecord>>,
    /// Ordered application-level messages awaiting the agent loop.
    pub inbox: Mutex<Vec<(EntityId, MessageBody)>>,
    pub auth: AuthService,
    pub client: PeerClient,
    pub stats: Mutex<NodeStats>,
}

impl ApiState {
    pub async fn register_peer(
        &self,
        entity: EntityId,
        public_key: PublicKeyHex,
        endpoint: Option<String>,
    ) {
        self.peers.lock().await.insert(
            entity,
            PeerRecord {
                public_key,
                endpoint,
            },
        );
    }

    pub async fn peer(&self, entity: &EntityId) -> Option<PeerRecord> {
        self.peers.lock().await.get(entity).cloned()
    }

    /// Drain ordered application messages (agent loop consumption).
    pub async fn drain_inbox(&self) -> Vec<(EntityId, MessageBody)> {
        std::mem::take(&mut *self.inbox.lock().await)
    }
}
