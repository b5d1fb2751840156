//! pactnet-node — the PactNet full-node binary.
//!
//! Startup sequence:
//!   1. Load (or create) the node's encrypted keypair
//!   2. Restore the token economy, reputation and registry from the data dir
//!   3. Start the DHT overlay and register this node's endpoint
//!   4. Start the HTTP surface (peer messaging + marketplace + ledger)
//!   5. Spawn the background sweepers (sessions, chunks, registry, relay,
//!      offline-queue retry, economy monitor)
//!   6. Run the agent loop: drain ordered inbound messages

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use pactnet_api::{ApiState, AuthService, MessageSender, PeerClient};
use pactnet_contract::{ContractEngine, EscrowVault};
use pactnet_core::constants::{
    TRANSFER_SWEEP_INTERVAL_SECS, TREASURY_ENTITY,
};
use pactnet_core::types::EntityId;
use pactnet_crypto::Keystore;
use pactnet_discovery::{DhtConfig, DhtNode, RelayConfig, RelayService, ServiceRegistry};
use pactnet_ledger::{EconomyMonitor, MonitorConfig, TokenEconomy};
use pactnet_proto::{ChunkManager, ReplayGuard};
use pactnet_reputation::ReputationLedger;
use pactnet_session::{SessionConfig, SessionManager};
use pactnet_store::{DataStore, OfflineQueue, QueuedMessage};

#[derive(Parser, Debug)]
#[command(
    name = "pactnet-node",
    version,
    about = "PactNet node — peer substrate for autonomous agent collaboration"
)]
struct Args {
    /// This node's entity id.
    #[arg(long, env = "PACTNET_ENTITY_ID")]
    entity_id: String,

    /// HTTP listen address.
    #[arg(long, env = "PACTNET_LISTEN", default_value = "127.0.0.1:8800")]
    listen: SocketAddr,

    /// Externally reachable endpoint advertised to peers. Defaults to the
    /// listen address.
    #[arg(long, env = "PACTNET_ENDPOINT")]
    endpoint: Option<String>,

    /// Data directory for wallets, tasks, reputation and the registry.
    #[arg(long, env = "PACTNET_DATA_DIR", default_value = "data")]
    data_dir: std::path::PathBuf,

    /// Keystore directory (encrypted keyfiles).
    #[arg(long, env = "PACTNET_KEYSTORE_DIR", default_value = "keys")]
    keystore_dir: std::path::PathBuf,

    /// Keystore password.
    #[arg(long, env = "PACTNET_KEY_PASSWORD")]
    key_password: String,

    /// HS256 secret for bearer tokens.
    #[arg(long, env = "PACTNET_JWT_SECRET", default_value = "pactnet-dev-secret")]
    jwt_secret: String,

    /// UDP listen address for the DHT overlay.
    #[arg(long, env = "PACTNET_DHT_LISTEN", default_value = "0.0.0.0:0")]
    dht_listen: SocketAddr,

    /// DHT bootstrap nodes (comma-separated host:port).
    #[arg(long, env = "PACTNET_DHT_BOOTSTRAP", value_delimiter = ',')]
    dht_bootstrap: Vec<SocketAddr>,

    /// Peer HTTP endpoints to fetch public keys from at startup
    /// (comma-separated).
    #[arg(long, env = "PACTNET_PEERS", value_delimiter = ',')]
    peers: Vec<String>,

    /// Also run a relay for NAT-bound peers.
    #[arg(long, env = "PACTNET_RELAY", default_value_t = false)]
    relay: bool,

    /// Capabilities advertised in discovery.
    #[arg(long, env = "PACTNET_CAPABILITIES", value_delimiter = ',')]
    capabilities: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pactnet=debug".parse().expect("default filter parses")),
        )
        .init();

    let args = Args::parse();
    let entity_id = EntityId::new(args.entity_id.clone());
    info!(%entity_id, "PactNet node starting");

    // ── Identity ──────────────────────────────────────────────────────────────
    let keystore = Keystore::open(&args.keystore_dir).context("opening keystore")?;
    let keypair = if keystore.exists(&entity_id) {
        keystore
            .load(&entity_id, &args.key_password)
            .context("loading keypair")?
    } else {
        info!("no keyfile found, generating a new identity");
        keystore
            .create(&entity_id, &args.key_password)
            .context("creating keypair")?
    };
    let keypair = Arc::new(keypair);
    info!(public_key = %keypair.public_key_hex(), "identity loaded");

    // ── Persistent state ──────────────────────────────────────────────────────
    let store = Arc::new(DataStore::open(&args.data_dir).context("opening data dir")?);
    let economy = Arc::new(TokenEconomy::open(Arc::clone(&store)).context("opening economy")?);
    if !economy.wallet_exists(&TREASURY_ENTITY.into()).await {
        economy
            .create_wallet(&TREASURY_ENTITY.into(), 0, chrono::Utc::now().timestamp())
            .await
            .context("creating treasury wallet")?;
    }
    let reputation = Arc::new(ReputationLedger::new(Arc::clone(&store)));
    let registry =
        Arc::new(ServiceRegistry::open(Arc::clone(&store)).context("opening registry")?);
    let offline_queue =
        Arc::new(OfflineQueue::open(&store.offline_queue_path()).context("opening offline queue")?);

    // ── Protocol state ────────────────────────────────────────────────────────
    let sessions = Arc::new(SessionManager::new(SessionConfig::default()));
    let contracts = Arc::new(ContractEngine::new(Arc::clone(&keypair)));
    let escrow = Arc::new(EscrowVault::new(Arc::clone(&economy)));
    let monitor = Arc::new(EconomyMonitor::new(
        Arc::clone(&economy),
        MonitorConfig::default(),
    ));
    let relay = args.relay.then(|| {
        Arc::new(RelayService::new(RelayConfig {
            relay_id: format!("relay-{entity_id}"),
            ..RelayConfig::default()
        }))
    });

    let endpoint = args
        .endpoint
        .clone()
        .unwrap_or_else(|| format!("http://{}", args.listen));

    let state = Arc::new(ApiState {
        entity_id: entity_id.clone(),
        keypair: Arc::clone(&keypair),
        sessions: Arc::clone(&sessions),
        economy: Arc::clone(&economy),
        monitor: Arc::clone(&monitor),
        reputation: Arc::clone(&reputation),
        registry: Arc::clone(&registry),
        relay: relay.clone(),
        contracts: Arc::clone(&contracts),
        escrow: Arc::clone(&escrow),
        replay: tokio::sync::Mutex::new(ReplayGuard::default()),
        chunks: tokio::sync::Mutex::new(ChunkManager::default()),
        peers: tokio::sync::Mutex::new(Default::default()),
        inbox: tokio::sync::Mutex::new(Vec::new()),
        auth: AuthService::new(args.jwt_secret.clone()),
        client: PeerClient::default(),
        stats: tokio::sync::Mutex::new(Default::default()),
    });

    // ── Shutdown signal shared by every background task ───────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── DHT overlay ───────────────────────────────────────────────────────────
    let dht = DhtNode::bind(
        entity_id.clone(),
        Arc::clone(&keypair),
        DhtConfig {
            listen_addr: args.dht_listen,
            bootstrap: args.dht_bootstrap.clone(),
            ..DhtConfig::default()
        },
    )
    .await
    .context("binding DHT socket")?;
    Arc::clone(&dht).spawn(shutdown_rx.clone());
    Arc::clone(&dht).spawn_republisher(shutdown_rx.clone());
    if !args.dht_bootstrap.is_empty() {
        let known = dht.bootstrap().await;
        info!(known, "DHT bootstrapped");
    }
    dht.register_self(
        &endpoint,
        args.capabilities.clone(),
        chrono::Utc::now().timestamp(),
    )
    .await
    .context("registering in DHT")?;

    // ── Learn configured peers ────────────────────────────────────────────────
    for peer_endpoint in &args.peers {
        match state.client.fetch_public_key(peer_endpoint).await {
            Ok((peer_id, public_key)) => {
                contracts
                    .register_public_key(peer_id.clone(), public_key.clone())
                    .await;
                state
                    .register_peer(peer_id.clone(), public_key, Some(peer_endpoint.clone()))
                    .await;
                info!(peer = %peer_id, endpoint = %peer_endpoint, "registered peer");
            }
            Err(e) => warn!(endpoint = %peer_endpoint, error = %e, "peer key fetch failed"),
        }
    }

    // ── HTTP surface ──────────────────────────────────────────────────────────
    let (local_addr, server_handle) =
        pactnet_api::serve(Arc::clone(&state), args.listen, shutdown_rx.clone())
            .await
            .context("starting HTTP server")?;
    info!(%local_addr, %endpoint, "node serving");

    // ── Background sweepers ───────────────────────────────────────────────────
    Arc::clone(&sessions).spawn_sweeper(shutdown_rx.clone());
    Arc::clone(&monitor).spawn(shutdown_rx.clone());
    spawn_chunk_sweeper(Arc::clone(&state), shutdown_rx.clone());
    spawn_registry_sweeper(Arc::clone(&registry), shutdown_rx.clone());
    if let Some(relay) = &relay {
        spawn_relay_sweeper(Arc::clone(relay), shutdown_rx.clone());
    }
    spawn_offline_retry(
        Arc::clone(&state),
        Arc::clone(&offline_queue),
        shutdown_rx.clone(),
    );

    // ── Agent loop: consume ordered inbound messages ──────────────────────────
    let sender = MessageSender::new(Arc::clone(&state));
    let agent_state = Arc::clone(&state);
    let mut agent_shutdown = shutdown_rx.clone();
    let agent = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(500));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for (peer, body) in agent_state.drain_inbox().await {
                        handle_application_message(&sender, &peer, body).await;
                    }
                }
                _ = agent_shutdown.changed() => {
                    if *agent_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    info!("node ready");
    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    let _ = agent.await;
    server_handle.abort();
    Ok(())
}

/// Minimal agent behavior: acknowledge delegated tasks, log the rest. Full
/// task execution plugs in here.
async fn handle_application_message(
    sender: &MessageSender,
    peer: &pactnet_core::types::EntityId,
    body: pactnet_core::message::MessageBody,
) {
    use pactnet_core::message::{MessageBody, TaskResultBody};
    match body {
        MessageBody::Delegate(delegate) => {
            info!(from = %peer, task = %delegate.task_id, "task delegated, acknowledging");
            let result = MessageBody::TaskResult(TaskResultBody {
                task_id: delegate.task_id,
                status: "accepted".into(),
                output: String::new(),
                duration_secs: None,
            });
            if let Err(e) = sender.send(peer, &result).await {
                warn!(to = %peer, error = %e, "failed to acknowledge delegation");
            }
        }
        other => {
            info!(from = %peer, msg_type = other.msg_type(), "application message");
        }
    }
}

// ── Sweepers ─────────────────────────────────────────────────────────────────

fn spawn_chunk_sweeper(state: Arc<ApiState>, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            TRANSFER_SWEEP_INTERVAL_SECS,
        ));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    let swept = state.chunks.lock().await.sweep_expired(now);
                    if swept > 0 {
                        info!(swept, "expired chunk transfers removed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });
}

fn spawn_registry_sweeper(registry: Arc<ServiceRegistry>, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    if let Err(e) = registry.cleanup_stale(now).await {
                        warn!(error = %e, "registry cleanup failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });
}

fn spawn_relay_sweeper(relay: Arc<RelayService>, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    relay.evict_stale(now).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });
}

/// Retry durably queued messages whose backoff has elapsed, and purge
/// delivered/expired rows.
fn spawn_offline_retry(
    state: Arc<ApiState>,
    queue: Arc<OfflineQueue>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    match queue.due_for_retry(now, 50).await {
                        Ok(due) => {
                            for queued in due {
                                retry_queued(&state, &queue, queued, now).await;
                            }
                        }
                        Err(e) => warn!(error = %e, "offline queue poll failed"),
                    }
                    if let Err(e) = queue.cleanup_expired(now).await {
                        warn!(error = %e, "offline queue cleanup failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });
}

async fn retry_queued(
    state: &Arc<ApiState>,
    queue: &Arc<OfflineQueue>,
    queued: QueuedMessage,
    now: i64,
) {
    let Some(record) = state.peer(&queued.recipient_id).await else {
        let _ = queue.mark_failed(&queued.message_id, now).await;
        return;
    };
    let Some(endpoint) = record.endpoint else {
        let _ = queue.mark_failed(&queued.message_id, now).await;
        return;
    };
    let Ok(message) = serde_json::from_str(&queued.payload) else {
        warn!(message_id = %queued.message_id, "unreadable queued message dropped");
        let _ = queue.mark_delivered(&queued.message_id).await;
        return;
    };
    match state.client.send_message(&endpoint, &message).await {
        Ok(_) => {
            let _ = queue.mark_delivered(&queued.message_id).await;
            info!(message_id = %queued.message_id, "queued message delivered");
        }
        Err(e) => {
            warn!(message_id = %queued.message_id, error = %e, "queued delivery failed");
            let _ = queue.mark_failed(&queued.message_id, now).await;
        }
    }
}
