//! HTTP server assembly: one axum router over the shared [`ApiState`] with
//! permissive CORS, served until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::routes::{economy, marketplace, messages, relay};
use crate::state::ApiState;

pub fn build_router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        // Peer messaging surface.
        .route("/v1.1/message", post(messages::receive_v11))
        .route("/v0.1/message", post(messages::receive_v01))
        .route("/v1.1/health", get(messages::health))
        .route("/v1.1/public-key", get(messages::public_key))
        .route("/v1.1/peers", post(messages::register_peer))
        // Marketplace surface.
        .route(
            "/marketplace/services",
            get(marketplace::list_services).post(marketplace::register_service),
        )
        .route(
            "/marketplace/services/:entity_id/heartbeat",
            post(marketplace::service_heartbeat),
        )
        .route(
            "/marketplace/tasks",
            get(marketplace::list_tasks).post(marketplace::create_task),
        )
        .route("/marketplace/tasks/:task_id/assign", post(marketplace::assign_task))
        .route(
            "/marketplace/tasks/:task_id/complete",
            post(marketplace::complete_task),
        )
        .route("/marketplace/tasks/:task_id/cancel", post(marketplace::cancel_task))
        // Ledger surface.
        .route("/token/balance/:entity_id", get(economy::balance))
        .route("/economy/wallets", post(economy::create_wallet))
        .route("/economy/transfer", post(economy::transfer))
        .route("/economy/mint", post(economy::mint))
        .route("/economy/supply", get(economy::supply))
        .route("/economy/alerts", get(economy::alerts))
        // Reputation surface.
        .route("/reputation/:entity_id", get(economy::reputation))
        .route(
            "/reputation/:entity_id/evaluation",
            post(economy::submit_evaluation),
        )
        // Relay surface (enabled per node configuration).
        .route("/relay/register", post(relay::register))
        .route("/relay/heartbeat/:entity_id", post(relay::heartbeat))
        .route("/relay/forward", post(relay::forward))
        .route("/relay/messages/:entity_id", get(relay::drain))
        .route("/relay/stats", get(relay::stats))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve. Returns the bound address and the server task handle.
pub async fn serve(
    state: Arc<ApiState>,
    addr: SocketAddr,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let router = build_router(state);

    let handle = tokio::spawn(async move {
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            loop {
                if shutdown.changed().await.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        });
        if let Err(e) = serve.await {
            tracing::error!(error = %e, "HTTP server exited with error");
        }
    });

    info!(%local_addr, "HTTP server started");
    Ok((local_addr, handle))
}
