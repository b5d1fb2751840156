//! Relay endpoints, active when the node runs with relaying enabled.
//!
//! NAT-bound peers register here, heartbeat once a minute, poll their inbox
//! over the control channel, and anyone may ask the relay to forward an
//! opaque envelope toward a registered peer.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use pactnet_core::types::{EntityId, PublicKeyHex};
use pactnet_core::PactError;
use pactnet_discovery::{ForwardOutcome, RelayMessage, RelayService};

use crate::error::ApiError;
use crate::state::ApiState;

fn relay_of(state: &ApiState) -> Result<&Arc<RelayService>, ApiError> {
    state
        .relay
        .as_ref()
        .ok_or_else(|| ApiError(PactError::Internal("relay not enabled on this node".into())))
}

#[derive(Deserialize)]
pub struct RelayRegisterRequest {
    pub entity_id: EntityId,
    pub public_key: PublicKeyHex,
    #[serde(default)]
    pub connection_info: serde_json::Value,
}

pub async fn register(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<RelayRegisterRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let relay = relay_of(&state)?;
    let now = Utc::now().timestamp();
    let queued = relay
        .register(req.entity_id.clone(), req.public_key, req.connection_info, now)
        .await;
    Ok(Json(serde_json::json!({
        "status": "registered",
        "entity_id": req.entity_id,
        "queued_messages": queued,
        "heartbeat_interval": pactnet_core::constants::RELAY_HEARTBEAT_INTERVAL_SECS,
    })))
}

pub async fn heartbeat(
    State(state): State<Arc<ApiState>>,
    Path(entity): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let relay = relay_of(&state)?;
    let entity = EntityId::new(entity);
    let now = Utc::now().timestamp();
    if !relay.heartbeat(&entity, now).await {
        return Err(PactError::UnknownRecipient(entity.to_string()).into());
    }
    Ok(Json(serde_json::json!({ "status": "alive" })))
}

pub async fn forward(
    State(state): State<Arc<ApiState>>,
    Json(message): Json<RelayMessage>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let relay = relay_of(&state)?;
    let now = Utc::now().timestamp();
    let outcome = relay.forward(message, now).await?;
    let response = match outcome {
        ForwardOutcome::Delivered => serde_json::json!({ "status": "delivered" }),
        ForwardOutcome::Queued { position } => {
            serde_json::json!({ "status": "queued", "queue_position": position })
        }
    };
    Ok(Json(response))
}

pub async fn drain(
    State(state): State<Arc<ApiState>>,
    Path(entity): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let relay = relay_of(&state)?;
    let messages = relay.drain_inbox(&EntityId::new(entity)).await;
    Ok(Json(serde_json::json!({ "messages": messages })))
}

pub async fn stats(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let relay = relay_of(&state)?;
    Ok(Json(serde_json::to_value(relay.stats().await).unwrap_or_default()))
}
