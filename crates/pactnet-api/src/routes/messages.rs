//! Peer message endpoints: `POST /v1.1/message`, the legacy `POST
//! /v0.1/message`, health and public-key.
//!
//! Receive pipeline, in order: JSON → version → recipient → timestamp
//! window → replay → signature → session/sequence (v1.1) → dispatch.
//! Rejections answer 400 with the short error code; an accepted message
//! answers `{status: "received"}` with an optional reply envelope (e.g. a
//! NACK covering a sequence gap).

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;

use pactnet_core::constants::{LEGACY_PROTOCOL_VERSION, TIMESTAMP_TOLERANCE_SECS};
use pactnet_core::message::{HandshakeBody, MessageBody, NackBody};
use pactnet_core::types::EntityId;
use pactnet_core::{PactError, WireMessage};
use pactnet_proto::chunk::ChunkOutcome;
use pactnet_proto::{build_message, refresh_and_sign, validate_envelope, verify_envelope};
use pactnet_session::{SeqOutcome, SessionState};

use crate::error::ApiError;
use crate::state::ApiState;

// ── Handlers ─────────────────────────────────────────────────────────────────

pub async fn receive_v11(State(state): State<Arc<ApiState>>, body: String) -> Response {
    receive(state, body, false).await
}

pub async fn receive_v01(State(state): State<Arc<ApiState>>, body: String) -> Response {
    receive(state, body, true).await
}

async fn receive(state: Arc<ApiState>, body: String, legacy: bool) -> Response {
    let msg: WireMessage = match serde_json::from_str(&body) {
        Ok(msg) => msg,
        Err(e) => {
            state.stats.lock().await.messages_rejected += 1;
            return ApiError(PactError::InvalidJson(e.to_string())).into_response();
        }
    };

    match process(&state, msg, legacy).await {
        Ok(reply) => {
            let mut response = serde_json::json!({ "status": "received" });
            if let Some(reply) = reply {
                response["reply"] = serde_json::to_value(&reply).unwrap_or_default();
            }
            Json(response).into_response()
        }
        Err(e) => {
            state.stats.lock().await.messages_rejected += 1;
            ApiError(e).into_response()
        }
    }
}

pub async fn health(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    let stats = *state.stats.lock().await;
    let sessions = state.sessions.stats().await;
    Json(serde_json::json!({
        "status": "healthy",
        "version": pactnet_core::constants::PROTOCOL_VERSION,
        "entity_id": state.entity_id,
        "stats": {
            "messages_received": stats.messages_received,
            "messages_verified": stats.messages_verified,
            "messages_rejected": stats.messages_rejected,
            "messages_sent": stats.messages_sent,
            "active_sessions": sessions.active_sessions,
            "sessions_created": sessions.sessions_created,
        },
    }))
}

pub async fn public_key(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "entity_id": state.entity_id,
        "public_key": state.keypair.public_key_hex(),
        "algorithm": "Ed25519",
    }))
}

#[derive(serde::Deserialize)]
pub struct RegisterPeerRequest {
    pub entity_id: EntityId,
    pub public_key: pactnet_core::types::PublicKeyHex,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Register a peer's public key (and optionally its endpoint) so its
/// messages verify. Peers discovered via the DHT register implicitly; this
/// endpoint covers direct introductions.
pub async fn register_peer(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<RegisterPeerRequest>,
) -> Json<serde_json::Value> {
    state
        .contracts
        .register_public_key(req.entity_id.clone(), req.public_key.clone())
        .await;
    state
        .register_peer(req.entity_id.clone(), req.public_key, req.endpoint)
        .await;
    Json(serde_json::json!({ "status": "registered", "entity_id": req.entity_id }))
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

async fn process(
    state: &Arc<ApiState>,
    msg: WireMessage,
    legacy: bool,
) -> Result<Option<WireMessage>, PactError> {
    let now = Utc::now();
    state.stats.lock().await.messages_received += 1;

    // Structural validation.
    if legacy {
        if msg.version != LEGACY_PROTOCOL_VERSION {
            return Err(PactError::InvalidVersion(msg.version.clone()));
        }
        if msg.recipient_id != state.entity_id {
            return Err(PactError::UnknownRecipient(msg.recipient_id.to_string()));
        }
        let ts = msg.timestamp_utc()?;
        let skew = (now - ts).num_seconds().abs();
        if skew > TIMESTAMP_TOLERANCE_SECS {
            return Err(PactError::ExpiredTimestamp { skew_secs: skew });
        }
    } else {
        validate_envelope(&msg, &state.entity_id, now)?;
    }

    // Replay defense.
    state
        .replay
        .lock()
        .await
        .check_and_insert(&msg.sender_id, &msg.nonce)?;

    // Signature under the sender's registered key.
    let peer = state
        .peer(&msg.sender_id)
        .await
        .ok_or_else(|| PactError::UnknownSender(msg.sender_id.to_string()))?;
    verify_envelope(&msg, peer.public_key.as_str())?;
    state.stats.lock().await.messages_verified += 1;

    let body = msg.decode_body()?;

    // Session control messages bypass sequencing.
    match &body {
        MessageBody::Handshake(handshake) => {
            return handle_handshake(state, &msg.sender_id, handshake, now.timestamp()).await;
        }
        MessageBody::HandshakeAck(ack) => {
            handle_handshake_ack(state, ack).await?;
            return Ok(None);
        }
        MessageBody::SessionClose(close) => {
            state.sessions.close(&close.session_id).await?;
            return Ok(None);
        }
        _ => {}
    }

    // Ordered delivery for sequenced v1.1 traffic.
    if let (false, Some(session_id), Some(seq)) = (legacy, msg.session_id, msg.sequence) {
        let outcome = state
            .sessions
            .accept_inbound(&session_id, seq, msg.clone(), now.timestamp())
            .await?;
        return match outcome {
            SeqOutcome::Deliver(messages) => {
                let mut reply = None;
                for delivered in messages {
                    let sender = delivered.sender_id.clone();
                    let delivered_body = delivered.decode_body()?;
                    if let Some(r) = dispatch(state, &sender, delivered_body).await? {
                        reply = Some(r);
                    }
                }
                Ok(reply)
            }
            SeqOutcome::Buffered { nack } => Ok(nack.map(|nack| {
                tracing::warn!(
                    session = %session_id,
                    start = nack.start_seq,
                    end = nack.end_seq,
                    "sequence gap, requesting retransmission"
                );
                build_message(
                    &state.keypair,
                    &msg.sender_id,
                    &MessageBody::Nack(nack),
                    Some((session_id, 0)),
                )
            })),
            SeqOutcome::Duplicate => Ok(None),
        };
    }

    dispatch(state, &msg.sender_id, body).await
}

/// Handle one in-order application or transfer message.
async fn dispatch(
    state: &Arc<ApiState>,
    sender: &EntityId,
    body: MessageBody,
) -> Result<Option<WireMessage>, PactError> {
    match body {
        MessageBody::Ping(_) => Ok(None),

        MessageBody::ChunkInit(init) => {
            let now = Utc::now().timestamp();
            state
                .chunks
                .lock()
                .await
                .init_transfer(&init, sender, &state.entity_id, now)?;
            Ok(None)
        }

        MessageBody::Chunk(chunk_body) => {
            let now = Utc::now().timestamp();
            let outcome = state
                .chunks
                .lock()
                .await
                .receive_chunk(&chunk_body.chunk, now)?;
            match outcome {
                ChunkOutcome::Complete { msg_type, bytes } => {
                    let inner = MessageBody::from_payload(&msg_type, &bytes)?;
                    state.inbox.lock().await.push((sender.clone(), inner));
                    Ok(None)
                }
                ChunkOutcome::BadChecksum { chunk_index } => {
                    // Ask for that chunk again.
                    let nack = NackBody {
                        start_seq: chunk_index as u64,
                        end_seq: chunk_index as u64,
                    };
                    Ok(Some(build_message(
                        &state.keypair,
                        sender,
                        &MessageBody::Nack(nack),
                        None,
                    )))
                }
                ChunkOutcome::Progress { .. } | ChunkOutcome::Duplicate => Ok(None),
            }
        }

        MessageBody::Nack(nack) => {
            retransmit(state, sender, &nack).await;
            Ok(None)
        }

        // Contract records must verify before they reach the application.
        MessageBody::Proposal(proposal) => {
            state.contracts.verify_proposal(&proposal).await?;
            state
                .inbox
                .lock()
                .await
                .push((sender.clone(), MessageBody::Proposal(proposal)));
            Ok(None)
        }
        MessageBody::Quote(quote) => {
            state.contracts.verify_quote(&quote).await?;
            state
                .inbox
                .lock()
                .await
                .push((sender.clone(), MessageBody::Quote(quote)));
            Ok(None)
        }
        MessageBody::Agreement(agreement) => {
            state.contracts.verify_agreement(&agreement).await?;
            state
                .inbox
                .lock()
                .await
                .push((sender.clone(), MessageBody::Agreement(agreement)));
            Ok(None)
        }

        // Remaining application messages queue for the agent loop.
        other @ (MessageBody::Status(_)
        | MessageBody::Delegate(_)
        | MessageBody::TaskResult(_)
        | MessageBody::Receipt(_)) => {
            state.inbox.lock().await.push((sender.clone(), other));
            Ok(None)
        }

        MessageBody::Handshake(_) | MessageBody::HandshakeAck(_) | MessageBody::SessionClose(_) => {
            // Session control is handled before sequencing.
            Ok(None)
        }
    }
}

// ── Session establishment ────────────────────────────────────────────────────

async fn handle_handshake(
    state: &Arc<ApiState>,
    sender: &EntityId,
    handshake: &HandshakeBody,
    now: i64,
) -> Result<Option<WireMessage>, PactError> {
    state
        .sessions
        .adopt_inbound(handshake.session_id, &state.entity_id, sender, now)
        .await?;

    let shared = state.keypair.x25519_agree(&handshake.x25519_public)?;
    state
        .sessions
        .set_session_key(&handshake.session_id, shared)
        .await?;
    state
        .sessions
        .transition(&handshake.session_id, SessionState::Active)
        .await?;

    let ack = MessageBody::HandshakeAck(HandshakeBody {
        session_id: handshake.session_id,
        x25519_public: state.keypair.x25519_public_hex(),
    });
    Ok(Some(build_message(&state.keypair, sender, &ack, None)))
}

async fn handle_handshake_ack(
    state: &Arc<ApiState>,
    ack: &HandshakeBody,
) -> Result<(), PactError> {
    let shared = state.keypair.x25519_agree(&ack.x25519_public)?;
    state
        .sessions
        .set_session_key(&ack.session_id, shared)
        .await?;
    state
        .sessions
        .transition(&ack.session_id, SessionState::Active)
        .await?;
    Ok(())
}

// ── Retransmission ───────────────────────────────────────────────────────────

/// Answer a NACK: pull the requested range from the send history, re-sign
/// each message with a fresh nonce and timestamp, and resend in the
/// background.
async fn retransmit(state: &Arc<ApiState>, peer: &EntityId, nack: &NackBody) {
    let Some(record) = state.peer(peer).await else {
        tracing::warn!(%peer, "NACK from peer with no endpoint");
        return;
    };
    let Some(endpoint) = record.endpoint else {
        tracing::warn!(%peer, "NACK from peer with no endpoint");
        return;
    };
    let now = Utc::now().timestamp();
    let Some(session_id) = state.sessions.session_for_pair(&state.entity_id, peer, now).await
    else {
        return;
    };
    let messages = match state
        .sessions
        .retransmit_range(&session_id, nack.start_seq, nack.end_seq)
        .await
    {
        Ok(messages) => messages,
        Err(e) => {
            tracing::warn!(error = %e, "cannot answer NACK");
            return;
        }
    };

    let state = Arc::clone(state);
    tokio::spawn(async move {
        for mut message in messages {
            refresh_and_sign(&state.keypair, &mut message);
            match state.client.send_message(&endpoint, &message).await {
                Ok(_) => {
                    state.stats.lock().await.messages_sent += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, seq = ?message.sequence, "retransmission failed")
                }
            }
        }
    });
}
