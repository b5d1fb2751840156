//! Outbound application sends: session establishment, sequencing and
//! transparent chunking over the peer HTTP transport.

use std::sync::Arc;

use chrono::Utc;

use pactnet_core::message::{HandshakeBody, MessageBody};
use pactnet_core::types::{EntityId, SessionId};
use pactnet_core::PactError;
use pactnet_proto::build_message;
use pactnet_session::SessionState;

use crate::state::ApiState;

/// High-level sender bound to the node's shared state.
pub struct MessageSender {
    state: Arc<ApiState>,
}

impl MessageSender {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }

    /// Send an application message to `peer`, establishing a session first
    /// if none is active. Large payloads are fragmented automatically.
    pub async fn send(&self, peer: &EntityId, body: &MessageBody) -> Result<(), PactError> {
        let record = self
            .state
            .peer(peer)
            .await
            .ok_or_else(|| PactError::UnknownSender(peer.to_string()))?;
        let endpoint = record
            .endpoint
            .clone()
            .ok_or_else(|| PactError::UnknownRecipient(peer.to_string()))?;

        let session_id = self.ensure_active_session(peer, &endpoint).await?;

        let payload = serde_json::to_vec(body).map_err(|e| PactError::Internal(e.to_string()))?;
        let needs_chunking = self.state.chunks.lock().await.needs_chunking(payload.len());

        if needs_chunking {
            self.send_chunked(peer, &endpoint, session_id, body.msg_type(), &payload)
                .await
        } else {
            self.send_sequenced(peer, &endpoint, session_id, body).await
        }
    }

    /// Explicitly close the session with `peer`.
    pub async fn close_session(&self, peer: &EntityId) -> Result<(), PactError> {
        let now = Utc::now().timestamp();
        let Some(session_id) = self
            .state
            .sessions
            .session_for_pair(&self.state.entity_id, peer, now)
            .await
        else {
            return Ok(());
        };
        if let Some(record) = self.state.peer(peer).await {
            if let Some(endpoint) = record.endpoint {
                let body = MessageBody::SessionClose(pactnet_core::message::SessionCloseBody {
                    session_id,
                });
                let msg = build_message(&self.state.keypair, peer, &body, None);
                let _ = self.state.client.send_message(&endpoint, &msg).await;
            }
        }
        self.state.sessions.close(&session_id).await
    }

    // ── Session establishment ────────────────────────────────────────────────

    async fn ensure_active_session(
        &self,
        peer: &EntityId,
        endpoint: &str,
    ) -> Result<SessionId, PactError> {
        let now = Utc::now().timestamp();
        if let Some(session_id) = self
            .state
            .sessions
            .session_for_pair(&self.state.entity_id, peer, now)
            .await
        {
            if self.state.sessions.state_of(&session_id).await == Some(SessionState::Active) {
                return Ok(session_id);
            }
        }
        self.handshake(peer, endpoint).await
    }

    /// Initiate a handshake and wait for the ack carried in the HTTP reply.
    async fn handshake(&self, peer: &EntityId, endpoint: &str) -> Result<SessionId, PactError> {
        let now = Utc::now().timestamp();
        let session_id = self
            .state
            .sessions
            .ensure_session(&self.state.entity_id, peer, now)
            .await;
        self.state
            .sessions
            .transition(&session_id, SessionState::HandshakeSent)
            .await?;

        let body = MessageBody::Handshake(HandshakeBody {
            session_id,
            x25519_public: self.state.keypair.x25519_public_hex(),
        });
        let msg = build_message(&self.state.keypair, peer, &body, None);
        let ack = self.state.client.send_message(endpoint, &msg).await?;
        self.state.stats.lock().await.messages_sent += 1;

        let reply = ack.reply.ok_or_else(|| {
            PactError::Internal("peer did not acknowledge handshake".into())
        })?;

        // The ack must verify under the peer's registered key.
        let record = self
            .state
            .peer(peer)
            .await
            .ok_or_else(|| PactError::UnknownSender(peer.to_string()))?;
        pactnet_proto::verify_envelope(&reply, record.public_key.as_str())?;

        match reply.decode_body()? {
            MessageBody::HandshakeAck(ack_body) if ack_body.session_id == session_id => {
                let shared = self.state.keypair.x25519_agree(&ack_body.x25519_public)?;
                self.state
                    .sessions
                    .set_session_key(&session_id, shared)
                    .await?;
                self.state
                    .sessions
                    .transition(&session_id, SessionState::Active)
                    .await?;
                tracing::info!(%peer, session = %session_id, "session established");
                Ok(session_id)
            }
            _ => Err(PactError::Internal("unexpected handshake reply".into())),
        }
    }

    // ── Delivery ─────────────────────────────────────────────────────────────

    async fn send_sequenced(
        &self,
        peer: &EntityId,
        endpoint: &str,
        session_id: SessionId,
        body: &MessageBody,
    ) -> Result<(), PactError> {
        let now = Utc::now().timestamp();
        let seq = self.state.sessions.allocate_send(&session_id, now).await?;
        let msg = build_message(&self.state.keypair, peer, body, Some((session_id, seq)));
        self.state
            .sessions
            .record_sent(&session_id, seq, msg.clone())
            .await;

        let ack = self.state.client.send_message(endpoint, &msg).await?;
        self.state.stats.lock().await.messages_sent += 1;

        // The receiver may hand back a NACK for an earlier gap.
        if let Some(reply) = ack.reply {
            if let Ok(MessageBody::Nack(nack)) = reply.decode_body() {
                let messages = self
                    .state
                    .sessions
                    .retransmit_range(&session_id, nack.start_seq, nack.end_seq)
                    .await?;
                for mut message in messages {
                    pactnet_proto::refresh_and_sign(&self.state.keypair, &mut message);
                    self.state.client.send_message(endpoint, &message).await?;
                    self.state.stats.lock().await.messages_sent += 1;
                }
            }
        }
        Ok(())
    }

    async fn send_chunked(
        &self,
        peer: &EntityId,
        endpoint: &str,
        session_id: SessionId,
        msg_type: &str,
        payload: &[u8],
    ) -> Result<(), PactError> {
        let (init, chunks) = self.state.chunks.lock().await.split(
            &self.state.entity_id,
            peer,
            msg_type,
            payload,
        )?;
        tracing::info!(
            %peer,
            transfer = %init.transfer_id,
            chunks = init.total_chunks,
            bytes = init.total_size,
            "sending chunked message"
        );

        self.send_sequenced(peer, endpoint, session_id, &MessageBody::ChunkInit(init))
            .await?;
        for chunk in chunks {
            self.send_sequenced(
                peer,
                endpoint,
                session_id,
                &MessageBody::Chunk(pactnet_core::message::ChunkBody { chunk }),
            )
            .await?;
        }
        Ok(())
    }
}
