//! Wire message envelope and typed payload bodies for peer protocol v1.1.
//!
//! A message on the wire is a JSON object carrying the envelope fields plus a
//! base64-encoded payload. The payload decodes into one [`MessageBody`]
//! variant selected by the envelope's `msg_type`; unknown types are rejected,
//! not silently dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::PROTOCOL_VERSION;
use crate::contract::{Agreement, TaskProposal, TaskQuote};
use crate::error::PactError;
use crate::types::{EntityId, Sequence, SessionId, TransferId};

// ── Envelope ─────────────────────────────────────────────────────────────────

/// Opaque payload wrapper: `data` is base64 of the JSON-serialized body.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payload {
    pub data: String,
}

/// The v1.1 wire envelope.
///
/// `signature` covers `version|msg_type|sender_id|recipient_id|timestamp|`
/// `nonce|payload.data|session_id|sequence` (absent fields contribute the
/// empty string); see [`WireMessage::signing_input`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireMessage {
    pub version: String,
    pub msg_type: String,
    pub sender_id: EntityId,
    pub recipient_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<Sequence>,
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    /// 16 random bytes, hex-encoded.
    pub nonce: String,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl WireMessage {
    /// The canonical signing pre-image (hashed with SHA-256 before signing).
    pub fn signing_input(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.version,
            self.msg_type,
            self.sender_id,
            self.recipient_id,
            self.timestamp,
            self.nonce,
            self.payload.data,
            self.session_id.map(|s| s.to_string()).unwrap_or_default(),
            self.sequence.map(|s| s.to_string()).unwrap_or_default(),
        )
    }

    /// Parse the envelope timestamp. Malformed timestamps count as expired.
    pub fn timestamp_utc(&self) -> Result<DateTime<Utc>, PactError> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| PactError::ExpiredTimestamp { skew_secs: i64::MAX })
    }

    /// Decode the payload into its typed body according to `msg_type`.
    pub fn decode_body(&self) -> Result<MessageBody, PactError> {
        use base64::Engine;
        let raw = base64::engine::general_purpose::STANDARD
            .decode(&self.payload.data)
            .map_err(|e| PactError::InvalidJson(format!("payload base64: {e}")))?;
        MessageBody::from_payload(&self.msg_type, &raw)
    }

    /// Byte size of the serialized message (used for chunking decisions).
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

// ── Chunk record ─────────────────────────────────────────────────────────────

/// One fragment of a chunked transfer. `data` is base64 on the wire; the
/// checksum is the first 32 hex chars of SHA-256 over the raw bytes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkRecord {
    pub transfer_id: TransferId,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub data: String,
    pub checksum: String,
}

impl ChunkRecord {
    pub fn data_bytes(&self) -> Result<Vec<u8>, PactError> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .map_err(|e| PactError::InvalidJson(format!("chunk base64: {e}")))
    }
}

// ── Typed bodies ─────────────────────────────────────────────────────────────

/// Typed payload bodies, one per `msg_type`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    Ping(PingBody),
    Status(StatusBody),
    Delegate(DelegateBody),
    TaskResult(TaskResultBody),
    ChunkInit(ChunkInitBody),
    Chunk(ChunkBody),
    Nack(NackBody),
    Handshake(HandshakeBody),
    HandshakeAck(HandshakeBody),
    SessionClose(SessionCloseBody),
    Proposal(TaskProposal),
    Quote(TaskQuote),
    Agreement(Agreement),
    Receipt(ReceiptBody),
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct PingBody {}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusBody {
    pub state: String,
    pub tasks_pending: u32,
    pub tasks_completed: u32,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DelegateBody {
    pub task_id: String,
    pub task_type: String,
    pub description: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskResultBody {
    pub task_id: String,
    pub status: String,
    pub output: String,
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkInitBody {
    pub transfer_id: TransferId,
    pub total_chunks: u32,
    pub total_size: u64,
    /// The msg_type of the reassembled message.
    pub msg_type: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkBody {
    pub chunk: ChunkRecord,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NackBody {
    pub start_seq: Sequence,
    pub end_seq: Sequence,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandshakeBody {
    pub session_id: SessionId,
    /// X25519 public key, hex-encoded, for the session key agreement.
    pub x25519_public: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionCloseBody {
    pub session_id: SessionId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceiptBody {
    pub agreement_id: String,
    pub task_id: String,
    pub status: String,
    #[serde(default)]
    pub detail: Option<String>,
}

impl MessageBody {
    /// The wire `msg_type` tag for this body.
    pub fn msg_type(&self) -> &'static str {
        match self {
            MessageBody::Ping(_)         => "ping",
            MessageBody::Status(_)       => "status",
            MessageBody::Delegate(_)     => "delegate",
            MessageBody::TaskResult(_)   => "result",
            MessageBody::ChunkInit(_)    => "chunk_init",
            MessageBody::Chunk(_)        => "chunk",
            MessageBody::Nack(_)         => "nack",
            MessageBody::Handshake(_)    => "handshake",
            MessageBody::HandshakeAck(_) => "handshake_ack",
            MessageBody::SessionClose(_) => "session_close",
            MessageBody::Proposal(_)     => "proposal",
            MessageBody::Quote(_)        => "quote",
            MessageBody::Agreement(_)    => "agreement",
            MessageBody::Receipt(_)      => "receipt",
        }
    }

    /// Decode a body from raw payload JSON, dispatching on `msg_type`.
    pub fn from_payload(msg_type: &str, raw: &[u8]) -> Result<Self, PactError> {
        let parse_err = |e: serde_json::Error| PactError::InvalidJson(e.to_string());
        let body = match msg_type {
            "ping"          => MessageBody::Ping(serde_json::from_slice(raw).map_err(parse_err)?),
            "status"        => MessageBody::Status(serde_json::from_slice(raw).map_err(parse_err)?),
            "delegate"      => MessageBody::Delegate(serde_json::from_slice(raw).map_err(parse_err)?),
            "result"        => MessageBody::TaskResult(serde_json::from_slice(raw).map_err(parse_err)?),
            "chunk_init"    => MessageBody::ChunkInit(serde_json::from_slice(raw).map_err(parse_err)?),
            "chunk"         => MessageBody::Chunk(serde_json::from_slice(raw).map_err(parse_err)?),
            "nack"          => MessageBody::Nack(serde_json::from_slice(raw).map_err(parse_err)?),
            "handshake"     => MessageBody::Handshake(serde_json::from_slice(raw).map_err(parse_err)?),
            "handshake_ack" => MessageBody::HandshakeAck(serde_json::from_slice(raw).map_err(parse_err)?),
            "session_close" => MessageBody::SessionClose(serde_json::from_slice(raw).map_err(parse_err)?),
            "proposal"      => MessageBody::Proposal(serde_json::from_slice(raw).map_err(parse_err)?),
            "quote"         => MessageBody::Quote(serde_json::from_slice(raw).map_err(parse_err)?),
            "agreement"     => MessageBody::Agreement(serde_json::from_slice(raw).map_err(parse_err)?),
            "receipt"       => MessageBody::Receipt(serde_json::from_slice(raw).map_err(parse_err)?),
            other => {
                return Err(PactError::InvalidJson(format!("unknown msg_type: {other}")));
            }
        };
        Ok(body)
    }

    /// Serialize the body and wrap it into a base64 payload.
    pub fn to_payload(&self) -> Payload {
        use base64::Engine;
        let raw = serde_json::to_vec(self).expect("message body serialization is infallible");
        Payload {
            data: base64::engine::general_purpose::STANDARD.encode(raw),
        }
    }
}

/// True if the envelope carries the canonical protocol version.
pub fn is_supported_version(version: &str) -> bool {
    version == PROTOCOL_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(msg_type: &str, body: &MessageBody) -> WireMessage {
        WireMessage {
            version: PROTOCOL_VERSION.into(),
            msg_type: msg_type.into(),
            sender_id: "alice".into(),
            recipient_id: "bob".into(),
            session_id: None,
            sequence: None,
            timestamp: "2026-01-01T00:00:00Z".into(),
            nonce: "00".repeat(16),
            payload: body.to_payload(),
            signature: None,
        }
    }

    #[test]
    fn body_round_trips_through_payload() {
        let body = MessageBody::Status(StatusBody {
            state: "active".into(),
            tasks_pending: 2,
            tasks_completed: 7,
            capabilities: vec!["code_review".into()],
        });
        let msg = envelope("status", &body);
        match msg.decode_body().unwrap() {
            MessageBody::Status(s) => {
                assert_eq!(s.state, "active");
                assert_eq!(s.tasks_completed, 7);
            }
            other => panic!("wrong body: {other:?}"),
        }
    }

    #[test]
    fn unknown_msg_type_is_rejected() {
        let body = MessageBody::Ping(PingBody::default());
        let msg = envelope("telepathy", &body);
        let err = msg.decode_body().unwrap_err();
        assert_eq!(err.code(), "INVALID_JSON");
    }

    #[test]
    fn signing_input_includes_session_fields_when_present() {
        let body = MessageBody::Ping(PingBody::default());
        let mut msg = envelope("ping", &body);
        let without = msg.signing_input();
        assert!(without.ends_with("||"));

        msg.session_id = Some(uuid::Uuid::nil());
        msg.sequence = Some(42);
        let with = msg.signing_input();
        assert!(with.ends_with("|00000000-0000-0000-0000-000000000000|42"));
        assert_ne!(without, with);
    }
}
