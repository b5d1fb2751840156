//! Per-peer-pair secure session state.

use std::fmt;

use pactnet_core::constants::SESSION_TTL_SECS;
use pactnet_core::types::{EntityId, Sequence, SessionId, Timestamp};
use pactnet_core::PactError;

use crate::sequence::{ReceiveState, SendHistory};

// ── State machine ────────────────────────────────────────────────────────────

/// Strict session lifecycle. `Closed` is terminal; `Error` is entered on
/// repeated signature failures or sequence violations and blocks sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    HandshakeSent,
    HandshakeReceived,
    Active,
    Closing,
    Closed,
    Error,
}

impl SessionState {
    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::*;
        match (self, to) {
            (Init, HandshakeSent)
            | (Init, HandshakeReceived)
            | (HandshakeSent, Active)
            | (HandshakeReceived, Active)
            | (Active, Closing)
            | (Closing, Closed) => true,
            // Any live state may error out or begin closing.
            (Init | HandshakeSent | HandshakeReceived | Active, Error) => true,
            (HandshakeSent | HandshakeReceived, Closing) => true,
            _ => false,
        }
    }

    /// Whether application messages may be sent in this state.
    pub fn can_send(self) -> bool {
        matches!(self, SessionState::Active)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Error)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Init              => "init",
            SessionState::HandshakeSent     => "handshake_sent",
            SessionState::HandshakeReceived => "handshake_received",
            SessionState::Active            => "active",
            SessionState::Closing           => "closing",
            SessionState::Closed            => "closed",
            SessionState::Error             => "error",
        };
        write!(f, "{s}")
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

/// One ordered, signed, time-bounded channel between two entities.
pub struct Session {
    pub session_id: SessionId,
    pub local: EntityId,
    pub peer: EntityId,
    pub state: SessionState,
    pub established_at: Timestamp,
    pub expires_at: Timestamp,
    /// Next sequence number to allocate for an outbound message.
    next_send_seq: Sequence,
    /// Inbound ordering state (expected seq, reorder buffer, gaps).
    pub receive: ReceiveState,
    /// Recent outbound messages for NACK retransmission.
    pub sent: SendHistory,
    /// Symmetric key derived from the X25519 handshake, when E2E is on.
    pub session_key: Option<[u8; 32]>,
}

impl Session {
    pub fn new(
        session_id: SessionId,
        local: EntityId,
        peer: EntityId,
        now: Timestamp,
        max_gap: u64,
    ) -> Self {
        Self {
            session_id,
            local,
            peer,
            state: SessionState::Init,
            established_at: now,
            expires_at: now + SESSION_TTL_SECS,
            next_send_seq: 1,
            receive: ReceiveState::new(max_gap),
            sent: SendHistory::default(),
            session_key: None,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.expires_at
    }

    /// Allocate the next outbound sequence number (monotone from 1).
    pub fn allocate_seq(&mut self) -> Sequence {
        let seq = self.next_send_seq;
        self.next_send_seq += 1;
        seq
    }

    pub fn last_allocated_seq(&self) -> Sequence {
        self.next_send_seq - 1
    }

    /// Transition the state machine, rejecting forbidden moves.
    pub fn transition(&mut self, to: SessionState) -> Result<(), PactError> {
        if !self.state.can_transition(to) {
            return Err(PactError::StateTransitionInvalid {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        if to.is_terminal() || to == SessionState::Closing {
            // Pending reassembly and gap bookkeeping die with the session.
            self.receive.clear();
        }
        Ok(())
    }
}
