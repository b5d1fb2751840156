//! Session manager: UUID-keyed sessions per peer pair, TTL expiry, NACK
//! timeout supervision and the five-minute background sweeper.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use pactnet_core::constants::{
    MAX_SEQUENCE_GAP, NACK_TIMEOUT_SECS, SESSION_SWEEP_INTERVAL_SECS, SESSION_TTL_SECS,
};
use pactnet_core::types::{EntityId, Sequence, SessionId, Timestamp};
use pactnet_core::{PactError, WireMessage};

use crate::sequence::SeqOutcome;
use crate::session::{Session, SessionState};

// ── Config & stats ───────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub ttl_secs: i64,
    pub max_gap: u64,
    pub sweep_interval_secs: u64,
    pub nack_timeout_secs: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: SESSION_TTL_SECS,
            max_gap: MAX_SEQUENCE_GAP,
            sweep_interval_secs: SESSION_SWEEP_INTERVAL_SECS,
            nack_timeout_secs: NACK_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct SessionStats {
    pub sessions_created: u64,
    pub sessions_expired: u64,
    pub sessions_errored: u64,
    pub messages_ordered: u64,
    pub active_sessions: usize,
}

/// Summary row for the health endpoint.
#[derive(Clone, Debug, serde::Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub local: EntityId,
    pub peer: EntityId,
    pub state: String,
    pub next_expected_seq: Sequence,
    pub expires_at: Timestamp,
}

struct Inner {
    by_pair: HashMap<(EntityId, EntityId), SessionId>,
    sessions: HashMap<SessionId, Session>,
    stats: SessionStats,
}

/// Owns every live session. All operations lock the single inner mutex,
/// mutate, and release before any I/O happens.
pub struct SessionManager {
    config: SessionConfig,
    inner: Mutex<Inner>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                by_pair: HashMap::new(),
                sessions: HashMap::new(),
                stats: SessionStats::default(),
            }),
        }
    }

    // ── Creation & lookup ────────────────────────────────────────────────────

    /// Get the live session for `(local, peer)`, creating one in `Init` if
    /// none exists or the existing one is expired/terminal.
    pub async fn ensure_session(
        &self,
        local: &EntityId,
        peer: &EntityId,
        now: Timestamp,
    ) -> SessionId {
        let mut inner = self.inner.lock().await;
        let key = (local.clone(), peer.clone());

        if let Some(id) = inner.by_pair.get(&key) {
            if let Some(session) = inner.sessions.get(id) {
                if !session.is_expired(now) && !session.state.is_terminal() {
                    return *id;
                }
            }
        }

        let id = uuid::Uuid::new_v4();
        let mut session = Session::new(id, local.clone(), peer.clone(), now, self.config.max_gap);
        session.expires_at = now + self.config.ttl_secs;
        inner.by_pair.insert(key, id);
        inner.sessions.insert(id, session);
        inner.stats.sessions_created += 1;
        tracing::info!(session = %id, %local, %peer, "created session");
        id
    }

    /// Adopt an inbound handshake: track the initiator-chosen session id.
    pub async fn adopt_inbound(
        &self,
        session_id: SessionId,
        local: &EntityId,
        peer: &EntityId,
        now: Timestamp,
    ) -> Result<(), PactError> {
        let mut inner = self.inner.lock().await;
        let key = (local.clone(), peer.clone());
        let mut session =
            Session::new(session_id, local.clone(), peer.clone(), now, self.config.max_gap);
        session.expires_at = now + self.config.ttl_secs;
        session.transition(SessionState::HandshakeReceived)?;
        inner.by_pair.insert(key, session_id);
        inner.sessions.insert(session_id, session);
        inner.stats.sessions_created += 1;
        tracing::info!(session = %session_id, %peer, "adopted inbound session");
        Ok(())
    }

    pub async fn session_for_pair(
        &self,
        local: &EntityId,
        peer: &EntityId,
        now: Timestamp,
    ) -> Option<SessionId> {
        let inner = self.inner.lock().await;
        let id = inner.by_pair.get(&(local.clone(), peer.clone()))?;
        let session = inner.sessions.get(id)?;
        if session.is_expired(now) || session.state.is_terminal() {
            return None;
        }
        Some(*id)
    }

    pub async fn state_of(&self, session_id: &SessionId) -> Option<SessionState> {
        let inner = self.inner.lock().await;
        inner.sessions.get(session_id).map(|s| s.state)
    }

    // ── State transitions ────────────────────────────────────────────────────

    pub async fn transition(
        &self,
        session_id: &SessionId,
        to: SessionState,
    ) -> Result<(), PactError> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| PactError::SessionNotFound(session_id.to_string()))?;
        session.transition(to)
    }

    pub async fn set_session_key(
        &self,
        session_id: &SessionId,
        key: [u8; 32],
    ) -> Result<(), PactError> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| PactError::SessionNotFound(session_id.to_string()))?;
        session.session_key = Some(key);
        Ok(())
    }

    pub async fn session_key(&self, session_id: &SessionId) -> Option<[u8; 32]> {
        let inner = self.inner.lock().await;
        inner.sessions.get(session_id).and_then(|s| s.session_key)
    }

    /// Close a session: pending reassembly is cancelled synchronously (the
    /// reorder buffer is cleared inside the transition).
    pub async fn close(&self, session_id: &SessionId) -> Result<(), PactError> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| PactError::SessionNotFound(session_id.to_string()))?;
        if session.state == SessionState::Active
            || session.state == SessionState::HandshakeSent
            || session.state == SessionState::HandshakeReceived
        {
            session.transition(SessionState::Closing)?;
        }
        if session.state == SessionState::Closing {
            session.transition(SessionState::Closed)?;
        }
        tracing::info!(session = %session_id, "closed session");
        Ok(())
    }

    pub async fn mark_error(&self, session_id: &SessionId) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.sessions.get_mut(session_id) {
            if session.state.can_transition(SessionState::Error) {
                let _ = session.transition(SessionState::Error);
                inner.stats.sessions_errored += 1;
                tracing::warn!(session = %session_id, "session moved to error state");
            }
        }
    }

    // ── Sending ──────────────────────────────────────────────────────────────

    /// Allocate the next outbound sequence number. The session must be able
    /// to send (`Active`).
    pub async fn allocate_send(
        &self,
        session_id: &SessionId,
        now: Timestamp,
    ) -> Result<Sequence, PactError> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| PactError::SessionNotFound(session_id.to_string()))?;
        if session.is_expired(now) {
            return Err(PactError::SessionExpired);
        }
        if !session.state.can_send() {
            return Err(PactError::SessionExpired);
        }
        Ok(session.allocate_seq())
    }

    /// Remember an outbound message so a NACK can be answered later.
    pub async fn record_sent(&self, session_id: &SessionId, seq: Sequence, msg: WireMessage) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.sent.record(seq, msg);
        }
    }

    /// Messages to retransmit for a NACK range, with their original sequence
    /// numbers. The caller re-signs each with a fresh nonce and timestamp.
    pub async fn retransmit_range(
        &self,
        session_id: &SessionId,
        start: Sequence,
        end: Sequence,
    ) -> Result<Vec<WireMessage>, PactError> {
        let inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| PactError::SessionNotFound(session_id.to_string()))?;
        let msgs = session.sent.range(start, end);
        tracing::info!(
            session = %session_id,
            start,
            end,
            found = msgs.len(),
            "answering NACK from send history"
        );
        Ok(msgs)
    }

    // ── Receiving ────────────────────────────────────────────────────────────

    /// Feed an inbound sequenced message through the ordering state.
    pub async fn accept_inbound(
        &self,
        session_id: &SessionId,
        seq: Sequence,
        msg: WireMessage,
        now: Timestamp,
    ) -> Result<SeqOutcome, PactError> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| PactError::SessionNotFound(session_id.to_string()))?;
        if session.is_expired(now) {
            return Err(PactError::SessionExpired);
        }
        if session.state == SessionState::Error {
            return Err(PactError::SequenceError {
                expected: session.receive.next_expected(),
                got: seq,
            });
        }
        let outcome = session.receive.accept(seq, msg, now);
        if let SeqOutcome::Deliver(msgs) = &outcome {
            inner.stats.messages_ordered += msgs.len() as u64;
        }
        Ok(outcome)
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    /// One sweep pass: expire dead sessions, error out sessions whose oldest
    /// NACKed gap outlived the timeout. Returns (expired, errored).
    pub async fn sweep(&self, now: Timestamp) -> (usize, usize) {
        let mut inner = self.inner.lock().await;
        let nack_timeout = self.config.nack_timeout_secs;

        let mut errored = 0usize;
        for session in inner.sessions.values_mut() {
            if session.state == SessionState::Active {
                if let Some(age) = session.receive.oldest_gap_age(now) {
                    if age > nack_timeout {
                        let _ = session.transition(SessionState::Error);
                        errored += 1;
                        tracing::warn!(
                            session = %session.session_id,
                            gap_age_secs = age,
                            "NACK timeout, session errored"
                        );
                    }
                }
            }
        }

        let expired_ids: Vec<SessionId> = inner
            .sessions
            .values()
            .filter(|s| s.is_expired(now) || s.state.is_terminal())
            .map(|s| s.session_id)
            .collect();

        for id in &expired_ids {
            if let Some(session) = inner.sessions.remove(id) {
                inner
                    .by_pair
                    .remove(&(session.local.clone(), session.peer.clone()));
            }
        }
        let expired = expired_ids.len();
        inner.stats.sessions_expired += expired as u64;
        inner.stats.sessions_errored += errored as u64;
        if expired > 0 {
            tracing::info!(count = expired, "swept expired sessions");
        }
        (expired, errored)
    }

    pub async fn stats(&self) -> SessionStats {
        let inner = self.inner.lock().await;
        let mut stats = inner.stats;
        stats.active_sessions = inner
            .sessions
            .values()
            .filter(|s| s.state == SessionState::Active)
            .count();
        stats
    }

    pub async fn list_active(&self, now: Timestamp) -> Vec<SessionSummary> {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .values()
            .filter(|s| !s.is_expired(now) && !s.state.is_terminal())
            .map(|s| SessionSummary {
                session_id: s.session_id,
                local: s.local.clone(),
                peer: s.peer.clone(),
                state: s.state.to_string(),
                next_expected_seq: s.receive.next_expected(),
                expires_at: s.expires_at,
            })
            .collect()
    }

    /// Spawn the periodic sweeper. Exits within one interval of shutdown.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let manager = self;
        let interval = manager.config.sweep_interval_secs;
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = chrono::Utc::now().timestamp();
                        manager.sweep(now).await;
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use pactnet_core::constants::PROTOCOL_VERSION;
    use pactnet_core::message::{MessageBody, PingBody};

    fn msg(seq: Sequence, session_id: SessionId) -> WireMessage {
        let body = MessageBody::Ping(PingBody::default());
        WireMessage {
            version: PROTOCOL_VERSION.into(),
            msg_type: "ping".into(),
            sender_id: "b".into(),
            recipient_id: "a".into(),
            session_id: Some(session_id),
            sequence: Some(seq),
            timestamp: "2026-01-01T00:00:00Z".into(),
            nonce: format!("{seq:032x}"),
            payload: body.to_payload(),
            signature: None,
        }
    }

    async fn active_session(mgr: &SessionManager) -> SessionId {
        let id = mgr.ensure_session(&"a".into(), &"b".into(), 0).await;
        mgr.transition(&id, SessionState::HandshakeSent).await.unwrap();
        mgr.transition(&id, SessionState::Active).await.unwrap();
        id
    }

    #[tokio::test]
    async fn pair_reuses_live_session() {
        let mgr = SessionManager::new(SessionConfig::default());
        let id1 = mgr.ensure_session(&"a".into(), &"b".into(), 0).await;
        let id2 = mgr.ensure_session(&"a".into(), &"b".into(), 10).await;
        assert_eq!(id1, id2);
        // Reverse direction is its own session.
        let id3 = mgr.ensure_session(&"b".into(), &"a".into(), 10).await;
        assert_ne!(id1, id3);
    }

    #[tokio::test]
    async fn sends_require_active_state() {
        let mgr = SessionManager::new(SessionConfig::default());
        let id = mgr.ensure_session(&"a".into(), &"b".into(), 0).await;
        assert!(mgr.allocate_send(&id, 0).await.is_err());
        mgr.transition(&id, SessionState::HandshakeSent).await.unwrap();
        mgr.transition(&id, SessionState::Active).await.unwrap();
        assert_eq!(mgr.allocate_send(&id, 0).await.unwrap(), 1);
        assert_eq!(mgr.allocate_send(&id, 0).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn gap_then_retransmit_delivers_in_order() {
        let mgr = SessionManager::new(SessionConfig::default());
        let id = active_session(&mgr).await;

        // seq 3 first: buffered with NACK {1,2}.
        match mgr.accept_inbound(&id, 3, msg(3, id), 0).await.unwrap() {
            SeqOutcome::Buffered { nack: Some(n) } => {
                assert_eq!((n.start_seq, n.end_seq), (1, 2));
            }
            other => panic!("unexpected {other:?}"),
        }
        // 1 then 2 drain everything.
        match mgr.accept_inbound(&id, 1, msg(1, id), 1).await.unwrap() {
            SeqOutcome::Deliver(m) => assert_eq!(m.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
        match mgr.accept_inbound(&id, 2, msg(2, id), 1).await.unwrap() {
            SeqOutcome::Deliver(m) => {
                let seqs: Vec<_> = m.iter().map(|x| x.sequence.unwrap()).collect();
                assert_eq!(seqs, vec![2, 3]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn nack_timeout_errors_session_on_sweep() {
        let config = SessionConfig {
            nack_timeout_secs: 5,
            ..SessionConfig::default()
        };
        let mgr = SessionManager::new(config);
        let id = active_session(&mgr).await;
        mgr.accept_inbound(&id, 3, msg(3, id), 100).await.unwrap();

        let (_, errored) = mgr.sweep(106).await;
        assert_eq!(errored, 1);
        assert_eq!(mgr.state_of(&id).await, None); // errored sessions are swept
    }

    #[tokio::test]
    async fn expired_sessions_are_swept() {
        let config = SessionConfig {
            ttl_secs: 10,
            ..SessionConfig::default()
        };
        let mgr = SessionManager::new(config);
        let _ = mgr.ensure_session(&"a".into(), &"b".into(), 0).await;
        let (expired, _) = mgr.sweep(11).await;
        assert_eq!(expired, 1);
        assert_eq!(mgr.stats().await.sessions_expired, 1);
    }

    #[tokio::test]
    async fn send_history_round_trip() {
        let mgr = SessionManager::new(SessionConfig::default());
        let id = active_session(&mgr).await;
        for seq in 1..=3u64 {
            mgr.record_sent(&id, seq, msg(seq, id)).await;
        }
        let msgs = mgr.retransmit_range(&id, 2, 3).await.unwrap();
        assert_eq!(msgs.len(), 2);
    }
}
