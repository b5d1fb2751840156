//! Sequence-number ordering: reorder buffering, gap detection, NACK
//! bookkeeping and the outbound send history used for retransmission.
//!
//! Within one session the application sees messages in strict sequence
//! order. Duplicates (seq below expected) are discarded; moderate gaps are
//! buffered and NACKed; gaps beyond `max_gap` are accepted with a warning so
//! a burst of loss cannot stall the session forever.

use std::collections::{BTreeMap, VecDeque};

use pactnet_core::constants::SEND_HISTORY_CAPACITY;
use pactnet_core::message::NackBody;
use pactnet_core::types::{Sequence, Timestamp};
use pactnet_core::WireMessage;

// ── Receive side ─────────────────────────────────────────────────────────────

/// A detected gap awaiting retransmission.
#[derive(Clone, Debug)]
pub struct PendingGap {
    pub start_seq: Sequence,
    pub end_seq: Sequence,
    pub detected_at: Timestamp,
    pub nack_sent: bool,
}

/// What to do with one inbound sequenced message.
#[derive(Debug)]
pub enum SeqOutcome {
    /// In-order arrival: deliver these messages (the new one plus any
    /// consecutive entries drained from the reorder buffer).
    Deliver(Vec<WireMessage>),
    /// Out-of-order arrival: buffered. `nack` is set when a new gap opened.
    Buffered { nack: Option<NackBody> },
    /// Duplicate or late; discarded with no state change.
    Duplicate,
}

/// Inbound ordering state for one session.
pub struct ReceiveState {
    next_expected: Sequence,
    max_gap: u64,
    reorder: BTreeMap<Sequence, WireMessage>,
    gaps: Vec<PendingGap>,
}

impl ReceiveState {
    pub fn new(max_gap: u64) -> Self {
        Self {
            next_expected: 1,
            max_gap,
            reorder: BTreeMap::new(),
            gaps: Vec::new(),
        }
    }

    pub fn next_expected(&self) -> Sequence {
        self.next_expected
    }

    pub fn buffered(&self) -> usize {
        self.reorder.len()
    }

    /// Process an inbound message carrying `seq`.
    pub fn accept(&mut self, seq: Sequence, msg: WireMessage, now: Timestamp) -> SeqOutcome {
        if seq < self.next_expected {
            return SeqOutcome::Duplicate;
        }

        if seq == self.next_expected {
            let mut deliverable = vec![msg];
            self.next_expected += 1;
            // Drain consecutive buffered entries.
            while let Some(buffered) = self.reorder.remove(&self.next_expected) {
                deliverable.push(buffered);
                self.next_expected += 1;
            }
            self.resolve_gaps_below(self.next_expected);
            return SeqOutcome::Deliver(deliverable);
        }

        // seq > next_expected.
        if seq - self.next_expected > self.max_gap {
            // Runaway gap: accept and advance rather than stalling forever.
            tracing::warn!(
                expected = self.next_expected,
                got = seq,
                "sequence gap exceeds limit, accepting and advancing"
            );
            let mut deliverable = vec![msg];
            self.next_expected = seq + 1;
            while let Some(buffered) = self.reorder.remove(&self.next_expected) {
                deliverable.push(buffered);
                self.next_expected += 1;
            }
            // Everything below the new expected is moot.
            self.reorder.retain(|&s, _| s >= self.next_expected);
            self.gaps.clear();
            return SeqOutcome::Deliver(deliverable);
        }

        if self.reorder.contains_key(&seq) {
            return SeqOutcome::Duplicate;
        }

        // Bound the buffer: drop the oldest entry when full.
        if self.reorder.len() as u64 >= self.max_gap {
            if let Some((&oldest, _)) = self.reorder.iter().next() {
                self.reorder.remove(&oldest);
                tracing::warn!(seq = oldest, "reorder buffer full, dropped oldest");
            }
        }

        // NACK only the newly missing range: everything below the highest
        // buffered sequence (or an already-NACKed gap) is covered.
        let gap_end = seq - 1;
        let highest_buffered = self.reorder.keys().next_back().copied();
        let highest_nacked = self.gaps.iter().map(|g| g.end_seq).max();
        let gap_start = [
            Some(self.next_expected),
            highest_buffered.map(|s| s + 1),
            highest_nacked.map(|s| s + 1),
        ]
        .into_iter()
        .flatten()
        .max()
        .expect("at least next_expected");

        self.reorder.insert(seq, msg);

        let nack = if gap_start <= gap_end {
            self.gaps.push(PendingGap {
                start_seq: gap_start,
                end_seq: gap_end,
                detected_at: now,
                nack_sent: true,
            });
            tracing::warn!(start = gap_start, end = gap_end, "sequence gap detected");
            Some(NackBody {
                start_seq: gap_start,
                end_seq: gap_end,
            })
        } else {
            None
        };

        SeqOutcome::Buffered { nack }
    }

    fn resolve_gaps_below(&mut self, upto: Sequence) {
        self.gaps.retain(|g| g.end_seq >= upto);
    }

    /// Age in seconds of the oldest unresolved gap, if any.
    pub fn oldest_gap_age(&self, now: Timestamp) -> Option<i64> {
        self.gaps.iter().map(|g| now - g.detected_at).max()
    }

    /// Drop all buffered messages and gap bookkeeping (session close).
    pub fn clear(&mut self) {
        self.reorder.clear();
        self.gaps.clear();
    }
}

// ── Send side ────────────────────────────────────────────────────────────────

/// Bounded ring of recently sent messages, for answering NACKs. Messages are
/// retransmitted with their original sequence numbers; the sender refreshes
/// nonce, timestamp and signature before resending.
pub struct SendHistory {
    ring: VecDeque<(Sequence, WireMessage)>,
    capacity: usize,
}

impl Default for SendHistory {
    fn default() -> Self {
        Self::new(SEND_HISTORY_CAPACITY)
    }
}

impl SendHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: VecDeque::new(),
            capacity,
        }
    }

    pub fn record(&mut self, seq: Sequence, msg: WireMessage) {
        self.ring.push_back((seq, msg));
        while self.ring.len() > self.capacity {
            self.ring.pop_front();
        }
    }

    /// Messages covering `[start, end]` still held in the window.
    pub fn range(&self, start: Sequence, end: Sequence) -> Vec<WireMessage> {
        self.ring
            .iter()
            .filter(|(seq, _)| *seq >= start && *seq <= end)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pactnet_core::constants::{MAX_SEQUENCE_GAP, PROTOCOL_VERSION};
    use pactnet_core::message::{MessageBody, PingBody};

    fn msg(seq: Sequence) -> WireMessage {
        let body = MessageBody::Ping(PingBody::default());
        WireMessage {
            version: PROTOCOL_VERSION.into(),
            msg_type: "ping".into(),
            sender_id: "a".into(),
            recipient_id: "b".into(),
            session_id: Some(uuid::Uuid::nil()),
            sequence: Some(seq),
            timestamp: "2026-01-01T00:00:00Z".into(),
            nonce: format!("{seq:032x}"),
            payload: body.to_payload(),
            signature: None,
        }
    }

    fn state() -> ReceiveState {
        ReceiveState::new(MAX_SEQUENCE_GAP)
    }

    fn delivered_seqs(outcome: SeqOutcome) -> Vec<Sequence> {
        match outcome {
            SeqOutcome::Deliver(msgs) => {
                msgs.iter().map(|m| m.sequence.unwrap()).collect()
            }
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[test]
    fn in_order_delivers_immediately() {
        let mut rx = state();
        assert_eq!(delivered_seqs(rx.accept(1, msg(1), 0)), vec![1]);
        assert_eq!(delivered_seqs(rx.accept(2, msg(2), 0)), vec![2]);
        assert_eq!(rx.next_expected(), 3);
    }

    #[test]
    fn gap_buffers_and_nacks_then_drains_in_order() {
        let mut rx = state();
        // seq 3 arrives at expected 1: NACK {1, 2}.
        match rx.accept(3, msg(3), 0) {
            SeqOutcome::Buffered { nack: Some(nack) } => {
                assert_eq!(nack, NackBody { start_seq: 1, end_seq: 2 });
            }
            other => panic!("expected buffered+nack, got {other:?}"),
        }
        // Retransmitted 1 delivers just itself; 2 then drains 3.
        assert_eq!(delivered_seqs(rx.accept(1, msg(1), 1)), vec![1]);
        assert_eq!(delivered_seqs(rx.accept(2, msg(2), 1)), vec![2, 3]);
        assert_eq!(rx.next_expected(), 4);
        assert_eq!(rx.buffered(), 0);
    }

    #[test]
    fn duplicate_and_late_are_discarded() {
        let mut rx = state();
        rx.accept(1, msg(1), 0);
        assert!(matches!(rx.accept(1, msg(1), 0), SeqOutcome::Duplicate));
        rx.accept(3, msg(3), 0);
        assert!(matches!(rx.accept(3, msg(3), 0), SeqOutcome::Duplicate));
    }

    #[test]
    fn second_gap_nacks_only_the_new_range() {
        let mut rx = state();
        // seq 3 buffered, NACK {1,2}; seq 6 must only request {4,5}.
        rx.accept(3, msg(3), 0);
        match rx.accept(6, msg(6), 0) {
            SeqOutcome::Buffered { nack: Some(nack) } => {
                assert_eq!(nack, NackBody { start_seq: 4, end_seq: 5 });
            }
            other => panic!("expected buffered+nack, got {other:?}"),
        }
        // A third arrival adjacent to the buffer opens no new gap.
        match rx.accept(7, msg(7), 0) {
            SeqOutcome::Buffered { nack: None } => {}
            other => panic!("expected buffered without nack, got {other:?}"),
        }
    }

    #[test]
    fn oversized_gap_accepts_and_advances() {
        let mut rx = state();
        let far = MAX_SEQUENCE_GAP + 2;
        assert_eq!(delivered_seqs(rx.accept(far, msg(far), 0)), vec![far]);
        assert_eq!(rx.next_expected(), far + 1);
        assert_eq!(rx.buffered(), 0);
    }

    #[test]
    fn gap_age_tracks_oldest() {
        let mut rx = state();
        rx.accept(3, msg(3), 100);
        assert_eq!(rx.oldest_gap_age(105), Some(5));
        // Filling the gap resolves it.
        rx.accept(1, msg(1), 106);
        rx.accept(2, msg(2), 106);
        assert_eq!(rx.oldest_gap_age(110), None);
    }

    #[test]
    fn send_history_window_answers_nacks() {
        let mut history = SendHistory::new(4);
        for seq in 1..=6 {
            history.record(seq, msg(seq));
        }
        // Capacity 4: seqs 1 and 2 have rolled off.
        let range = history.range(1, 6);
        let seqs: Vec<_> = range.iter().map(|m| m.sequence.unwrap()).collect();
        assert_eq!(seqs, vec![3, 4, 5, 6]);
    }
}
