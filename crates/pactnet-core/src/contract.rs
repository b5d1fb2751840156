//! Contract-negotiation wire records and transaction state.
//!
//! The three-record chain is signed end to end: a [`TaskQuote`] points at its
//! [`TaskProposal`], an [`Agreement`] points at its quote. A [`Transaction`]
//! aggregates the chain plus the settlement state machine. No state mutation
//! happens without a verified signature (enforced by the engine crate).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PactError;
use crate::types::{Amount, EntityId, TaskId, Timestamp};

// ── TaskProposal ─────────────────────────────────────────────────────────────

/// A client's signed request for service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskProposal {
    pub proposal_id: String,
    pub task_type: String,
    pub description: String,
    #[serde(default)]
    pub requirements: serde_json::Map<String, serde_json::Value>,
    /// Upper bound the client will pay, in micro-credits.
    pub budget: Amount,
    pub client_id: EntityId,
    /// RFC 3339 UTC.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

// ── TaskQuote ────────────────────────────────────────────────────────────────

/// A provider's signed quote answering a proposal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskQuote {
    pub quote_id: String,
    pub proposal_id: String,
    /// Must not exceed the proposal budget.
    pub estimated_amount: Amount,
    pub estimated_time_secs: u64,
    /// RFC 3339 UTC; the quote is unusable past this instant.
    pub valid_until: String,
    #[serde(default)]
    pub terms: serde_json::Map<String, serde_json::Value>,
    pub provider_id: EntityId,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl TaskQuote {
    /// Whether the quote can still be accepted at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        DateTime::parse_from_rfc3339(&self.valid_until)
            .map(|t| now <= t.with_timezone(&Utc))
            .unwrap_or(false)
    }
}

// ── Agreement ────────────────────────────────────────────────────────────────

/// The client's signed acceptance binding the chain together.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agreement {
    pub agreement_id: String,
    pub quote_id: String,
    pub task_id: TaskId,
    pub confirmed_amount: Amount,
    /// Logical escrow account the locked funds are held under.
    pub escrow_address: String,
    /// RFC 3339 UTC; hard upper bound on execution.
    pub deadline: String,
    pub client_id: EntityId,
    pub provider_id: EntityId,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Agreement {
    /// Whether the execution deadline has passed at `now`. Unparseable
    /// deadlines count as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        DateTime::parse_from_rfc3339(&self.deadline)
            .map(|t| now > t.with_timezone(&Utc))
            .unwrap_or(true)
    }
}

// ── Transaction state machine ────────────────────────────────────────────────

/// Settlement pipeline state. The happy path is strictly one-way; the three
/// terminal failure states may be entered from any pre-settlement state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Proposed,
    Quoted,
    Agreed,
    Locked,
    Executing,
    Completed,
    Released,
    Cancelled,
    Expired,
    Disputed,
}

impl TransactionState {
    /// Valid forward transitions.
    pub fn can_transition(self, to: TransactionState) -> bool {
        use TransactionState::*;
        match (self, to) {
            (Proposed, Quoted)
            | (Quoted, Agreed)
            | (Agreed, Locked)
            | (Locked, Executing)
            | (Executing, Completed)
            | (Completed, Released) => true,
            // Failure exits from any pre-settlement state.
            (Proposed | Quoted | Agreed | Locked | Executing | Completed, Cancelled)
            | (Proposed | Quoted | Agreed | Locked | Executing, Expired)
            | (Locked | Executing | Completed, Disputed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionState::Released
                | TransactionState::Cancelled
                | TransactionState::Expired
                | TransactionState::Disputed
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Proposed  => "proposed",
            TransactionState::Quoted    => "quoted",
            TransactionState::Agreed    => "agreed",
            TransactionState::Locked    => "locked",
            TransactionState::Executing => "executing",
            TransactionState::Completed => "completed",
            TransactionState::Released  => "released",
            TransactionState::Cancelled => "cancelled",
            TransactionState::Expired   => "expired",
            TransactionState::Disputed  => "disputed",
        };
        write!(f, "{s}")
    }
}

/// Aggregate record for one proposal→settlement flow, keyed by proposal id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub proposal: TaskProposal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<TaskQuote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreement: Option<Agreement>,
    pub state: TransactionState,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Transaction {
    pub fn new(proposal: TaskProposal, now: Timestamp) -> Self {
        Self {
            proposal,
            quote: None,
            agreement: None,
            state: TransactionState::Proposed,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to `to`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, to: TransactionState, now: Timestamp) -> Result<(), PactError> {
        if !self.state.can_transition(to) {
            return Err(PactError::StateTransitionInvalid {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        self.updated_at = now;
        Ok(())
    }
}

// ── Escrow ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Funded,
    Released,
    PartiallyReleased,
    Refunded,
    Disputed,
}

/// A single release condition. `fulfilled` flips when the named condition is
/// attested by the counterparty or an evaluator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscrowCondition {
    pub name: String,
    pub kind: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub fulfilled: bool,
}

/// Optional milestone tranche. Percentages across a contract must sum to 100.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Milestone {
    pub name: String,
    pub payment_percent: u32,
    #[serde(default)]
    pub completed: bool,
}

/// Conditionally held funds tied to an agreement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Escrow {
    pub escrow_id: String,
    /// Key of the locked-funds pool entry holding this escrow's tokens
    /// (the agreement's task id).
    pub lock_key: TaskId,
    pub client: EntityId,
    pub provider: EntityId,
    pub amount: Amount,
    #[serde(default)]
    pub conditions: Vec<EscrowCondition>,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
    /// Unix seconds; funds return to the client past this without release.
    pub deadline: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispute_resolver: Option<EntityId>,
    pub status: EscrowStatus,
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        use TransactionState::*;
        let path = [Proposed, Quoted, Agreed, Locked, Executing, Completed, Released];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn no_backwards_or_skipping() {
        use TransactionState::*;
        assert!(!Quoted.can_transition(Proposed));
        assert!(!Proposed.can_transition(Agreed));
        assert!(!Released.can_transition(Cancelled));
    }

    #[test]
    fn failure_exits_allowed_pre_settlement() {
        use TransactionState::*;
        assert!(Locked.can_transition(Cancelled));
        assert!(Executing.can_transition(Disputed));
        assert!(Proposed.can_transition(Expired));
        assert!(!Released.can_transition(Disputed));
    }

    #[test]
    fn transition_updates_record() {
        let proposal = TaskProposal {
            proposal_id: "p1".into(),
            task_type: "code_review".into(),
            description: "review the parser".into(),
            requirements: Default::default(),
            budget: 500,
            client_id: "alice".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            signature: None,
        };
        let mut tx = Transaction::new(proposal, 100);
        tx.transition(TransactionState::Quoted, 101).unwrap();
        assert_eq!(tx.state, TransactionState::Quoted);
        assert_eq!(tx.updated_at, 101);

        let err = tx.transition(TransactionState::Released, 102).unwrap_err();
        assert_eq!(err.code(), "STATE_TRANSITION_INVALID");
    }

    #[test]
    fn quote_validity_window() {
        let quote = TaskQuote {
            quote_id: "q1".into(),
            proposal_id: "p1".into(),
            estimated_amount: 400,
            estimated_time_secs: 3600,
            valid_until: "2026-01-02T00:00:00Z".into(),
            terms: Default::default(),
            provider_id: "bob".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            signature: None,
        };
        let before = "2026-01-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let after = "2026-01-03T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert!(quote.is_valid_at(before));
        assert!(!quote.is_valid_at(after));
    }
}
