//! Token-economy record types: wallets, ledger entries, task contracts and
//! supply statistics.
//!
//! All amounts are micro-credits. A wallet's `balance` always equals the sum
//! of credits minus debits over its entry log; the economy crate enforces
//! this at every mutation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::STORE_VERSION;
use crate::types::{Amount, EntityId, TaskId, Timestamp};

// ── Ledger entries ───────────────────────────────────────────────────────────

/// Direction/category of a wallet ledger entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Deposit,
    Withdraw,
    TransferIn,
    TransferOut,
    Reward,
    Burn,
    Mint,
}

impl EntryKind {
    /// Whether this entry credits the wallet (true) or debits it (false).
    pub fn is_credit(self) -> bool {
        matches!(
            self,
            EntryKind::Deposit | EntryKind::TransferIn | EntryKind::Reward | EntryKind::Mint
        )
    }
}

/// One append-only wallet log record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<EntityId>,
    pub amount: Amount,
    pub description: String,
    pub timestamp: Timestamp,
}

// ── Wallet ───────────────────────────────────────────────────────────────────

/// A persisted wallet snapshot: balance plus the ordered entry log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Wallet {
    #[serde(default = "default_store_version")]
    pub version: u32,
    pub entity_id: EntityId,
    pub balance: Amount,
    #[serde(default)]
    pub transactions: Vec<LedgerEntry>,
}

fn default_store_version() -> u32 {
    STORE_VERSION
}

impl Wallet {
    pub fn new(entity_id: EntityId, balance: Amount) -> Self {
        Self {
            version: STORE_VERSION,
            entity_id,
            balance,
            transactions: Vec::new(),
        }
    }

    /// Recompute the balance implied by the entry log. Used by the
    /// reconciliation check; must equal `balance` at all times. The opening
    /// balance (pre-log) is passed in by the caller.
    pub fn log_delta(&self) -> i128 {
        self.transactions.iter().fold(0i128, |acc, e| {
            if e.kind.is_credit() {
                acc + e.amount as i128
            } else {
                acc - e.amount as i128
            }
        })
    }
}

// ── Task contracts ───────────────────────────────────────────────────────────

/// Task contract lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn can_transition(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, to) {
            (Created, Assigned) | (Assigned, InProgress) | (InProgress, Completed) => true,
            (Created | Assigned | InProgress, Failed) => true,
            (Created | Assigned | InProgress, Cancelled) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Created    => "created",
            TaskStatus::Assigned   => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed  => "completed",
            TaskStatus::Failed     => "failed",
            TaskStatus::Cancelled  => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A reward-bearing task. On creation the reward is debited from the creator
/// into the locked-funds pool keyed by `task_id`; completion pays the worker,
/// cancellation or failure refunds the creator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskContract {
    #[serde(default = "default_store_version")]
    pub version: u32,
    pub task_id: TaskId,
    pub creator_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<EntityId>,
    pub description: String,
    pub reward_amount: Amount,
    pub status: TaskStatus,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
}

// ── Supply statistics ────────────────────────────────────────────────────────

/// Mint/burn accounting for the whole economy. Persisted alongside wallets;
/// the reconciliation invariant is
/// `Σ(balances) + Σ(locked) == total_minted − total_burned`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SupplyStats {
    #[serde(default = "default_store_version")]
    pub version: u32,
    pub total_supply: Amount,
    pub circulating_supply: Amount,
    pub treasury_balance: Amount,
    pub total_minted: Amount,
    pub total_burned: Amount,
    pub mint_count: u64,
    pub burn_count: u64,
}

impl Default for SupplyStats {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            total_supply: 0,
            circulating_supply: 0,
            treasury_balance: 0,
            total_minted: 0,
            total_burned: 0,
            mint_count: 0,
            burn_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_kind_direction() {
        assert!(EntryKind::Deposit.is_credit());
        assert!(EntryKind::Mint.is_credit());
        assert!(!EntryKind::Withdraw.is_credit());
        assert!(!EntryKind::Burn.is_credit());
        assert!(!EntryKind::TransferOut.is_credit());
    }

    #[test]
    fn task_status_machine() {
        use TaskStatus::*;
        assert!(Created.can_transition(Assigned));
        assert!(Assigned.can_transition(InProgress));
        assert!(InProgress.can_transition(Completed));
        assert!(Created.can_transition(Cancelled));
        assert!(!Completed.can_transition(InProgress));
        assert!(!Created.can_transition(Completed));
    }

    #[test]
    fn log_delta_tracks_directions() {
        let mut w = Wallet::new("w".into(), 0);
        w.transactions.push(LedgerEntry {
            kind: EntryKind::Deposit,
            counterparty: None,
            amount: 100,
            description: "seed".into(),
            timestamp: 1,
        });
        w.transactions.push(LedgerEntry {
            kind: EntryKind::TransferOut,
            counterparty: Some("other".into()),
            amount: 30,
            description: "svc".into(),
            timestamp: 2,
        });
        assert_eq!(w.log_delta(), 70);
    }
}
