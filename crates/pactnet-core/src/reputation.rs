//! Reputation records: scores, tiers, streaks and the append-only event log.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{REPUTATION_BASELINE, STORE_VERSION};
use crate::types::{EntityId, TaskId, Timestamp};

// ── Tiers ────────────────────────────────────────────────────────────────────

/// Coarse classification derived from the current score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReputationTier {
    Untrusted,
    Novice,
    Reliable,
    Expert,
    Elite,
}

impl ReputationTier {
    /// Score-to-tier table: <20 untrusted, <40 novice, <60 reliable,
    /// <80 expert, ≥80 elite.
    pub fn from_score(score: f64) -> Self {
        if score < 20.0 {
            ReputationTier::Untrusted
        } else if score < 40.0 {
            ReputationTier::Novice
        } else if score < 60.0 {
            ReputationTier::Reliable
        } else if score < 80.0 {
            ReputationTier::Expert
        } else {
            ReputationTier::Elite
        }
    }
}

impl fmt::Display for ReputationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReputationTier::Untrusted => "untrusted",
            ReputationTier::Novice    => "novice",
            ReputationTier::Reliable  => "reliable",
            ReputationTier::Expert    => "expert",
            ReputationTier::Elite     => "elite",
        };
        write!(f, "{s}")
    }
}

// ── Evaluations ──────────────────────────────────────────────────────────────

/// Outcome of a finalized task evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalVerdict {
    Pass,
    Partial,
    Fail,
}

/// A finalized evaluation event emitted after transaction settlement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Evaluation {
    pub verdict: EvalVerdict,
    /// Quality score in [0, 100].
    pub score: f64,
    /// Seconds past the deadline, if delivery was late.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

// ── Events & record ──────────────────────────────────────────────────────────

/// One applied score change, kept in a bounded per-entity log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReputationEvent {
    pub event_type: String,
    pub score_delta: f64,
    pub previous_score: f64,
    pub new_score: f64,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Full reputation state for one entity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityReputation {
    #[serde(default = "default_store_version")]
    pub version: u32,
    pub entity_id: EntityId,
    pub current_score: f64,
    pub tier: ReputationTier,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_delayed: u64,
    pub current_streak: u32,
    pub max_streak: u32,
    /// Bounded ring of recent scores, newest last.
    #[serde(default)]
    pub historical_scores: Vec<f64>,
    #[serde(default)]
    pub events: Vec<ReputationEvent>,
}

fn default_store_version() -> u32 {
    STORE_VERSION
}

impl EntityReputation {
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            version: STORE_VERSION,
            entity_id,
            current_score: REPUTATION_BASELINE,
            tier: ReputationTier::from_score(REPUTATION_BASELINE),
            tasks_completed: 0,
            tasks_failed: 0,
            tasks_delayed: 0,
            current_streak: 0,
            max_streak: 0,
            historical_scores: vec![REPUTATION_BASELINE],
            events: Vec::new(),
        }
    }

    /// Fraction of finalized tasks that completed, 0.0 with no history.
    pub fn success_rate(&self) -> f64 {
        let total = self.tasks_completed + self.tasks_failed;
        if total == 0 {
            return 0.0;
        }
        self.tasks_completed as f64 / total as f64
    }

    /// Recency-weighted average of the historical scores: the newest entry
    /// carries the highest weight (linear ramp).
    pub fn weighted_average(&self) -> f64 {
        if self.historical_scores.is_empty() {
            return self.current_score;
        }
        let mut num = 0.0;
        let mut den = 0.0;
        for (i, s) in self.historical_scores.iter().enumerate() {
            let w = (i + 1) as f64;
            num += s * w;
            den += w;
        }
        num / den
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_table_matches_boundaries() {
        let cases = [
            (0.0, ReputationTier::Untrusted),
            (19.9, ReputationTier::Untrusted),
            (20.0, ReputationTier::Novice),
            (39.9, ReputationTier::Novice),
            (40.0, ReputationTier::Reliable),
            (59.9, ReputationTier::Reliable),
            (60.0, ReputationTier::Expert),
            (79.9, ReputationTier::Expert),
            (80.0, ReputationTier::Elite),
            (100.0, ReputationTier::Elite),
        ];
        for (score, tier) in cases {
            assert_eq!(ReputationTier::from_score(score), tier, "score {score}");
        }
    }

    #[test]
    fn new_entity_starts_at_baseline() {
        let rep = EntityReputation::new("fresh".into());
        assert_eq!(rep.current_score, 50.0);
        assert_eq!(rep.tier, ReputationTier::Reliable);
        assert_eq!(rep.current_streak, 0);
    }

    #[test]
    fn success_rate_handles_zero_division() {
        let rep = EntityReputation::new("fresh".into());
        assert_eq!(rep.success_rate(), 0.0);
    }

    #[test]
    fn weighted_average_biases_recent() {
        let mut rep = EntityReputation::new("w".into());
        rep.historical_scores = vec![10.0, 90.0];
        // Weight 1 on 10.0, weight 2 on 90.0 -> (10 + 180) / 3
        assert!((rep.weighted_average() - 63.333).abs() < 0.01);
    }
}
