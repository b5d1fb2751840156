//! Evaluation-driven reputation scoring.
//!
//! A pass adds a delta proportional to `score − 50` plus a capped streak
//! bonus, reduced by a delay penalty; a partial adds a smaller delta and
//! resets the streak; a fail subtracts and resets the streak. Scores clamp
//! to [0, 100] and the tier is recomputed on every update. Updates
//! linearize per entity behind the ledger mutex and persist after mutation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use pactnet_core::constants::{
    DELAY_PENALTY_MAX, REPUTATION_EVENT_CAP, REPUTATION_HISTORY_CAP, STREAK_BONUS_CAP,
    STREAK_BONUS_PER_STEP,
};
use pactnet_core::reputation::{
    EntityReputation, EvalVerdict, Evaluation, ReputationEvent, ReputationTier,
};
use pactnet_core::types::{EntityId, TaskId, Timestamp};
use pactnet_core::PactError;
use pactnet_store::DataStore;

/// All reputation records, lazily loaded from disk.
pub struct ReputationLedger {
    store: Arc<DataStore>,
    inner: Mutex<HashMap<EntityId, EntityReputation>>,
}

impl ReputationLedger {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self {
            store,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Current record for `entity`, creating a baseline one on first sight.
    pub async fn get_or_create(&self, entity: &EntityId) -> Result<EntityReputation, PactError> {
        let mut inner = self.inner.lock().await;
        if let Some(rep) = inner.get(entity) {
            return Ok(rep.clone());
        }
        let rep = match self.store.load_reputation(entity)? {
            Some(rep) => rep,
            None => EntityReputation::new(entity.clone()),
        };
        inner.insert(entity.clone(), rep.clone());
        Ok(rep)
    }

    /// Apply a finalized evaluation and return the updated record.
    pub async fn update_from_evaluation(
        &self,
        entity: &EntityId,
        evaluation: &Evaluation,
        now: Timestamp,
    ) -> Result<EntityReputation, PactError> {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            if !inner.contains_key(entity) {
                let loaded = match self.store.load_reputation(entity)? {
                    Some(rep) => rep,
                    None => EntityReputation::new(entity.clone()),
                };
                inner.insert(entity.clone(), loaded);
            }
            let rep = inner.get_mut(entity).expect("inserted above");

            let (event_type, delta) = match evaluation.verdict {
                EvalVerdict::Pass => {
                    rep.tasks_completed += 1;
                    rep.current_streak += 1;
                    rep.max_streak = rep.max_streak.max(rep.current_streak);
                    let base = (evaluation.score - 50.0) * 0.1;
                    let streak_bonus =
                        (rep.current_streak as f64 * STREAK_BONUS_PER_STEP).min(STREAK_BONUS_CAP);
                    let penalty = delay_penalty(evaluation, rep);
                    ("task_pass", base + streak_bonus - penalty)
                }
                EvalVerdict::Partial => {
                    rep.tasks_completed += 1;
                    rep.current_streak = 0;
                    let base = ((evaluation.score - 50.0) * 0.05).max(0.0);
                    let penalty = delay_penalty(evaluation, rep);
                    ("task_partial", base - penalty)
                }
                EvalVerdict::Fail => {
                    rep.tasks_failed += 1;
                    rep.current_streak = 0;
                    ("task_fail", -(1.0 + (100.0 - evaluation.score) / 12.5))
                }
            };

            apply_delta(rep, event_type, delta, evaluation.task_id.clone(), None, now);
            rep.clone()
        };
        self.store.save_reputation(&snapshot).await?;
        Ok(snapshot)
    }

    /// Manual score adjustment (operator action), clamped like any update.
    pub async fn adjust(
        &self,
        entity: &EntityId,
        delta: f64,
        reason: &str,
        now: Timestamp,
    ) -> Result<EntityReputation, PactError> {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            let rep = inner
                .entry(entity.clone())
                .or_insert_with(|| EntityReputation::new(entity.clone()));
            apply_delta(
                rep,
                "manual_adjustment",
                delta,
                None,
                Some(reason.to_string()),
                now,
            );
            rep.clone()
        };
        self.store.save_reputation(&snapshot).await?;
        Ok(snapshot)
    }

    /// Applied events for `entity`, newest last.
    pub async fn history(&self, entity: &EntityId) -> Result<Vec<ReputationEvent>, PactError> {
        Ok(self.get_or_create(entity).await?.events)
    }

    /// Entities ranked by current score, highest first.
    pub async fn ranking(&self) -> Vec<(EntityId, f64, ReputationTier)> {
        let inner = self.inner.lock().await;
        let mut out: Vec<_> = inner
            .values()
            .map(|r| (r.entity_id.clone(), r.current_score, r.tier))
            .collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        out
    }
}

fn delay_penalty(evaluation: &Evaluation, rep: &mut EntityReputation) -> f64 {
    match evaluation.delay_secs {
        Some(delay) if delay > 0 => {
            rep.tasks_delayed += 1;
            (delay as f64 / 3_600.0).ceil().min(DELAY_PENALTY_MAX)
        }
        _ => 0.0,
    }
}

fn apply_delta(
    rep: &mut EntityReputation,
    event_type: &str,
    delta: f64,
    task_id: Option<TaskId>,
    reason: Option<String>,
    now: Timestamp,
) {
    let previous = rep.current_score;
    rep.current_score = (rep.current_score + delta).clamp(0.0, 100.0);
    rep.tier = ReputationTier::from_score(rep.current_score);

    rep.historical_scores.push(rep.current_score);
    let overflow = rep.historical_scores.len().saturating_sub(REPUTATION_HISTORY_CAP);
    if overflow > 0 {
        rep.historical_scores.drain(..overflow);
    }

    rep.events.push(ReputationEvent {
        event_type: event_type.to_string(),
        score_delta: rep.current_score - previous,
        previous_score: previous,
        new_score: rep.current_score,
        timestamp: now,
        task_id,
        reason,
    });
    let overflow = rep.events.len().saturating_sub(REPUTATION_EVENT_CAP);
    if overflow > 0 {
        rep.events.drain(..overflow);
    }

    tracing::info!(
        entity = %rep.entity_id,
        event_type,
        previous,
        new = rep.current_score,
        tier = %rep.tier,
        "reputation updated"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(name: &str) -> ReputationLedger {
        let dir = std::env::temp_dir().join(format!(
            "pactnet_reputation_{}_{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        ReputationLedger::new(Arc::new(DataStore::open(dir).unwrap()))
    }

    fn eval(verdict: EvalVerdict, score: f64) -> Evaluation {
        Evaluation {
            verdict,
            score,
            delay_secs: None,
            task_id: Some(TaskId::new("t1")),
        }
    }

    #[tokio::test]
    async fn fresh_entity_starts_reliable_at_baseline() {
        let ledger = ledger("fresh");
        let rep = ledger.get_or_create(&"new".into()).await.unwrap();
        assert_eq!(rep.current_score, 50.0);
        assert_eq!(rep.tier, ReputationTier::Reliable);
    }

    #[tokio::test]
    async fn pass_raises_score_and_extends_streak() {
        let ledger = ledger("pass");
        let rep = ledger
            .update_from_evaluation(&"e".into(), &eval(EvalVerdict::Pass, 90.0), 1)
            .await
            .unwrap();
        assert!(rep.current_score > 50.0);
        assert_eq!(rep.tasks_completed, 1);
        assert_eq!(rep.current_streak, 1);
    }

    #[tokio::test]
    async fn three_passes_reach_expert_then_fail_resets() {
        let ledger = ledger("streak");
        let entity: EntityId = "e".into();
        let mut rep = ledger.get_or_create(&entity).await.unwrap();
        for i in 0..3 {
            rep = ledger
                .update_from_evaluation(&entity, &eval(EvalVerdict::Pass, 90.0), i)
                .await
                .unwrap();
        }
        assert_eq!(rep.current_streak, 3);
        assert_eq!(rep.max_streak, 3);
        assert!(rep.tier >= ReputationTier::Expert, "tier was {:?}", rep.tier);

        let before = rep.current_score;
        let rep = ledger
            .update_from_evaluation(&entity, &eval(EvalVerdict::Fail, 20.0), 4)
            .await
            .unwrap();
        assert_eq!(rep.current_streak, 0);
        assert!(rep.current_score < before);
        assert_eq!(rep.tasks_failed, 1);
        assert_eq!(rep.events.last().unwrap().event_type, "task_fail");
    }

    #[tokio::test]
    async fn partial_resets_streak_with_small_gain() {
        let ledger = ledger("partial");
        let entity: EntityId = "e".into();
        ledger
            .update_from_evaluation(&entity, &eval(EvalVerdict::Pass, 90.0), 1)
            .await
            .unwrap();
        let rep = ledger
            .update_from_evaluation(&entity, &eval(EvalVerdict::Partial, 75.0), 2)
            .await
            .unwrap();
        assert_eq!(rep.current_streak, 0);
        assert_eq!(rep.tasks_completed, 2);
    }

    #[tokio::test]
    async fn delay_penalty_reduces_gain() {
        let on_time_ledger = ledger("delay_a");
        let on_time = on_time_ledger
            .update_from_evaluation(&"a".into(), &eval(EvalVerdict::Pass, 80.0), 1)
            .await
            .unwrap();

        let late_ledger = ledger("delay_b");
        let mut late_eval = eval(EvalVerdict::Pass, 80.0);
        late_eval.delay_secs = Some(2 * 3_600);
        let late = late_ledger
            .update_from_evaluation(&"b".into(), &late_eval, 1)
            .await
            .unwrap();

        assert!(late.current_score < on_time.current_score);
        assert_eq!(late.tasks_delayed, 1);
    }

    #[tokio::test]
    async fn score_clamps_at_both_bounds() {
        let ledger = ledger("bounds");
        let entity: EntityId = "e".into();
        for i in 0..30 {
            ledger
                .update_from_evaluation(&entity, &eval(EvalVerdict::Pass, 100.0), i)
                .await
                .unwrap();
        }
        let rep = ledger.get_or_create(&entity).await.unwrap();
        assert!(rep.current_score <= 100.0);
        assert_eq!(rep.tier, ReputationTier::Elite);

        for i in 0..50 {
            ledger
                .update_from_evaluation(&entity, &eval(EvalVerdict::Fail, 0.0), 100 + i)
                .await
                .unwrap();
        }
        let rep = ledger.get_or_create(&entity).await.unwrap();
        assert!(rep.current_score >= 0.0);
        assert_eq!(rep.tier, ReputationTier::Untrusted);
    }

    #[tokio::test]
    async fn manual_adjustment_records_reason() {
        let ledger = ledger("manual");
        let rep = ledger
            .adjust(&"e".into(), 10.0, "bootstrap trust", 1)
            .await
            .unwrap();
        assert_eq!(rep.current_score, 60.0);
        let event = rep.events.last().unwrap();
        assert_eq!(event.event_type, "manual_adjustment");
        assert_eq!(event.reason.as_deref(), Some("bootstrap trust"));
    }

    #[tokio::test]
    async fn records_persist_across_reopen() {
        let dir = std::env::temp_dir().join(format!(
            "pactnet_reputation_persist_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        {
            let ledger = ReputationLedger::new(Arc::new(DataStore::open(&dir).unwrap()));
            ledger
                .update_from_evaluation(&"e".into(), &eval(EvalVerdict::Pass, 90.0), 1)
                .await
                .unwrap();
        }
        let ledger = ReputationLedger::new(Arc::new(DataStore::open(&dir).unwrap()));
        let rep = ledger.get_or_create(&"e".into()).await.unwrap();
        assert!(rep.current_score > 50.0);
        assert_eq!(rep.tasks_completed, 1);
    }
}
