//! Escrow vault: conditionally held funds for agreed transactions.
//!
//! Locking debits the client into the economy's locked pool keyed by the
//! agreement's task id. Release paths: all conditions fulfilled (full),
//! evaluation-scored (partial, remainder refunded), milestone tranches,
//! deadline refund, and dispute resolution by the named resolver (absent a
//! resolver, funds return to the client).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use pactnet_core::contract::{
    Agreement, Escrow, EscrowCondition, EscrowStatus, Milestone,
};
use pactnet_core::types::{Amount, EntityId, Timestamp};
use pactnet_core::PactError;
use pactnet_ledger::TokenEconomy;

/// Fraction of the escrow released for a final evaluation score, in percent:
/// ≥0.8 → 100, ≥0.6 → 80, ≥0.4 → 50, else 0.
pub fn release_percent(score: f64) -> u32 {
    if score >= 0.8 {
        100
    } else if score >= 0.6 {
        80
    } else if score >= 0.4 {
        50
    } else {
        0
    }
}

/// All live escrows plus the economy handle that holds their funds.
pub struct EscrowVault {
    economy: Arc<TokenEconomy>,
    escrows: Mutex<HashMap<String, Escrow>>,
}

impl EscrowVault {
    pub fn new(economy: Arc<TokenEconomy>) -> Self {
        Self {
            economy,
            escrows: Mutex::new(HashMap::new()),
        }
    }

    // ── Lock ─────────────────────────────────────────────────────────────────

    /// Fund an escrow from a (verified) agreement. Milestone percentages, if
    /// any, must sum to exactly 100.
    pub async fn lock(
        &self,
        agreement: &Agreement,
        conditions: Vec<EscrowCondition>,
        milestones: Vec<Milestone>,
        dispute_resolver: Option<EntityId>,
        now: Timestamp,
    ) -> Result<Escrow, PactError> {
        if !milestones.is_empty() {
            let total: u32 = milestones.iter().map(|m| m.payment_percent).sum();
            if total != 100 {
                return Err(PactError::InvalidAmount);
            }
        }

        self.economy
            .lock_funds(
                &agreement.client_id,
                &agreement.task_id,
                agreement.confirmed_amount,
                &format!("escrow {}", agreement.escrow_address),
                now,
            )
            .await?;

        let escrow = Escrow {
            escrow_id: agreement.escrow_address.clone(),
            lock_key: agreement.task_id.clone(),
            client: agreement.client_id.clone(),
            provider: agreement.provider_id.clone(),
            amount: agreement.confirmed_amount,
            conditions,
            milestones,
            deadline: chrono::DateTime::parse_from_rfc3339(&agreement.deadline)
                .map(|t| t.timestamp())
                .unwrap_or(now),
            dispute_resolver,
            status: EscrowStatus::Funded,
            created_at: now,
        };
        self.escrows
            .lock()
            .await
            .insert(escrow.escrow_id.clone(), escrow.clone());
        tracing::info!(
            escrow = %escrow.escrow_id,
            amount = escrow.amount,
            "escrow funded"
        );
        Ok(escrow)
    }

    pub async fn get(&self, escrow_id: &str) -> Option<Escrow> {
        self.escrows.lock().await.get(escrow_id).cloned()
    }

    // ── Conditions ───────────────────────────────────────────────────────────

    /// Mark a named condition fulfilled. Returns true when every condition
    /// is now fulfilled (the caller may then release).
    pub async fn fulfill_condition(
        &self,
        escrow_id: &str,
        condition_name: &str,
    ) -> Result<bool, PactError> {
        let mut escrows = self.escrows.lock().await;
        let escrow = escrows
            .get_mut(escrow_id)
            .ok_or_else(|| PactError::Internal(format!("unknown escrow {escrow_id}")))?;
        let condition = escrow
            .conditions
            .iter_mut()
            .find(|c| c.name == condition_name)
            .ok_or_else(|| {
                PactError::Internal(format!("unknown condition {condition_name}"))
            })?;
        condition.fulfilled = true;
        Ok(escrow.conditions.iter().all(|c| c.fulfilled))
    }

    // ── Release paths ────────────────────────────────────────────────────────

    /// Release the full amount to the provider once all conditions hold.
    pub async fn release_full(&self, escrow_id: &str, now: Timestamp) -> Result<Amount, PactError> {
        let (key, provider, amount) = {
            let mut escrows = self.escrows.lock().await;
            let escrow = escrows
                .get_mut(escrow_id)
                .ok_or_else(|| PactError::Internal(format!("unknown escrow {escrow_id}")))?;
            if escrow.status != EscrowStatus::Funded {
                return Err(PactError::StateTransitionInvalid {
                    from: format!("{:?}", escrow.status),
                    to: "released".into(),
                });
            }
            if !escrow.conditions.iter().all(|c| c.fulfilled) {
                return Err(PactError::Internal("unfulfilled conditions remain".into()));
            }
            escrow.status = EscrowStatus::Released;
            (escrow.lock_key.clone(), escrow.provider.clone(), escrow.amount)
        };
        self.economy
            .release_locked(&key, &provider, amount, &format!("escrow {escrow_id} release"), now)
            .await?;
        tracing::info!(escrow = %escrow_id, amount, "escrow fully released");
        Ok(amount)
    }

    /// Evaluation-scored settlement: release the scored fraction to the
    /// provider and refund the remainder to the client.
    pub async fn release_scored(
        &self,
        escrow_id: &str,
        score: f64,
        now: Timestamp,
    ) -> Result<(Amount, Amount), PactError> {
        let (key, provider, amount, percent) = {
            let mut escrows = self.escrows.lock().await;
            let escrow = escrows
                .get_mut(escrow_id)
                .ok_or_else(|| PactError::Internal(format!("unknown escrow {escrow_id}")))?;
            if escrow.status != EscrowStatus::Funded {
                return Err(PactError::StateTransitionInvalid {
                    from: format!("{:?}", escrow.status),
                    to: "released".into(),
                });
            }
            let percent = release_percent(score);
            escrow.status = match percent {
                100 => EscrowStatus::Released,
                0 => EscrowStatus::Refunded,
                _ => EscrowStatus::PartiallyReleased,
            };
            (escrow.lock_key.clone(), escrow.provider.clone(), escrow.amount, percent)
        };

        let released = amount * percent as Amount / 100;
        if released > 0 {
            self.economy
                .release_locked(
                    &key,
                    &provider,
                    released,
                    &format!("escrow {escrow_id} scored release"),
                    now,
                )
                .await?;
        }
        let refunded = if released < amount {
            self.economy
                .refund_locked(&key, &format!("escrow {escrow_id} remainder"), now)
                .await?
        } else {
            0
        };
        tracing::info!(escrow = %escrow_id, score, released, refunded, "escrow settled by score");
        Ok((released, refunded))
    }

    /// Complete a named milestone, releasing its tranche to the provider.
    pub async fn complete_milestone(
        &self,
        escrow_id: &str,
        milestone_name: &str,
        now: Timestamp,
    ) -> Result<Amount, PactError> {
        let (key, provider, tranche, all_done, amount) = {
            let mut escrows = self.escrows.lock().await;
            let escrow = escrows
                .get_mut(escrow_id)
                .ok_or_else(|| PactError::Internal(format!("unknown escrow {escrow_id}")))?;
            if escrow.status != EscrowStatus::Funded
                && escrow.status != EscrowStatus::PartiallyReleased
            {
                return Err(PactError::StateTransitionInvalid {
                    from: format!("{:?}", escrow.status),
                    to: "milestone release".into(),
                });
            }
            let milestone = escrow
                .milestones
                .iter_mut()
                .find(|m| m.name == milestone_name)
                .ok_or_else(|| {
                    PactError::Internal(format!("unknown milestone {milestone_name}"))
                })?;
            if milestone.completed {
                return Err(PactError::DuplicateTransaction(milestone_name.into()));
            }
            milestone.completed = true;
            let tranche = escrow.amount * milestone.payment_percent as Amount / 100;
            let all_done = escrow.milestones.iter().all(|m| m.completed);
            escrow.status = if all_done {
                EscrowStatus::Released
            } else {
                EscrowStatus::PartiallyReleased
            };
            (escrow.lock_key.clone(), escrow.provider.clone(), tranche, all_done, escrow.amount)
        };

        // The final tranche takes whatever remains to absorb rounding.
        if all_done {
            let released_so_far = {
                let escrows = self.escrows.lock().await;
                let escrow = escrows.get(escrow_id).expect("escrow present");
                escrow
                    .milestones
                    .iter()
                    .filter(|m| m.completed && m.name != milestone_name)
                    .map(|m| amount * m.payment_percent as Amount / 100)
                    .sum::<Amount>()
            };
            let remainder = amount - released_so_far;
            self.economy
                .release_locked(
                    &key,
                    &provider,
                    remainder,
                    &format!("escrow {escrow_id} final milestone"),
                    now,
                )
                .await?;
            tracing::info!(escrow = %escrow_id, tranche = remainder, "final milestone released");
            Ok(remainder)
        } else {
            self.economy
                .release_locked(
                    &key,
                    &provider,
                    tranche,
                    &format!("escrow {escrow_id} milestone {milestone_name}"),
                    now,
                )
                .await?;
            tracing::info!(escrow = %escrow_id, tranche, "milestone released");
            Ok(tranche)
        }
    }

    /// Deadline passed without acceptance: everything returns to the client.
    pub async fn refund_expired(&self, escrow_id: &str, now: Timestamp) -> Result<Amount, PactError> {
        let key = {
            let mut escrows = self.escrows.lock().await;
            let escrow = escrows
                .get_mut(escrow_id)
                .ok_or_else(|| PactError::Internal(format!("unknown escrow {escrow_id}")))?;
            if now <= escrow.deadline {
                return Err(PactError::Internal("deadline not reached".into()));
            }
            if escrow.status != EscrowStatus::Funded
                && escrow.status != EscrowStatus::PartiallyReleased
            {
                return Err(PactError::StateTransitionInvalid {
                    from: format!("{:?}", escrow.status),
                    to: "refunded".into(),
                });
            }
            escrow.status = EscrowStatus::Refunded;
            escrow.lock_key.clone()
        };
        let refunded = self
            .economy
            .refund_locked(&key, &format!("escrow {escrow_id} expired"), now)
            .await?;
        tracing::warn!(escrow = %escrow_id, refunded, "escrow expired, refunded to client");
        Ok(refunded)
    }

    /// Dispute resolution. Only the named resolver may split the funds; with
    /// no resolver configured, everything returns to the client.
    pub async fn resolve_dispute(
        &self,
        escrow_id: &str,
        resolver: Option<&EntityId>,
        provider_fraction: f64,
        now: Timestamp,
    ) -> Result<(Amount, Amount), PactError> {
        let (key, provider, amount, fraction) = {
            let mut escrows = self.escrows.lock().await;
            let escrow = escrows
                .get_mut(escrow_id)
                .ok_or_else(|| PactError::Internal(format!("unknown escrow {escrow_id}")))?;
            match (&escrow.dispute_resolver, resolver) {
                (Some(expected), Some(actual)) if expected == actual => {
                    escrow.status = EscrowStatus::Disputed;
                    (
                        escrow.lock_key.clone(),
                        escrow.provider.clone(),
                        escrow.amount,
                        provider_fraction.clamp(0.0, 1.0),
                    )
                }
                (Some(_), _) => return Err(PactError::Forbidden),
                // No resolver named: funds return to the client.
                (None, _) => {
                    escrow.status = EscrowStatus::Refunded;
                    (escrow.lock_key.clone(), escrow.provider.clone(), escrow.amount, 0.0)
                }
            }
        };

        let released = (amount as f64 * fraction) as Amount;
        if released > 0 {
            self.economy
                .release_locked(
                    &key,
                    &provider,
                    released,
                    &format!("escrow {escrow_id} dispute award"),
                    now,
                )
                .await?;
        }
        let refunded = if released < amount {
            self.economy
                .refund_locked(&key, &format!("escrow {escrow_id} dispute refund"), now)
                .await?
        } else {
            0
        };
        tracing::warn!(escrow = %escrow_id, released, refunded, "dispute resolved");
        Ok((released, refunded))
    }
}
