//! Treasury-anchored mint and burn, plus the reward helpers built on them.
//!
//! Minting creates new tokens and credits a recipient; burning debits a
//! wallet and destroys tokens. Both adjust the supply statistics, which the
//! reconciliation invariant checks against wallet and locked totals.

use pactnet_core::constants::MICRO_PER_CRD;
use pactnet_core::ledger::{EntryKind, LedgerEntry};
use pactnet_core::types::{Amount, EntityId, TaskId, Timestamp};
use pactnet_core::PactError;
use serde::{Deserialize, Serialize};

use crate::economy::TokenEconomy;

/// Flat reward for a completed peer review.
pub const REVIEW_REWARD: Amount = 10 * MICRO_PER_CRD;

/// Mint history is bounded in memory.
const MINT_HISTORY_CAP: usize = 1_000;

/// One mint event, kept for audit queries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MintRecord {
    pub recipient: EntityId,
    pub amount: Amount,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub timestamp: Timestamp,
}

impl TokenEconomy {
    /// Mint `amount` new tokens to `recipient`.
    pub async fn mint(
        &self,
        recipient: &EntityId,
        amount: Amount,
        reason: &str,
        task_id: Option<TaskId>,
        now: Timestamp,
    ) -> Result<(), PactError> {
        if amount == 0 {
            return Err(PactError::InvalidAmount);
        }
        let (wallet, supply) = {
            let mut inner = self.inner.lock().await;
            let wallet = inner
                .wallets
                .get_mut(recipient)
                .ok_or_else(|| PactError::WalletNotFound(recipient.to_string()))?;
            wallet.balance += amount;
            wallet.transactions.push(LedgerEntry {
                kind: EntryKind::Mint,
                counterparty: None,
                amount,
                description: reason.into(),
                timestamp: now,
            });
            let wallet_snapshot = wallet.clone();

            inner.supply.total_minted += amount;
            inner.supply.total_supply += amount;
            inner.supply.circulating_supply += amount;
            inner.supply.mint_count += 1;
            inner.mint_history.push(MintRecord {
                recipient: recipient.clone(),
                amount,
                reason: reason.into(),
                task_id,
                timestamp: now,
            });
            let overflow = inner.mint_history.len().saturating_sub(MINT_HISTORY_CAP);
            if overflow > 0 {
                inner.mint_history.drain(..overflow);
            }
            (wallet_snapshot, inner.supply.clone())
        };
        self.store_wallet_and_supply(&wallet, &supply).await?;
        tracing::info!(%recipient, amount, reason, "minted tokens");
        Ok(())
    }

    /// Burn `amount` from `entity`, destroying supply.
    pub async fn burn(
        &self,
        entity: &EntityId,
        amount: Amount,
        reason: &str,
        now: Timestamp,
    ) -> Result<(), PactError> {
        if amount == 0 {
            return Err(PactError::InvalidAmount);
        }
        let (wallet, supply) = {
            let mut inner = self.inner.lock().await;
            let wallet = inner
                .wallets
                .get_mut(entity)
                .ok_or_else(|| PactError::WalletNotFound(entity.to_string()))?;
            if wallet.balance < amount {
                return Err(PactError::InsufficientFunds {
                    need: amount,
                    have: wallet.balance,
                });
            }
            wallet.balance -= amount;
            wallet.transactions.push(LedgerEntry {
                kind: EntryKind::Burn,
                counterparty: None,
                amount,
                description: reason.into(),
                timestamp: now,
            });
            let wallet_snapshot = wallet.clone();

            inner.supply.total_burned += amount;
            inner.supply.total_supply = inner.supply.total_supply.saturating_sub(amount);
            inner.supply.circulating_supply =
                inner.supply.circulating_supply.saturating_sub(amount);
            inner.supply.burn_count += 1;
            (wallet_snapshot, inner.supply.clone())
        };
        self.store_wallet_and_supply(&wallet, &supply).await?;
        tracing::info!(%entity, amount, reason, "burned tokens");
        Ok(())
    }

    // ── Reward helpers ───────────────────────────────────────────────────────

    /// Mint a task-completion reward scaled by complexity: one CRD per
    /// complexity point.
    pub async fn mint_task_reward(
        &self,
        recipient: &EntityId,
        complexity: u32,
        task_id: TaskId,
        now: Timestamp,
    ) -> Result<Amount, PactError> {
        let amount = complexity as Amount * MICRO_PER_CRD;
        self.mint(
            recipient,
            amount,
            "task completion reward",
            Some(task_id),
            now,
        )
        .await?;
        Ok(amount)
    }

    /// Flat reward for completing a peer review.
    pub async fn mint_review_reward(
        &self,
        recipient: &EntityId,
        now: Timestamp,
    ) -> Result<Amount, PactError> {
        self.mint(recipient, REVIEW_REWARD, "review reward", None, now)
            .await?;
        Ok(REVIEW_REWARD)
    }

    /// Discretionary bonus grant (admin-gated at the API layer).
    pub async fn mint_bonus(
        &self,
        recipient: &EntityId,
        amount: Amount,
        reason: &str,
        now: Timestamp,
    ) -> Result<(), PactError> {
        self.mint(recipient, amount, reason, None, now).await
    }

    /// Mint events, optionally filtered by recipient.
    pub async fn mint_history(&self, recipient: Option<&EntityId>) -> Vec<MintRecord> {
        let inner = self.inner.lock().await;
        inner
            .mint_history
            .iter()
            .filter(|r| recipient.map(|e| &r.recipient == e).unwrap_or(true))
            .cloned()
            .collect()
    }

    async fn store_wallet_and_supply(
        &self,
        wallet: &pactnet_core::ledger::Wallet,
        supply: &pactnet_core::ledger::SupplyStats,
    ) -> Result<(), PactError> {
        self.store().save_wallet(wallet).await?;
        self.store().save_supply(supply).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pactnet_store::DataStore;
    use std::sync::Arc;

    async fn economy(name: &str) -> TokenEconomy {
        let dir =
            std::env::temp_dir().join(format!("pactnet_mint_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        TokenEconomy::open(Arc::new(DataStore::open(dir).unwrap())).unwrap()
    }

    #[tokio::test]
    async fn mint_credits_and_counts_supply() {
        let eco = economy("mint").await;
        eco.create_wallet(&"recipient".into(), 0, 0).await.unwrap();

        let earned = eco
            .mint_task_reward(&"recipient".into(), 50, TaskId::new("t1"), 1)
            .await
            .unwrap();
        assert_eq!(earned, 50 * MICRO_PER_CRD);
        eco.mint_review_reward(&"recipient".into(), 2).await.unwrap();
        eco.mint_bonus(&"recipient".into(), 500 * MICRO_PER_CRD, "innovation bonus", 3)
            .await
            .unwrap();

        assert_eq!(
            eco.balance(&"recipient".into()).await.unwrap(),
            560 * MICRO_PER_CRD
        );
        let supply = eco.supply().await;
        assert_eq!(supply.total_minted, 560 * MICRO_PER_CRD);
        assert_eq!(supply.mint_count, 3);
        assert_eq!(eco.reconcile().await, 0);

        let history = eco.mint_history(Some(&"recipient".into())).await;
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn burn_destroys_supply() {
        let eco = economy("burn").await;
        eco.create_wallet(&"holder".into(), 1_000, 0).await.unwrap();
        eco.burn(&"holder".into(), 400, "penalty", 1).await.unwrap();

        assert_eq!(eco.balance(&"holder".into()).await.unwrap(), 600);
        let supply = eco.supply().await;
        assert_eq!(supply.total_burned, 400);
        assert_eq!(supply.burn_count, 1);
        assert_eq!(eco.reconcile().await, 0);

        let err = eco.burn(&"holder".into(), 10_000, "too much", 2).await.unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
    }
}
