//! The token economy: wallets, transfers, task-locked funds and the
//! reconciliation invariant.
//!
//! One mutex guards all mutable state. Every public operation acquires it,
//! performs the complete mutation, releases, and only then persists the
//! affected snapshots — a failed persist is retried by the store layer and
//! surfaced without corrupting in-memory state.
//!
//! Invariant maintained at every observable moment:
//! `Σ(wallet balances) + Σ(locked) == total_minted − total_burned`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;

use pactnet_core::ledger::{
    EntryKind, LedgerEntry, SupplyStats, TaskContract, TaskStatus, Wallet,
};
use pactnet_core::types::{Amount, EntityId, TaskId, Timestamp};
use pactnet_core::PactError;
use pactnet_store::DataStore;

use crate::mint::MintRecord;

pub(crate) struct Inner {
    pub wallets: HashMap<EntityId, Wallet>,
    /// task_id → (creator, locked amount). Authoritative for reconciliation.
    pub locked: BTreeMap<TaskId, (EntityId, Amount)>,
    pub tasks: HashMap<TaskId, TaskContract>,
    pub supply: SupplyStats,
    pub mint_history: Vec<MintRecord>,
}

/// Shared handle to the whole token economy.
pub struct TokenEconomy {
    store: Arc<DataStore>,
    pub(crate) inner: Mutex<Inner>,
}

impl TokenEconomy {
    /// Restore the economy from the persisted snapshots.
    pub fn open(store: Arc<DataStore>) -> Result<Self, PactError> {
        let wallets: HashMap<EntityId, Wallet> = store
            .load_all_wallets()?
            .into_iter()
            .map(|w| (w.entity_id.clone(), w))
            .collect();
        let tasks: HashMap<TaskId, TaskContract> = store
            .load_all_tasks()?
            .into_iter()
            .map(|t| (t.task_id.clone(), t))
            .collect();
        // Locked funds are implied by non-terminal tasks.
        let locked = tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .map(|t| (t.task_id.clone(), (t.creator_id.clone(), t.reward_amount)))
            .collect();
        let supply = store.load_supply()?;
        Ok(Self {
            store,
            inner: Mutex::new(Inner {
                wallets,
                locked,
                tasks,
                supply,
                mint_history: Vec::new(),
            }),
        })
    }

    pub(crate) fn store(&self) -> &Arc<DataStore> {
        &self.store
    }

    // ── Wallet lifecycle ─────────────────────────────────────────────────────

    /// Create a wallet. A non-zero opening balance enters circulation as a
    /// mint so the supply invariant holds from the first snapshot.
    pub async fn create_wallet(
        &self,
        entity: &EntityId,
        initial_balance: Amount,
        now: Timestamp,
    ) -> Result<(), PactError> {
        let snapshot;
        let supply_snapshot;
        {
            let mut inner = self.inner.lock().await;
            if inner.wallets.contains_key(entity) {
                return Err(PactError::DuplicateTransaction(format!(
                    "wallet exists: {entity}"
                )));
            }
            let mut wallet = Wallet::new(entity.clone(), initial_balance);
            if initial_balance > 0 {
                wallet.transactions.push(LedgerEntry {
                    kind: EntryKind::Deposit,
                    counterparty: None,
                    amount: initial_balance,
                    description: "opening balance".into(),
                    timestamp: now,
                });
                inner.supply.total_minted += initial_balance;
                inner.supply.total_supply += initial_balance;
                inner.supply.circulating_supply += initial_balance;
            }
            inner.wallets.insert(entity.clone(), wallet.clone());
            snapshot = wallet;
            supply_snapshot = inner.supply.clone();
        }
        self.store.save_wallet(&snapshot).await?;
        self.store.save_supply(&supply_snapshot).await?;
        tracing::info!(%entity, balance = initial_balance, "created wallet");
        Ok(())
    }

    pub async fn balance(&self, entity: &EntityId) -> Result<Amount, PactError> {
        let inner = self.inner.lock().await;
        inner
            .wallets
            .get(entity)
            .map(|w| w.balance)
            .ok_or_else(|| PactError::WalletNotFound(entity.to_string()))
    }

    pub async fn wallet_snapshot(&self, entity: &EntityId) -> Result<Wallet, PactError> {
        let inner = self.inner.lock().await;
        inner
            .wallets
            .get(entity)
            .cloned()
            .ok_or_else(|| PactError::WalletNotFound(entity.to_string()))
    }

    pub async fn wallet_exists(&self, entity: &EntityId) -> bool {
        self.inner.lock().await.wallets.contains_key(entity)
    }

    // ── Core operations ──────────────────────────────────────────────────────

    /// Credit `entity` from outside the economy (supply enters circulation).
    pub async fn deposit(
        &self,
        entity: &EntityId,
        amount: Amount,
        description: &str,
        now: Timestamp,
    ) -> Result<Amount, PactError> {
        if amount == 0 {
            return Err(PactError::InvalidAmount);
        }
        let (wallet, supply) = {
            let mut inner = self.inner.lock().await;
            let wallet = inner
                .wallets
                .get_mut(entity)
                .ok_or_else(|| PactError::WalletNotFound(entity.to_string()))?;
            wallet.balance += amount;
            wallet.transactions.push(LedgerEntry {
                kind: EntryKind::Deposit,
                counterparty: None,
                amount,
                description: description.into(),
                timestamp: now,
            });
            let snapshot = wallet.clone();
            inner.supply.total_minted += amount;
            inner.supply.total_supply += amount;
            inner.supply.circulating_supply += amount;
            (snapshot, inner.supply.clone())
        };
        self.store.save_wallet(&wallet).await?;
        self.store.save_supply(&supply).await?;
        Ok(wallet.balance)
    }

    /// Debit `entity` out of the economy.
    pub async fn withdraw(
        &self,
        entity: &EntityId,
        amount: Amount,
        description: &str,
        now: Timestamp,
    ) -> Result<Amount, PactError> {
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
                kind: EntryKind::Withdraw,
                counterparty: None,
                amount,
                description: description.into(),
                timestamp: now,
            });
            let snapshot = wallet.clone();
            inner.supply.total_burned += amount;
            inner.supply.total_supply = inner.supply.total_supply.saturating_sub(amount);
            inner.supply.circulating_supply =
                inner.supply.circulating_supply.saturating_sub(amount);
            (snapshot, inner.supply.clone())
        };
        self.store.save_wallet(&wallet).await?;
        self.store.save_supply(&supply).await?;
        Ok(wallet.balance)
    }

    /// Atomic transfer: both ledger entries land or neither does. Holding
    /// the single economy mutex for the whole mutation gives the required
    /// serialization; no partial state is ever observable.
    pub async fn transfer(
        &self,
        from: &EntityId,
        to: &EntityId,
        amount: Amount,
        description: &str,
        now: Timestamp,
    ) -> Result<(), PactError> {
        if amount == 0 || from == to {
            return Err(PactError::InvalidAmount);
        }
        let (from_snapshot, to_snapshot) = {
            let mut inner = self.inner.lock().await;
            if !inner.wallets.contains_key(to) {
                return Err(PactError::WalletNotFound(to.to_string()));
            }
            let sender = inner
                .wallets
                .get_mut(from)
                .ok_or_else(|| PactError::WalletNotFound(from.to_string()))?;
            if sender.balance < amount {
                return Err(PactError::InsufficientFunds {
                    need: amount,
                    have: sender.balance,
                });
            }
            sender.balance -= amount;
            sender.transactions.push(LedgerEntry {
                kind: EntryKind::TransferOut,
                counterparty: Some(to.clone()),
                amount,
                description: description.into(),
                timestamp: now,
            });
            let from_snapshot = sender.clone();

            let recipient = inner
                .wallets
                .get_mut(to)
                .expect("recipient existence checked above");
            recipient.balance += amount;
            recipient.transactions.push(LedgerEntry {
                kind: EntryKind::TransferIn,
                counterparty: Some(from.clone()),
                amount,
                description: description.into(),
                timestamp: now,
            });
            (from_snapshot, recipient.clone())
        };
        self.store.save_wallet(&from_snapshot).await?;
        self.store.save_wallet(&to_snapshot).await?;
        tracing::info!(%from, %to, amount, "transfer complete");
        Ok(())
    }

    // ── Task-locked funds ────────────────────────────────────────────────────

    /// Create a task contract, atomically debiting the creator into the
    /// locked pool keyed by the new task id.
    pub async fn create_task(
        &self,
        creator: &EntityId,
        description: &str,
        reward_amount: Amount,
        now: Timestamp,
    ) -> Result<TaskContract, PactError> {
        if reward_amount == 0 {
            return Err(PactError::InvalidAmount);
        }
        let task_id = TaskId::new(uuid::Uuid::new_v4().to_string());
        let (wallet_snapshot, task) = {
            let mut inner = self.inner.lock().await;
            let wallet = inner
                .wallets
                .get_mut(creator)
                .ok_or_else(|| PactError::WalletNotFound(creator.to_string()))?;
            if wallet.balance < reward_amount {
                return Err(PactError::InsufficientFunds {
                    need: reward_amount,
                    have: wallet.balance,
                });
            }
            wallet.balance -= reward_amount;
            wallet.transactions.push(LedgerEntry {
                kind: EntryKind::TransferOut,
                counterparty: None,
                amount: reward_amount,
                description: format!("locked for task {task_id}"),
                timestamp: now,
            });
            let wallet_snapshot = wallet.clone();

            let task = TaskContract {
                version: pactnet_core::constants::STORE_VERSION,
                task_id: task_id.clone(),
                creator_id: creator.clone(),
                worker_id: None,
                description: description.into(),
                reward_amount,
                status: TaskStatus::Created,
                created_at: now,
                completed_at: None,
            };
            inner
                .locked
                .insert(task_id.clone(), (creator.clone(), reward_amount));
            inner.tasks.insert(task_id.clone(), task.clone());
            (wallet_snapshot, task)
        };
        self.store.save_wallet(&wallet_snapshot).await?;
        self.store.save_task(&task).await?;
        tracing::info!(task = %task.task_id, %creator, reward_amount, "task created, funds locked");
        Ok(task)
    }

    pub async fn assign_task(&self, task_id: &TaskId, worker: &EntityId) -> Result<(), PactError> {
        let task = {
            let mut inner = self.inner.lock().await;
            if !inner.wallets.contains_key(worker) {
                return Err(PactError::WalletNotFound(worker.to_string()));
            }
            let task = inner
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| PactError::Internal(format!("task not found: {task_id}")))?;
            transition_task(task, TaskStatus::Assigned)?;
            task.worker_id = Some(worker.clone());
            task.clone()
        };
        self.store.save_task(&task).await
    }

    pub async fn start_task(&self, task_id: &TaskId) -> Result<(), PactError> {
        let task = {
            let mut inner = self.inner.lock().await;
            let task = inner
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| PactError::Internal(format!("task not found: {task_id}")))?;
            transition_task(task, TaskStatus::InProgress)?;
            task.clone()
        };
        self.store.save_task(&task).await
    }

    /// Complete a task: the lock is removed and the worker is credited, in
    /// one critical section.
    pub async fn complete_task(&self, task_id: &TaskId, now: Timestamp) -> Result<(), PactError> {
        let (task, wallet) = {
            let mut inner = self.inner.lock().await;
            let task = inner
                .tasks
                .get(task_id)
                .ok_or_else(|| PactError::Internal(format!("task not found: {task_id}")))?
                .clone();
            let worker = task
                .worker_id
                .clone()
                .ok_or_else(|| PactError::Internal("task has no worker".into()))?;
            if !task.status.can_transition(TaskStatus::Completed) {
                return Err(PactError::StateTransitionInvalid {
                    from: task.status.to_string(),
                    to: TaskStatus::Completed.to_string(),
                });
            }
            let (_, amount) = inner
                .locked
                .remove(task_id)
                .ok_or_else(|| PactError::Internal(format!("no locked funds for {task_id}")))?;

            let wallet = inner
                .wallets
                .get_mut(&worker)
                .ok_or_else(|| PactError::WalletNotFound(worker.to_string()))?;
            wallet.balance += amount;
            wallet.transactions.push(LedgerEntry {
                kind: EntryKind::Reward,
                counterparty: Some(task.creator_id.clone()),
                amount,
                description: format!("reward for task {task_id}"),
                timestamp: now,
            });
            let wallet_snapshot = wallet.clone();

            let task = inner.tasks.get_mut(task_id).expect("task present");
            task.status = TaskStatus::Completed;
            task.completed_at = Some(now);
            (task.clone(), wallet_snapshot)
        };
        self.store.save_task(&task).await?;
        self.store.save_wallet(&wallet).await?;
        tracing::info!(task = %task_id, "task completed, reward released");
        Ok(())
    }

    /// Cancel or fail a task: the locked reward returns to the creator.
    pub async fn abort_task(
        &self,
        task_id: &TaskId,
        failed: bool,
        now: Timestamp,
    ) -> Result<(), PactError> {
        let target = if failed {
            TaskStatus::Failed
        } else {
            TaskStatus::Cancelled
        };
        let (task, wallet) = {
            let mut inner = self.inner.lock().await;
            let task = inner
                .tasks
                .get(task_id)
                .ok_or_else(|| PactError::Internal(format!("task not found: {task_id}")))?
                .clone();
            if !task.status.can_transition(target) {
                return Err(PactError::StateTransitionInvalid {
                    from: task.status.to_string(),
                    to: target.to_string(),
                });
            }
            let (creator, amount) = inner
                .locked
                .remove(task_id)
                .ok_or_else(|| PactError::Internal(format!("no locked funds for {task_id}")))?;

            let wallet = inner
                .wallets
                .get_mut(&creator)
                .ok_or_else(|| PactError::WalletNotFound(creator.to_string()))?;
            wallet.balance += amount;
            wallet.transactions.push(LedgerEntry {
                kind: EntryKind::TransferIn,
                counterparty: None,
                amount,
                description: format!("refund for task {task_id}"),
                timestamp: now,
            });
            let wallet_snapshot = wallet.clone();

            let task = inner.tasks.get_mut(task_id).expect("task present");
            task.status = target;
            task.completed_at = Some(now);
            (task.clone(), wallet_snapshot)
        };
        self.store.save_task(&task).await?;
        self.store.save_wallet(&wallet).await?;
        tracing::info!(task = %task_id, status = %target, "task aborted, funds returned");
        Ok(())
    }

    // ── Generic locked funds (escrow) ────────────────────────────────────────

    /// Debit `entity` into the locked pool under `key` without creating a
    /// task contract. Used by the escrow vault.
    pub async fn lock_funds(
        &self,
        entity: &EntityId,
        key: &TaskId,
        amount: Amount,
        description: &str,
        now: Timestamp,
    ) -> Result<(), PactError> {
        if amount == 0 {
            return Err(PactError::InvalidAmount);
        }
        let wallet = {
            let mut inner = self.inner.lock().await;
            if inner.locked.contains_key(key) {
                return Err(PactError::DuplicateTransaction(key.to_string()));
            }
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
                kind: EntryKind::TransferOut,
                counterparty: None,
                amount,
                description: description.into(),
                timestamp: now,
            });
            let snapshot = wallet.clone();
            inner.locked.insert(key.clone(), (entity.clone(), amount));
            snapshot
        };
        self.store.save_wallet(&wallet).await
    }

    /// Release part (or all) of the lock under `key` to `recipient`. The
    /// remainder stays locked; a fully drained lock is removed.
    pub async fn release_locked(
        &self,
        key: &TaskId,
        recipient: &EntityId,
        amount: Amount,
        description: &str,
        now: Timestamp,
    ) -> Result<(), PactError> {
        let wallet = {
            let mut inner = self.inner.lock().await;
            let (owner, locked) = inner
                .locked
                .get(key)
                .cloned()
                .ok_or_else(|| PactError::Internal(format!("no locked funds for {key}")))?;
            if amount > locked {
                return Err(PactError::InvalidAmount);
            }
            let wallet = inner
                .wallets
                .get_mut(recipient)
                .ok_or_else(|| PactError::WalletNotFound(recipient.to_string()))?;
            wallet.balance += amount;
            wallet.transactions.push(LedgerEntry {
                kind: EntryKind::Reward,
                counterparty: Some(owner.clone()),
                amount,
                description: description.into(),
                timestamp: now,
            });
            let snapshot = wallet.clone();
            if locked == amount {
                inner.locked.remove(key);
            } else {
                inner.locked.insert(key.clone(), (owner, locked - amount));
            }
            snapshot
        };
        self.store.save_wallet(&wallet).await
    }

    /// Return whatever remains locked under `key` to its original owner.
    pub async fn refund_locked(
        &self,
        key: &TaskId,
        description: &str,
        now: Timestamp,
    ) -> Result<Amount, PactError> {
        let (wallet, amount) = {
            let mut inner = self.inner.lock().await;
            let (owner, amount) = inner
                .locked
                .remove(key)
                .ok_or_else(|| PactError::Internal(format!("no locked funds for {key}")))?;
            let wallet = inner
                .wallets
                .get_mut(&owner)
                .ok_or_else(|| PactError::WalletNotFound(owner.to_string()))?;
            wallet.balance += amount;
            wallet.transactions.push(LedgerEntry {
                kind: EntryKind::TransferIn,
                counterparty: None,
                amount,
                description: description.into(),
                timestamp: now,
            });
            (wallet.clone(), amount)
        };
        self.store.save_wallet(&wallet).await?;
        Ok(amount)
    }

    pub async fn locked_amount(&self, task_id: &TaskId) -> Amount {
        let inner = self.inner.lock().await;
        inner.locked.get(task_id).map(|(_, a)| *a).unwrap_or(0)
    }

    pub async fn locked_total(&self) -> Amount {
        let inner = self.inner.lock().await;
        inner.locked.values().map(|(_, a)| *a).sum()
    }

    pub async fn task(&self, task_id: &TaskId) -> Option<TaskContract> {
        self.inner.lock().await.tasks.get(task_id).cloned()
    }

    pub async fn tasks_snapshot(&self) -> Vec<TaskContract> {
        self.inner.lock().await.tasks.values().cloned().collect()
    }

    pub async fn wallets_snapshot(&self) -> Vec<(EntityId, Amount)> {
        self.inner
            .lock()
            .await
            .wallets
            .values()
            .map(|w| (w.entity_id.clone(), w.balance))
            .collect()
    }

    pub async fn supply(&self) -> SupplyStats {
        self.inner.lock().await.supply.clone()
    }

    // ── Reconciliation ───────────────────────────────────────────────────────

    /// `Σ(balances) + Σ(locked) − (minted − burned)`; zero when consistent.
    pub async fn reconcile(&self) -> i128 {
        let inner = self.inner.lock().await;
        let balances: i128 = inner.wallets.values().map(|w| w.balance as i128).sum();
        let locked: i128 = inner.locked.values().map(|(_, a)| *a as i128).sum();
        let net_supply = inner.supply.total_minted as i128 - inner.supply.total_burned as i128;
        balances + locked - net_supply
    }
}

fn transition_task(task: &mut TaskContract, to: TaskStatus) -> Result<(), PactError> {
    if !task.status.can_transition(to) {
        return Err(PactError::StateTransitionInvalid {
            from: task.status.to_string(),
            to: to.to_string(),
        });
    }
    task.status = to;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn economy(name: &str) -> TokenEconomy {
        let dir = std::env::temp_dir().join(format!(
            "pactnet_economy_{}_{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        TokenEconomy::open(Arc::new(DataStore::open(dir).unwrap())).unwrap()
    }

    #[tokio::test]
    async fn transfer_moves_funds_and_keeps_sum() {
        let eco = economy("transfer").await;
        eco.create_wallet(&"alice".into(), 1_000, 0).await.unwrap();
        eco.create_wallet(&"bob".into(), 500, 0).await.unwrap();

        eco.transfer(&"alice".into(), &"bob".into(), 200, "svc", 1)
            .await
            .unwrap();
        assert_eq!(eco.balance(&"alice".into()).await.unwrap(), 800);
        assert_eq!(eco.balance(&"bob".into()).await.unwrap(), 700);

        let a = eco.wallet_snapshot(&"alice".into()).await.unwrap();
        let b = eco.wallet_snapshot(&"bob".into()).await.unwrap();
        assert_eq!(a.transactions.len(), 2); // opening + transfer_out
        assert_eq!(b.transactions.len(), 2);

        // Overdraft fails and changes nothing.
        let err = eco
            .transfer(&"alice".into(), &"bob".into(), 1_000, "fail", 2)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(eco.balance(&"alice".into()).await.unwrap(), 800);
        assert_eq!(eco.balance(&"bob".into()).await.unwrap(), 700);
        assert_eq!(eco.reconcile().await, 0);
    }

    #[tokio::test]
    async fn zero_and_self_transfers_are_invalid() {
        let eco = economy("invalid").await;
        eco.create_wallet(&"alice".into(), 100, 0).await.unwrap();
        assert_eq!(
            eco.transfer(&"alice".into(), &"alice".into(), 10, "self", 0)
                .await
                .unwrap_err()
                .code(),
            "INVALID_AMOUNT"
        );
        assert_eq!(
            eco.transfer(&"alice".into(), &"bob".into(), 0, "zero", 0)
                .await
                .unwrap_err()
                .code(),
            "INVALID_AMOUNT"
        );
    }

    #[tokio::test]
    async fn task_lifecycle_locks_and_releases() {
        let eco = economy("task").await;
        eco.create_wallet(&"client".into(), 1_000, 0).await.unwrap();
        eco.create_wallet(&"worker".into(), 100, 0).await.unwrap();

        let task = eco
            .create_task(&"client".into(), "index the archive", 300, 1)
            .await
            .unwrap();
        assert_eq!(eco.balance(&"client".into()).await.unwrap(), 700);
        assert_eq!(eco.locked_amount(&task.task_id).await, 300);
        assert_eq!(eco.reconcile().await, 0);

        eco.assign_task(&task.task_id, &"worker".into()).await.unwrap();
        eco.start_task(&task.task_id).await.unwrap();
        eco.complete_task(&task.task_id, 3).await.unwrap();

        assert_eq!(eco.balance(&"worker".into()).await.unwrap(), 400);
        assert_eq!(eco.locked_amount(&task.task_id).await, 0);
        assert_eq!(
            eco.task(&task.task_id).await.unwrap().status,
            TaskStatus::Completed
        );
        assert_eq!(eco.reconcile().await, 0);
    }

    #[tokio::test]
    async fn cancelled_task_refunds_creator() {
        let eco = economy("cancel").await;
        eco.create_wallet(&"client".into(), 500, 0).await.unwrap();
        let task = eco
            .create_task(&"client".into(), "doomed", 200, 1)
            .await
            .unwrap();
        assert_eq!(eco.balance(&"client".into()).await.unwrap(), 300);

        eco.abort_task(&task.task_id, false, 2).await.unwrap();
        assert_eq!(eco.balance(&"client".into()).await.unwrap(), 500);
        assert_eq!(eco.locked_total().await, 0);
        assert_eq!(
            eco.task(&task.task_id).await.unwrap().status,
            TaskStatus::Cancelled
        );
        assert_eq!(eco.reconcile().await, 0);
    }

    #[tokio::test]
    async fn insufficient_funds_blocks_task_creation() {
        let eco = economy("poor").await;
        eco.create_wallet(&"client".into(), 100, 0).await.unwrap();
        let err = eco
            .create_task(&"client".into(), "too rich", 300, 1)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(eco.balance(&"client".into()).await.unwrap(), 100);
        assert_eq!(eco.locked_total().await, 0);
    }

    #[tokio::test]
    async fn deposit_withdraw_adjust_supply() {
        let eco = economy("dw").await;
        eco.create_wallet(&"a".into(), 0, 0).await.unwrap();
        eco.deposit(&"a".into(), 100, "top-up", 1).await.unwrap();
        assert_eq!(eco.balance(&"a".into()).await.unwrap(), 100);

        let err = eco.withdraw(&"a".into(), 200, "overdraft", 2).await.unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");

        eco.withdraw(&"a".into(), 60, "cash out", 3).await.unwrap();
        assert_eq!(eco.balance(&"a".into()).await.unwrap(), 40);
        assert_eq!(eco.reconcile().await, 0);
    }

    #[tokio::test]
    async fn restores_from_disk() {
        let dir = std::env::temp_dir().join(format!("pactnet_economy_restore_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        {
            let eco = TokenEconomy::open(Arc::new(DataStore::open(&dir).unwrap())).unwrap();
            eco.create_wallet(&"alice".into(), 500, 0).await.unwrap();
            eco.create_task(&"alice".into(), "persisted", 200, 1)
                .await
                .unwrap();
        }
        let eco = TokenEconomy::open(Arc::new(DataStore::open(&dir).unwrap())).unwrap();
        assert_eq!(eco.balance(&"alice".into()).await.unwrap(), 300);
        assert_eq!(eco.locked_total().await, 200);
        assert_eq!(eco.reconcile().await, 0);
    }
}
