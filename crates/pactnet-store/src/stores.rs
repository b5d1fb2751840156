//! Typed stores over the persisted file layout:
//!
//!   data/wallets/{entity}.json      — wallet snapshot
//!   data/tasks/{task_id}.json       — task contract
//!   data/agents/registry.json       — service registry
//!   data/reputation/{entity}.json   — reputation record
//!   data/economy/supply.json        — mint/burn/supply stats
//!   data/offline_queue.db           — SQLite offline queue
//!
//! Every JSON document carries a `version` integer for forward
//! compatibility. Writes hold the per-file lock for the full operation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pactnet_core::constants::STORE_VERSION;
use pactnet_core::ledger::{SupplyStats, TaskContract, Wallet};
use pactnet_core::registry::ServiceEntry;
use pactnet_core::reputation::EntityReputation;
use pactnet_core::types::{EntityId, TaskId};
use pactnet_core::PactError;

use crate::fs::{read_json, write_json_with_retry, FileLocks};

/// Persisted form of the service registry file.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct RegistryDocument {
    pub version: u32,
    pub services: BTreeMap<String, ServiceEntry>,
}

impl Default for RegistryDocument {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            services: BTreeMap::new(),
        }
    }
}

/// Root of the persisted data directory plus its write locks.
pub struct DataStore {
    root: PathBuf,
    locks: FileLocks,
}

impl DataStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PactError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| PactError::Persistence(e.to_string()))?;
        Ok(Self {
            root,
            locks: FileLocks::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── Path layout ──────────────────────────────────────────────────────────

    pub fn wallet_path(&self, entity: &EntityId) -> PathBuf {
        self.root.join("wallets").join(format!("{entity}.json"))
    }

    pub fn task_path(&self, task_id: &TaskId) -> PathBuf {
        self.root.join("tasks").join(format!("{task_id}.json"))
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join("agents").join("registry.json")
    }

    pub fn reputation_path(&self, entity: &EntityId) -> PathBuf {
        self.root.join("reputation").join(format!("{entity}.json"))
    }

    pub fn supply_path(&self) -> PathBuf {
        self.root.join("economy").join("supply.json")
    }

    pub fn offline_queue_path(&self) -> PathBuf {
        self.root.join("offline_queue.db")
    }

    // ── Wallets ──────────────────────────────────────────────────────────────

    pub async fn save_wallet(&self, wallet: &Wallet) -> Result<(), PactError> {
        let path = self.wallet_path(&wallet.entity_id);
        let lock = self.locks.lock_for(&path).await;
        let _guard = lock.lock().await;
        write_json_with_retry(&path, wallet)
    }

    pub fn load_wallet(&self, entity: &EntityId) -> Result<Option<Wallet>, PactError> {
        read_json(&self.wallet_path(entity))
    }

    /// Load every persisted wallet (startup restore path).
    pub fn load_all_wallets(&self) -> Result<Vec<Wallet>, PactError> {
        self.load_dir(self.root.join("wallets"))
    }

    // ── Tasks ────────────────────────────────────────────────────────────────

    pub async fn save_task(&self, task: &TaskContract) -> Result<(), PactError> {
        let path = self.task_path(&task.task_id);
        let lock = self.locks.lock_for(&path).await;
        let _guard = lock.lock().await;
        write_json_with_retry(&path, task)
    }

    pub fn load_task(&self, task_id: &TaskId) -> Result<Option<TaskContract>, PactError> {
        read_json(&self.task_path(task_id))
    }

    pub fn load_all_tasks(&self) -> Result<Vec<TaskContract>, PactError> {
        self.load_dir(self.root.join("tasks"))
    }

    // ── Registry ─────────────────────────────────────────────────────────────

    pub async fn save_registry(&self, doc: &RegistryDocument) -> Result<(), PactError> {
        let path = self.registry_path();
        let lock = self.locks.lock_for(&path).await;
        let _guard = lock.lock().await;
        write_json_with_retry(&path, doc)
    }

    pub fn load_registry(&self) -> Result<RegistryDocument, PactError> {
        Ok(read_json(&self.registry_path())?.unwrap_or_default())
    }

    // ── Reputation ───────────────────────────────────────────────────────────

    pub async fn save_reputation(&self, rep: &EntityReputation) -> Result<(), PactError> {
        let path = self.reputation_path(&rep.entity_id);
        let lock = self.locks.lock_for(&path).await;
        let _guard = lock.lock().await;
        write_json_with_retry(&path, rep)
    }

    pub fn load_reputation(&self, entity: &EntityId) -> Result<Option<EntityReputation>, PactError> {
        read_json(&self.reputation_path(entity))
    }

    // ── Supply ───────────────────────────────────────────────────────────────

    pub async fn save_supply(&self, stats: &SupplyStats) -> Result<(), PactError> {
        let path = self.supply_path();
        let lock = self.locks.lock_for(&path).await;
        let _guard = lock.lock().await;
        write_json_with_retry(&path, stats)
    }

    pub fn load_supply(&self) -> Result<SupplyStats, PactError> {
        Ok(read_json(&self.supply_path())?.unwrap_or_default())
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn load_dir<T: serde::de::DeserializeOwned>(&self, dir: PathBuf) -> Result<Vec<T>, PactError> {
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(PactError::Persistence(e.to_string())),
        };
        for entry in entries {
            let entry = entry.map_err(|e| PactError::Persistence(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(doc) = read_json(&path)? {
                out.push(doc);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pactnet_core::ledger::{EntryKind, LedgerEntry};

    fn temp_store(name: &str) -> DataStore {
        let dir = std::env::temp_dir().join(format!("pactnet_store_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        DataStore::open(dir).unwrap()
    }

    #[tokio::test]
    async fn wallet_snapshot_round_trip_preserves_log_order() {
        let store = temp_store("wallet");
        let mut wallet = Wallet::new("alice".into(), 700);
        for i in 0..3 {
            wallet.transactions.push(LedgerEntry {
                kind: EntryKind::Deposit,
                counterparty: None,
                amount: 100 + i,
                description: format!("entry {i}"),
                timestamp: i as i64,
            });
        }
        store.save_wallet(&wallet).await.unwrap();

        let loaded = store.load_wallet(&"alice".into()).unwrap().unwrap();
        assert_eq!(loaded.balance, 700);
        assert_eq!(loaded.transactions.len(), 3);
        let amounts: Vec<_> = loaded.transactions.iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![100, 101, 102]);
    }

    #[tokio::test]
    async fn missing_wallet_is_none() {
        let store = temp_store("missing");
        assert!(store.load_wallet(&"ghost".into()).unwrap().is_none());
    }

    #[tokio::test]
    async fn load_all_wallets_sees_every_snapshot() {
        let store = temp_store("all");
        store.save_wallet(&Wallet::new("a".into(), 1)).await.unwrap();
        store.save_wallet(&Wallet::new("b".into(), 2)).await.unwrap();
        assert_eq!(store.load_all_wallets().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn supply_defaults_when_absent() {
        let store = temp_store("supply");
        let stats = store.load_supply().unwrap();
        assert_eq!(stats.total_minted, 0);

        let mut stats = stats;
        stats.total_minted = 500;
        stats.mint_count = 1;
        store.save_supply(&stats).await.unwrap();
        assert_eq!(store.load_supply().unwrap().total_minted, 500);
    }
}
