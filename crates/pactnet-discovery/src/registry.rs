//! Static service registry: the compatibility discovery path.
//!
//! An in-memory map persisted to `data/agents/registry.json`. Registration
//! is append-or-replace and persists immediately; heartbeats only touch the
//! in-memory timestamp; cleanup drops entries past the stale cutoff. The
//! DHT registry is the authoritative discovery path — this one serves
//! single-operator deployments and bootstrapping.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use pactnet_core::registry::ServiceEntry;
use pactnet_core::types::{EntityId, Timestamp};
use pactnet_core::PactError;
use pactnet_crypto::{sha256_hex, verify_digest_b64};
use pactnet_store::{DataStore, RegistryDocument};

#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub alive: usize,
    pub stale: usize,
}

pub struct ServiceRegistry {
    store: Arc<DataStore>,
    inner: Mutex<BTreeMap<EntityId, ServiceEntry>>,
}

impl ServiceRegistry {
    /// Load the persisted registry (empty if the file is absent).
    pub fn open(store: Arc<DataStore>) -> Result<Self, PactError> {
        let doc = store.load_registry()?;
        let inner = doc
            .services
            .into_iter()
            .map(|(k, v)| (EntityId::new(k), v))
            .collect();
        Ok(Self {
            store,
            inner: Mutex::new(inner),
        })
    }

    /// Verify the entry signature against its embedded public key.
    pub fn verify_entry(entry: &ServiceEntry) -> Result<(), PactError> {
        let signature = entry.signature.as_deref().ok_or(PactError::InvalidSignature)?;
        let digest = sha256_hex(entry.capabilities_preimage().as_bytes());
        let input = entry.signing_input(&digest);
        verify_digest_b64(entry.public_key.as_str(), input.as_bytes(), signature)
    }

    /// Register or replace a service entry and persist the registry.
    pub async fn register(&self, entry: ServiceEntry) -> Result<(), PactError> {
        Self::verify_entry(&entry)?;
        let doc = {
            let mut inner = self.inner.lock().await;
            inner.insert(entry.entity_id.clone(), entry.clone());
            snapshot(&inner)
        };
        self.store.save_registry(&doc).await?;
        tracing::info!(entity = %entry.entity_id, endpoint = %entry.endpoint, "service registered");
        Ok(())
    }

    pub async fn unregister(&self, entity: &EntityId) -> Result<bool, PactError> {
        let (removed, doc) = {
            let mut inner = self.inner.lock().await;
            let removed = inner.remove(entity).is_some();
            (removed, snapshot(&inner))
        };
        if removed {
            self.store.save_registry(&doc).await?;
        }
        Ok(removed)
    }

    /// Refresh an entry's heartbeat. Does not rewrite the file.
    pub async fn heartbeat(&self, entity: &EntityId, now: Timestamp) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.get_mut(entity) {
            Some(entry) => {
                entry.last_heartbeat = now;
                true
            }
            None => false,
        }
    }

    pub async fn find_by_id(&self, entity: &EntityId) -> Option<ServiceEntry> {
        self.inner.lock().await.get(entity).cloned()
    }

    /// Alive services advertising `capability`.
    pub async fn find_by_capability(&self, capability: &str, now: Timestamp) -> Vec<ServiceEntry> {
        self.inner
            .lock()
            .await
            .values()
            .filter(|e| e.is_alive(now) && e.capabilities.contains(capability))
            .cloned()
            .collect()
    }

    pub async fn list_all(&self) -> Vec<ServiceEntry> {
        self.inner.lock().await.values().cloned().collect()
    }

    pub async fn list_alive(&self, now: Timestamp) -> Vec<ServiceEntry> {
        self.inner
            .lock()
            .await
            .values()
            .filter(|e| e.is_alive(now))
            .cloned()
            .collect()
    }

    /// Drop entries past the stale cutoff, persisting when anything changed.
    pub async fn cleanup_stale(&self, now: Timestamp) -> Result<usize, PactError> {
        let (removed, doc) = {
            let mut inner = self.inner.lock().await;
            let before = inner.len();
            inner.retain(|_, e| !e.is_stale(now));
            (before - inner.len(), snapshot(&inner))
        };
        if removed > 0 {
            self.store.save_registry(&doc).await?;
            tracing::info!(count = removed, "cleaned up stale registry entries");
        }
        Ok(removed)
    }

    pub async fn stats(&self, now: Timestamp) -> RegistryStats {
        let inner = self.inner.lock().await;
        let total = inner.len();
        let alive = inner.values().filter(|e| e.is_alive(now)).count();
        RegistryStats {
            total,
            alive,
            stale: total - alive,
        }
    }
}

fn snapshot(inner: &BTreeMap<EntityId, ServiceEntry>) -> RegistryDocument {
    RegistryDocument {
        version: pactnet_core::constants::STORE_VERSION,
        services: inner
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    }
}
