//! Per-run, cache-through handles giving steps typed access to prior
//! outputs and run-scoped state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::store::{Store, StoreError};

/// Errors from accessor operations: either the backing store failed, or the
/// cached/loaded bytes didn't deserialize into the requested type.
#[derive(Debug, thiserror::Error)]
pub enum AccessorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to deserialize value: {0}")]
    Deserialize(#[from] serde_json::Error),
}

/// Read access to prior steps' recorded inputs and outputs, cache-through
/// over the store. One instance per run; never shared across runs.
pub struct DataAccessor {
    store: Arc<dyn Store>,
    run_id: Uuid,
    output_cache: RwLock<HashMap<String, Vec<u8>>>,
    input_cache: RwLock<HashMap<String, Vec<u8>>>,
}

impl DataAccessor {
    pub fn new(store: Arc<dyn Store>, run_id: Uuid) -> Self {
        Self {
            store,
            run_id,
            output_cache: RwLock::new(HashMap::new()),
            input_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Load and deserialize the stored output of `step_id`.
    pub async fn get_output<T: DeserializeOwned>(&self, step_id: &str) -> Result<T, AccessorError> {
        let bytes = self.output_bytes(step_id).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Load and deserialize the recorded input of `step_id`.
    pub async fn get_input<T: DeserializeOwned>(&self, step_id: &str) -> Result<T, AccessorError> {
        if let Some(cached) = self.input_cache.read().get(step_id).cloned() {
            return Ok(serde_json::from_slice(&cached)?);
        }
        let execution = self.store.get_step_execution(self.run_id, step_id).await?;
        self.input_cache.write().insert(step_id.to_string(), execution.input.clone());
        Ok(serde_json::from_slice(&execution.input)?)
    }

    /// True iff a stored output exists for `step_id` (cache or store), without deserializing.
    pub async fn has_output(&self, step_id: &str) -> bool {
        if self.output_cache.read().contains_key(step_id) {
            return true;
        }
        match self.store.load_step_output(self.run_id, step_id).await {
            Ok(bytes) => {
                self.output_cache.write().insert(step_id.to_string(), bytes);
                true
            }
            Err(_) => false,
        }
    }

    async fn output_bytes(&self, step_id: &str) -> Result<Vec<u8>, AccessorError> {
        if let Some(cached) = self.output_cache.read().get(step_id).cloned() {
            return Ok(cached);
        }
        let bytes = self.store.load_step_output(self.run_id, step_id).await?;
        self.output_cache.write().insert(step_id.to_string(), bytes.clone());
        Ok(bytes)
    }
}

/// Read/write access to a run's user-visible state KV, cache-through over
/// the store. Writes update the cache only after the store call succeeds.
pub struct StateAccessor {
    store: Arc<dyn Store>,
    run_id: Uuid,
    cache: RwLock<HashMap<String, Vec<u8>>>,
}

impl StateAccessor {
    pub fn new(store: Arc<dyn Store>, run_id: Uuid) -> Self {
        Self { store, run_id, cache: RwLock::new(HashMap::new()) }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), AccessorError> {
        let bytes = serde_json::to_vec(value)?;
        self.store.set_state(self.run_id, key, bytes.clone()).await?;
        self.cache.write().insert(key.to_string(), bytes);
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, AccessorError> {
        if let Some(cached) = self.cache.read().get(key).cloned() {
            return Ok(serde_json::from_slice(&cached)?);
        }
        let bytes = self.store.get_state(self.run_id, key).await?;
        self.cache.write().insert(key.to_string(), bytes.clone());
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn delete(&self, key: &str) -> Result<(), AccessorError> {
        self.store.delete_state(self.run_id, key).await?;
        self.cache.write().remove(key);
        Ok(())
    }

    pub async fn has(&self, key: &str) -> bool {
        if self.cache.read().contains_key(key) {
            return true;
        }
        self.store.get_state(self.run_id, key).await.is_ok()
    }

    /// Load every (key -> bytes) pair from the store, refreshing the cache.
    pub async fn get_all(&self) -> Result<HashMap<String, Vec<u8>>, AccessorError> {
        let all = self.store.get_all_state(self.run_id).await?;
        let mut cache = self.cache.write();
        for (k, v) in &all {
            cache.insert(k.clone(), v.clone());
        }
        Ok(all.into_iter().collect())
    }
}
