/// 인메모리 복제 저장소
/// 하나의 인스턴스를 여러 코디네이터(윈도우)가 공유한다.
// region:    --- Imports
use super::{ReplicatedStore, StoreChange, StoreQuota};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

// endregion: --- Imports

// region:    --- Memory Store
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Value>>>,
    changes: broadcast::Sender<StoreChange>,
    quota: StoreQuota,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_quota(StoreQuota::default())
    }

    pub fn with_quota(quota: StoreQuota) -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            changes,
            quota,
        }
    }

    fn notify(&self, change: StoreChange) {
        // 구독자가 없으면 전송 실패는 무시
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl ReplicatedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn get_all(&self) -> Result<HashMap<String, Value>, StoreError> {
        Ok(self.entries.lock().clone())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let old_value = {
            let mut entries = self.entries.lock();
            let (existing_bytes, existing_items) =
                StoreQuota::usage_excluding(key, entries.iter());
            self.quota
                .check(key, &value, existing_bytes, existing_items)?;

            if entries.get(key) == Some(&value) {
                return Ok(());
            }
            entries.insert(key.to_string(), value.clone())
        };

        debug!("{:<12} --> set key={}", "MemoryStore", key);
        self.notify(StoreChange {
            key: key.to_string(),
            old_value,
            new_value: Some(value),
        });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let old_value = self.entries.lock().remove(key);
        if old_value.is_some() {
            debug!("{:<12} --> remove key={}", "MemoryStore", key);
            self.notify(StoreChange {
                key: key.to_string(),
                old_value,
                new_value: None,
            });
        }
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

// endregion: --- Memory Store
