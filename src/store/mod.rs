/// 복제 저장소 인터페이스
/// 모든 브라우저 인스턴스가 공유하는 결과적 일관성(eventually consistent) 키/값 저장소.
/// - 다른 인스턴스로의 전달은 보장되지만 시간 제한은 없다
/// - 인스턴스 간 read-after-write 보장 없음
/// - 원자적 test-and-set 없음
/// - 용량 제한 (초과 시 QuotaExceeded)
// region:    --- Imports
use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::broadcast;

// endregion: --- Imports

// region:    --- Modules
pub mod feed;
pub mod memory;
pub mod postgres;

pub use feed::{ChangeFeed, ChangePublisher};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

// endregion: --- Modules

// region:    --- Keys
/// 설정 레코드 키 (리더 클레임 포함)
pub const SETTINGS_KEY: &str = "SETTINGS";
/// 그룹 레코드 키
pub const GROUPS_KEY: &str = "GROUPS";

/// 아티클 레코드 키 여부
pub fn is_article_key(key: &str) -> bool {
    key != SETTINGS_KEY && key != GROUPS_KEY
}

// endregion: --- Keys

// region:    --- Change
/// 저장소 변경 알림
/// 자신이 쓴 값의 에코일 수도 있다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

// endregion: --- Change

// region:    --- Quota
/// 저장소 용량 제한 (확장 sync 저장소 제한과 동일)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreQuota {
    pub per_item_bytes: usize,
    pub total_bytes: usize,
    pub max_items: usize,
}

impl Default for StoreQuota {
    fn default() -> Self {
        Self {
            per_item_bytes: 8_192,
            total_bytes: 102_400,
            max_items: 512,
        }
    }
}

impl StoreQuota {
    /// 항목 크기 = 키 길이 + 직렬화된 값 길이
    pub fn item_size(key: &str, value: &Value) -> usize {
        key.len() + value.to_string().len()
    }

    /// `key`를 제외한 현재 사용량 (바이트, 항목 수)
    pub fn usage_excluding<'a, I>(key: &str, entries: I) -> (usize, usize)
    where
        I: IntoIterator<Item = (&'a String, &'a Value)>,
    {
        entries
            .into_iter()
            .filter(|(k, _)| k.as_str() != key)
            .fold((0, 0), |(bytes, items), (k, v)| {
                (bytes + Self::item_size(k, v), items + 1)
            })
    }

    /// 쓰기 전 검사. `existing_*`는 쓰려는 키를 제외한 현재 사용량.
    pub fn check(
        &self,
        key: &str,
        value: &Value,
        existing_bytes: usize,
        existing_items: usize,
    ) -> Result<(), StoreError> {
        let bytes = Self::item_size(key, value);
        if bytes > self.per_item_bytes {
            return Err(StoreError::QuotaExceeded {
                key: key.to_string(),
                bytes,
                limit: self.per_item_bytes,
            });
        }
        if existing_bytes + bytes > self.total_bytes {
            return Err(StoreError::QuotaExceeded {
                key: key.to_string(),
                bytes: existing_bytes + bytes,
                limit: self.total_bytes,
            });
        }
        if existing_items + 1 > self.max_items {
            return Err(StoreError::QuotaExceeded {
                key: key.to_string(),
                bytes,
                limit: self.max_items,
            });
        }
        Ok(())
    }
}

// endregion: --- Quota

// region:    --- Replicated Store Trait
/// 복제 저장소 트레이트
#[async_trait]
pub trait ReplicatedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// 전체 읽기 (윈도우 초기화, 그룹 정리용)
    async fn get_all(&self) -> Result<HashMap<String, Value>, StoreError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// 변경 알림 스트림 구독
    fn watch(&self) -> broadcast::Receiver<StoreChange>;
}

// endregion: --- Replicated Store Trait
