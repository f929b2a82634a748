/// Postgres 기반 복제 저장소
/// 쓰기는 트랜잭션으로 이전 값을 읽고 덮어쓴 뒤 Kafka로 변경 알림을 발행한다.
/// 알림은 컨슈머를 거쳐 돌아오므로 자신이 쓴 변경도 에코로 다시 받는다.
// region:    --- Imports
use super::{ChangeFeed, ReplicatedStore, StoreChange, StoreQuota};
use crate::database::DatabaseManager;
use crate::error::StoreError;
use crate::message_broker::KafkaConsumer;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

// endregion: --- Imports

// region:    --- Queries
const SELECT_VALUE: &str = "SELECT value FROM replicated_store WHERE key = $1";

const SELECT_VALUE_FOR_UPDATE: &str =
    "SELECT value FROM replicated_store WHERE key = $1 FOR UPDATE";

const SELECT_ALL: &str = "SELECT key, value FROM replicated_store";

const SELECT_OTHERS: &str = "SELECT key, value FROM replicated_store WHERE key <> $1";

const UPSERT_VALUE: &str = r#"
    INSERT INTO replicated_store (key, value, updated_at)
    VALUES ($1, $2, $3)
    ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
"#;

const DELETE_VALUE: &str = "DELETE FROM replicated_store WHERE key = $1 RETURNING value";

// endregion: --- Queries

// region:    --- Postgres Store
pub struct PostgresStore {
    db: Arc<DatabaseManager>,
    feed: ChangeFeed,
    quota: StoreQuota,
}

impl PostgresStore {
    pub fn new(db: Arc<DatabaseManager>, feed: ChangeFeed) -> Self {
        Self {
            db,
            feed,
            quota: StoreQuota::default(),
        }
    }

    /// Kafka 변경 알림을 watch 스트림으로 연결
    pub fn start_change_feed(&self, consumer: Arc<KafkaConsumer>) {
        let changes = self.feed.sender();
        tokio::spawn(async move {
            let result = consumer
                .consume_changes(move |change| {
                    let _ = changes.send(change);
                })
                .await;
            if let Err(e) = result {
                error!("{:<12} --> 변경 알림 소비 중단: {}", "PgStore", e);
            }
        });
        info!("{:<12} --> 변경 알림 피드 시작", "PgStore");
    }
}

#[async_trait]
impl ReplicatedStore for PostgresStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let value = sqlx::query_scalar::<_, Value>(SELECT_VALUE)
            .bind(key)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(value)
    }

    async fn get_all(&self) -> Result<HashMap<String, Value>, StoreError> {
        let rows: Vec<(String, Value)> = sqlx::query_as(SELECT_ALL)
            .fetch_all(self.db.pool())
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let quota = self.quota;
        let key_owned = key.to_string();
        let new_value = value.clone();
        // 용량 확인과 덮어쓰기를 한 트랜잭션에서 처리
        let old_value: Option<Value> = self
            .db
            .transaction(|tx| {
                Box::pin(async move {
                    // 메모리 저장소와 같은 방식(직렬화 바이트)으로 사용량 계산
                    let others: Vec<(String, Value)> = sqlx::query_as(SELECT_OTHERS)
                        .bind(&key_owned)
                        .fetch_all(&mut **tx)
                        .await?;
                    let (bytes, items) = StoreQuota::usage_excluding(
                        &key_owned,
                        others.iter().map(|(k, v)| (k, v)),
                    );
                    quota.check(&key_owned, &new_value, bytes, items)?;
                    let old = sqlx::query_scalar::<_, Value>(SELECT_VALUE_FOR_UPDATE)
                        .bind(&key_owned)
                        .fetch_optional(&mut **tx)
                        .await?;
                    sqlx::query(UPSERT_VALUE)
                        .bind(&key_owned)
                        .bind(&new_value)
                        .bind(Utc::now())
                        .execute(&mut **tx)
                        .await?;
                    Ok::<_, StoreError>(old)
                })
            })
            .await?;

        if old_value.as_ref() == Some(&value) {
            return Ok(());
        }
        self.feed
            .announce(StoreChange {
                key: key.to_string(),
                old_value,
                new_value: Some(value),
            })
            .await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let old_value = sqlx::query_scalar::<_, Value>(DELETE_VALUE)
            .bind(key)
            .fetch_optional(self.db.pool())
            .await?;
        if old_value.is_none() {
            return Ok(());
        }
        self.feed
            .announce(StoreChange {
                key: key.to_string(),
                old_value,
                new_value: None,
            })
            .await;
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<StoreChange> {
        self.feed.subscribe()
    }
}

// endregion: --- Postgres Store
