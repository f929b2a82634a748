/// 복제 저장소용 Postgres 연결 풀
// region:    --- Imports
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::info;

// endregion: --- Imports

const MAX_CONNECTIONS: u32 = 5;

pub type StoreTx<'t> = Transaction<'t, Postgres>;

pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    /// 연결 풀 생성
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        info!("{:<12} --> 연결 풀 생성: max={}", "Database", MAX_CONNECTIONS);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 클로저가 Err를 반환하면 롤백
    pub async fn transaction<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: for<'c> FnOnce(
            &'c mut StoreTx<'_>,
        ) -> Pin<Box<dyn Future<Output = Result<R, E>> + Send + 'c>>,
        E: From<sqlx::Error>,
    {
        let mut tx = self.pool.begin().await?;
        match f(&mut tx).await {
            Ok(r) => {
                tx.commit().await?;
                Ok(r)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    /// replicated_store 테이블 생성 (이미 있으면 그대로)
    pub async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        let statements = include_str!("../../sql/01-create-schema.sql")
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty());
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("{:<12} --> 스키마 초기화 완료", "Database");
        Ok(())
    }
}
