/// 코디네이터 에러 정의
/// 입찰 잠금(BidLocked)과 리더 충돌(ConflictingLeader)은 에러가 아니라 상태 값으로 표현한다.
// region:    --- Imports
use thiserror::Error;

// endregion: --- Imports

// region:    --- Store Error
/// 복제 저장소 에러
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("quota exceeded writing '{key}': {bytes} bytes, limit {limit}")]
    QuotaExceeded { key: String, bytes: usize, limit: usize },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

// endregion: --- Store Error

// region:    --- Coordinator Error
/// 코디네이터 에러
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("stale read of '{key}': {age_ms}ms old")]
    StaleRead { key: String, age_ms: i64 },

    #[error("execution context for article {article_id} unavailable after {attempts} attempts: {reason}")]
    ExecutionContextUnavailable {
        article_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("unknown article {0}")]
    UnknownArticle(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl CoordinatorError {
    /// HTTP 응답용 에러 코드
    pub fn code(&self) -> &'static str {
        match self {
            CoordinatorError::Store(StoreError::QuotaExceeded { .. }) => "QUOTA_EXCEEDED",
            CoordinatorError::Store(_) => "STORE_ERROR",
            CoordinatorError::StaleRead { .. } => "STALE_READ",
            CoordinatorError::ExecutionContextUnavailable { .. } => "CONTEXT_UNAVAILABLE",
            CoordinatorError::UnknownArticle(_) => "UNKNOWN_ARTICLE",
            CoordinatorError::InvalidMessage(_) => "INVALID_MESSAGE",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

// endregion: --- Coordinator Error
