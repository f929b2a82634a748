/// 아티클별 이벤트 로그
/// 입찰이 불가능한 이유(차단한 형제 아티클, 리더 윈도우 등)를 아티클 단위로 남긴다.
// region:    --- Imports
use super::model::ArticleId;
use crate::clock::Clock;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{error, info, warn};

// endregion: --- Imports

const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: i64,
    pub component: String,
    pub level: LogLevel,
    pub message: String,
}

pub struct EventLog {
    clock: Arc<dyn Clock>,
    capacity: usize,
    entries: Mutex<HashMap<ArticleId, VecDeque<LogEntry>>>,
}

impl EventLog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            capacity: DEFAULT_CAPACITY,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn info(&self, article_id: &str, component: &str, message: impl Into<String>) {
        self.record(article_id, component, LogLevel::Info, message.into());
    }

    pub fn warn(&self, article_id: &str, component: &str, message: impl Into<String>) {
        self.record(article_id, component, LogLevel::Warn, message.into());
    }

    pub fn error(&self, article_id: &str, component: &str, message: impl Into<String>) {
        self.record(article_id, component, LogLevel::Error, message.into());
    }

    pub fn record(&self, article_id: &str, component: &str, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => info!("{:<12} --> [{}] {}", component, article_id, message),
            LogLevel::Warn => warn!("{:<12} --> [{}] {}", component, article_id, message),
            LogLevel::Error => error!("{:<12} --> [{}] {}", component, article_id, message),
        }

        let entry = LogEntry {
            timestamp: self.clock.now_ms(),
            component: component.to_string(),
            level,
            message,
        };
        let mut entries = self.entries.lock();
        let log = entries.entry(article_id.to_string()).or_default();
        if log.len() >= self.capacity {
            log.pop_front();
        }
        log.push_back(entry);
    }

    /// 오래된 것부터 정렬된 로그
    pub fn entries(&self, article_id: &str) -> Vec<LogEntry> {
        self.entries
            .lock()
            .get(article_id)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn forget(&self, article_id: &str) {
        self.entries.lock().remove(article_id);
    }
}
