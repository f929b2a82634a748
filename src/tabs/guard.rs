/// 반복 작업 제어
/// - RateLimiter: (작업 이름, 대상 ID)별 최소 실행 간격
/// - InFlight: 같은 대상에 대한 작업 중복 실행 방지
// region:    --- Imports
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// endregion: --- Imports

// region:    --- Rate Limiter
#[derive(Default)]
pub struct RateLimiter {
    last_run: Mutex<HashMap<(String, String), i64>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 마지막 실행 후 `min_interval_ms`가 지났으면 실행 시각을 기록하고 true
    pub fn should_run(&self, operation: &str, target: &str, min_interval_ms: i64, now: i64) -> bool {
        let mut last_run = self.last_run.lock();
        let key = (operation.to_string(), target.to_string());
        match last_run.get(&key) {
            Some(last) if now - last < min_interval_ms => false,
            _ => {
                last_run.insert(key, now);
                true
            }
        }
    }

    /// 대상의 모든 기록 삭제
    pub fn forget(&self, target: &str) {
        self.last_run.lock().retain(|(_, t), _| t != target);
    }

    pub fn targets(&self) -> HashSet<String> {
        self.last_run.lock().keys().map(|(_, t)| t.clone()).collect()
    }
}

// endregion: --- Rate Limiter

// region:    --- In Flight
#[derive(Clone, Default)]
pub struct InFlight {
    running: Arc<Mutex<HashSet<String>>>,
}

/// 드롭되면 실행 중 표시 해제
pub struct InFlightGuard {
    running: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// 이미 실행 중이면 None
    pub fn try_enter(&self, key: &str) -> Option<InFlightGuard> {
        if !self.running.lock().insert(key.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            running: Arc::clone(&self.running),
            key: key.to_string(),
        })
    }

}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.running.lock().remove(&self.key);
    }
}

// endregion: --- In Flight
