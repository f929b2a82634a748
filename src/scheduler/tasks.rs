/// 주기 작업 관리
/// 데드맨 스위치, 탭 스윕 같은 주기 작업을 이름과 간격을 붙여 실행하고
/// 윈도우 종료 시 한 번에 취소한다.
// region:    --- Imports
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// endregion: --- Imports

// region:    --- Periodic Tasks
pub struct PeriodicTasks {
    cancel: CancellationToken,
    handles: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Default for PeriodicTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl PeriodicTasks {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// 종료 시 함께 취소되는 토큰 (일회성 타이머용)
    pub fn token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// 주기 작업 시작. 첫 실행은 즉시.
    pub fn spawn<F, Fut>(&self, name: &'static str, period: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => task().await,
                }
            }
            debug!("{:<12} --> {} 종료", "Tasks", name);
        });
        info!("{:<12} --> {} 시작 (간격 {:?})", "Tasks", name, period);
        self.handles.lock().push((name, handle));
    }

    /// 지연 후 한 번 실행. 종료되면 실행하지 않는다.
    pub fn spawn_after<Fut>(&self, delay: Duration, task: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => task.await,
            }
        });
    }

    /// 모든 작업 취소 후 종료 대기
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for (name, handle) in handles {
            if let Err(e) = handle.await {
                debug!("{:<12} --> {} join 실패: {}", "Tasks", name, e);
            }
        }
    }
}

// endregion: --- Periodic Tasks
