#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use snipe_coordinator::article::{ArticleObservation, Price};
use snipe_coordinator::clock::ManualClock;
use snipe_coordinator::config::{Config, StoreBackend, TimingPolicy};
use snipe_coordinator::coordinator::Coordinator;
use snipe_coordinator::store::MemoryStore;
use snipe_coordinator::tabs::ExecutionContext;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

pub const NOW: i64 = 1_000_000;

static INIT: Once = Once::new();

/// 트레이싱 초기화 (테스트 바이너리당 한 번)
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .without_time()
            .with_target(false)
            .with_test_writer()
            .try_init();
    });
}

/// 호출 기록만 남기는 실행 컨텍스트
#[derive(Default)]
pub struct FakeContexts {
    pub calls: Mutex<Vec<String>>,
    next_id: AtomicU32,
    failing_opens: AtomicU32,
    /// None이면 사용자 활성 여부 조회 실패
    pub user_active: Mutex<Option<bool>>,
}

impl FakeContexts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            user_active: Mutex::new(Some(false)),
            ..Default::default()
        })
    }

    /// 다음 `count`번의 열기 요청을 실패시킨다
    pub fn fail_next_opens(&self, count: u32) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    pub fn set_user_active(&self, active: Option<bool>) {
        *self.user_active.lock() = active;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl ExecutionContext for FakeContexts {
    async fn open(&self, article_id: &str) -> Result<String, String> {
        self.calls.lock().push(format!("open:{}", article_id));
        let remaining = self.failing_opens.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_opens.store(remaining - 1, Ordering::SeqCst);
            return Err("tab host unreachable".to_string());
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("ctx-{}", n))
    }

    async fn close(&self, context_id: &str) -> Result<(), String> {
        self.calls.lock().push(format!("close:{}", context_id));
        Ok(())
    }

    async fn reload(&self, context_id: &str) -> Result<(), String> {
        self.calls.lock().push(format!("reload:{}", context_id));
        Ok(())
    }

    async fn request_refresh(&self, context_id: &str) -> Result<(), String> {
        self.calls.lock().push(format!("refresh:{}", context_id));
        Ok(())
    }

    async fn is_user_active(&self, context_id: &str) -> Result<bool, String> {
        self.calls.lock().push(format!("active:{}", context_id));
        let active = *self.user_active.lock();
        active.ok_or_else(|| "tab not responding".to_string())
    }
}

pub fn test_config(window_id: &str) -> Config {
    Config {
        database_url: None,
        kafka_brokers: "localhost:9092".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        tab_host_url: "http://127.0.0.1:9".to_string(),
        install_id: "install".to_string(),
        window_id: window_id.to_string(),
        store_backend: StoreBackend::Memory,
        timing: TimingPolicy::default(),
    }
}

pub struct Window {
    pub coordinator: Arc<Coordinator>,
    pub contexts: Arc<FakeContexts>,
}

/// 같은 저장소와 시계를 쓰는 윈도우 생성
pub async fn open_window(store: &MemoryStore, clock: &ManualClock, window_id: &str) -> Window {
    let contexts = FakeContexts::new();
    let coordinator = Coordinator::new(
        test_config(window_id),
        Arc::new(store.clone()),
        contexts.clone(),
        Arc::new(clock.clone()),
    );
    coordinator.init().await.expect("초기화 실패");
    Window {
        coordinator,
        contexts,
    }
}

pub fn eur(amount: i64) -> Price {
    Price::new(amount, "EUR")
}

/// 자동 입찰 대상 아티클 관찰 결과
pub fn auto_bid_article(id: &str, group: &str, end_time: i64) -> ArticleObservation {
    ArticleObservation {
        end_time: Some(end_time),
        current_price: Some(eur(1_000)),
        max_bid: Some(eur(5_000)),
        auto_bid: Some(true),
        group: Some(group.to_string()),
        ..ArticleObservation::new(id)
    }
}

/// 조건이 참이 될 때까지 대기 (최대 2초)
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
