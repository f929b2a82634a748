/// 설정
/// 환경 변수에서 읽고, 없으면 기본값을 사용한다.
// region:    --- Imports
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Timing Policy
/// 타이밍 정책
/// 10초 충돌 구간은 도출된 값이 아니라 정책 값이므로 재정의할 수 있다.
#[derive(Debug, Clone)]
pub struct TimingPolicy {
    /// 같은 그룹 내 두 입찰 사이의 최소 간격
    pub collision_window_ms: i64,
    /// 조정된 시각이 지금부터 이보다 가까우면 이동하지 않는다
    pub min_lead_ms: i64,
    /// 리더 클레임 만료 시간
    pub claim_ttl_ms: i64,
    pub renewal_interval: Duration,
    pub expiry_sweep_interval: Duration,
    pub tab_sweep_interval: Duration,
    /// 탭 스케줄링 대상이 되는 종료 전 구간
    pub tab_lookahead_ms: i64,
    /// 조정된 종료 시각 기준 탭을 여는 시점
    pub open_before_ms: i64,
    /// 경매 결과 확인 후 탭을 닫기까지 대기
    pub close_delay_ms: i64,
    pub group_retention_ms: i64,
    pub reload_min_interval_ms: i64,
    /// 카운트다운 갱신이 이 시간 이상 없으면 멈춘 것으로 본다
    pub stale_countdown_ms: i64,
    pub refresh_min_interval_ms: i64,
    pub max_open_attempts: u32,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            collision_window_ms: 10_000,
            min_lead_ms: 5_000,
            claim_ttl_ms: 300_000,
            renewal_interval: Duration::from_secs(60),
            expiry_sweep_interval: Duration::from_secs(60),
            tab_sweep_interval: Duration::from_secs(30),
            tab_lookahead_ms: 90_000,
            open_before_ms: 60_000,
            close_delay_ms: 10_000,
            group_retention_ms: 5 * 24 * 60 * 60 * 1000,
            reload_min_interval_ms: 60_000,
            stale_countdown_ms: 60_000,
            refresh_min_interval_ms: 2_000,
            max_open_attempts: 3,
        }
    }
}

// endregion: --- Timing Policy

// region:    --- Config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// 프로세스 설정
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub kafka_brokers: String,
    pub bind_addr: String,
    pub tab_host_url: String,
    pub install_id: String,
    pub window_id: String,
    pub store_backend: StoreBackend,
    pub timing: TimingPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            kafka_brokers: "localhost:9092".to_string(),
            bind_addr: "127.0.0.1:3000".to_string(),
            tab_host_url: "http://127.0.0.1:9222".to_string(),
            install_id: Uuid::new_v4().to_string(),
            window_id: Uuid::new_v4().to_string(),
            store_backend: StoreBackend::Memory,
            timing: TimingPolicy::default(),
        }
    }
}

impl Config {
    /// 환경 변수로부터 설정 생성
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut timing = TimingPolicy::default();
        timing.collision_window_ms = env_i64("COLLISION_WINDOW_MS", timing.collision_window_ms);
        timing.min_lead_ms = env_i64("MIN_LEAD_MS", timing.min_lead_ms);
        timing.claim_ttl_ms = env_i64("CLAIM_TTL_MS", timing.claim_ttl_ms);

        let store_backend = match std::env::var("STORE_BACKEND").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            Ok("postgres") | Err(_) => StoreBackend::Postgres,
            Ok(other) => {
                warn!(
                    "{:<12} --> 알 수 없는 STORE_BACKEND '{}', postgres 사용",
                    "Config", other
                );
                StoreBackend::Postgres
            }
        };

        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            kafka_brokers: std::env::var("KAFKA_BROKERS").unwrap_or(defaults.kafka_brokers),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            tab_host_url: std::env::var("TAB_HOST_URL").unwrap_or(defaults.tab_host_url),
            install_id: std::env::var("INSTALL_ID").unwrap_or(defaults.install_id),
            window_id: std::env::var("WINDOW_ID").unwrap_or(defaults.window_id),
            store_backend,
            timing,
        }
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(
                "{:<12} --> {} 값 '{}' 파싱 실패, 기본값 {} 사용",
                "Config", name, raw, default
            );
            default
        }),
        Err(_) => default,
    }
}

// endregion: --- Config
