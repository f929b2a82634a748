/// 자동 입찰 리더 선출
/// 결과적 일관성 저장소 위에서는 진짜 분산 락이 불가능하다.
/// 잠깐의 이중 리더 구간은 허용하고, 입찰 잠금과 데드맨 스위치로 보완한다.
///
/// - 로컬 상태 {enabled, simulating}: 이 윈도우 전용 (복제되지 않음)
/// - 공유 클레임 SETTINGS.autoBid {ownerId, enabled, timestamp}: 클레임을 가진 윈도우만 쓴다
/// - 클레임은 갱신 없이 ttl이 지나면 만료된다
// region:    --- Imports
use crate::clock::Clock;
use crate::error::{CoordinatorError, Result, StoreError};
use crate::store::{ReplicatedStore, StoreChange, SETTINGS_KEY};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

// endregion: --- Imports

const CLAIM_FIELD: &str = "autoBid";

// region:    --- Identity
/// 윈도우 식별자 = 설치 ID + 윈도우 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowIdentity {
    pub install_id: String,
    pub window_id: String,
}

impl WindowIdentity {
    pub fn new(install_id: impl Into<String>, window_id: impl Into<String>) -> Self {
        Self {
            install_id: install_id.into(),
            window_id: window_id.into(),
        }
    }

    pub fn owner_id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for WindowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.install_id, self.window_id)
    }
}

// endregion: --- Identity

// region:    --- Claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderClaim {
    pub owner_id: String,
    pub enabled: bool,
    pub timestamp: i64,
}

impl LeaderClaim {
    pub fn age_ms(&self, now: i64) -> i64 {
        now - self.timestamp
    }

    pub fn is_expired(&self, now: i64, ttl_ms: i64) -> bool {
        self.age_ms(now) > ttl_ms
    }
}

/// 윈도우 자동 입찰 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoBidState {
    pub enabled: bool,
    pub simulating: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_owner_id: Option<String>,
}

/// 클레임 변경 알림 분류 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimSignal {
    /// 클레임 키가 아님
    Ignored,
    /// 자신이 쓴 값의 에코
    Echo,
    /// 다른 윈도우가 리더가 됨
    ForeignLeader { owner_id: String, demoted: bool },
    /// 비활성 또는 만료된 외부 클레임
    Inactive,
    /// 클레임 삭제
    Released,
}

#[derive(Debug, Default)]
struct LocalState {
    enabled: bool,
    simulating: bool,
    initialized: bool,
}

// endregion: --- Claim

// region:    --- Leader Election
pub struct LeaderElection {
    store: Arc<dyn ReplicatedStore>,
    clock: Arc<dyn Clock>,
    identity: WindowIdentity,
    ttl_ms: i64,
    local: Mutex<LocalState>,
    /// 마지막으로 쓴 클레임의 정규화된 직렬화 값 (에코 판별용)
    last_written: Mutex<Option<String>>,
}

impl LeaderElection {
    pub fn new(
        store: Arc<dyn ReplicatedStore>,
        clock: Arc<dyn Clock>,
        identity: WindowIdentity,
        ttl_ms: i64,
    ) -> Self {
        Self {
            store,
            clock,
            identity,
            ttl_ms,
            local: Mutex::new(LocalState::default()),
            last_written: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &WindowIdentity {
        &self.identity
    }

    /// 현재 상태 조회
    /// 다른 윈도우의 유효한 클레임이 있으면 로컬 리더를 해제한다 (시뮬레이션 제외).
    pub async fn get_state(&self) -> Result<AutoBidState> {
        let now = self.clock.now_ms();
        let claim = match self.read_claim().await? {
            Some(claim) => self.check_fresh(claim, now).ok(),
            None => None,
        };
        let me = self.identity.owner_id();

        let mut local = self.local.lock();
        if !local.initialized {
            if let Some(claim) = &claim {
                local.enabled = claim.enabled;
                debug!(
                    "{:<12} --> 공유 클레임으로 로컬 상태 초기화 (owner={})",
                    "Leader", claim.owner_id
                );
            }
            local.initialized = true;
        }

        let mut conflicting_owner_id = None;
        if let Some(claim) = claim {
            if claim.owner_id != me && claim.enabled {
                if !local.simulating && local.enabled {
                    info!(
                        "{:<12} --> 윈도우 {} 가 자동 입찰 리더, 로컬 해제",
                        "Leader", claim.owner_id
                    );
                    local.enabled = false;
                }
                conflicting_owner_id = Some(claim.owner_id);
            }
        }

        Ok(AutoBidState {
            enabled: local.enabled,
            simulating: local.simulating,
            conflicting_owner_id,
        })
    }

    /// 상태 변경
    /// 시뮬레이션이 아닐 때, 또는 해제할 때만 공유 클레임을 쓴다.
    pub async fn set_state(&self, enabled: bool, simulating: bool) -> Result<AutoBidState> {
        {
            let mut local = self.local.lock();
            local.enabled = enabled;
            local.simulating = simulating;
            local.initialized = true;
        }

        let now = self.clock.now_ms();
        let me = self.identity.owner_id();
        if enabled && !simulating {
            self.write_claim(LeaderClaim {
                owner_id: me,
                enabled: true,
                timestamp: now,
            })
            .await?;
            info!("{:<12} --> 자동 입찰 리더 획득", "Leader");
        } else if !enabled {
            // 다른 윈도우의 클레임은 건드리지 않는다
            let owned_or_absent = match self.read_claim().await? {
                Some(claim) => claim.owner_id == me,
                None => true,
            };
            if owned_or_absent {
                self.write_claim(LeaderClaim {
                    owner_id: me,
                    enabled: false,
                    timestamp: now,
                })
                .await?;
                info!("{:<12} --> 자동 입찰 리더 해제", "Leader");
            }
        }

        let state = self.local.lock();
        Ok(AutoBidState {
            enabled: state.enabled,
            simulating: state.simulating,
            conflicting_owner_id: None,
        })
    }

    pub async fn toggle_state(&self) -> Result<AutoBidState> {
        let current = self.get_state().await?;
        self.set_state(!current.enabled, current.simulating).await
    }

    /// 데드맨 스위치: 리더이면 클레임 타임스탬프 갱신
    pub async fn renew(&self) -> Result<bool> {
        let state = self.get_state().await?;
        if !state.enabled || state.simulating {
            return Ok(false);
        }
        self.write_claim(LeaderClaim {
            owner_id: self.identity.owner_id(),
            enabled: true,
            timestamp: self.clock.now_ms(),
        })
        .await?;
        debug!("{:<12} --> 클레임 갱신", "Leader");
        Ok(true)
    }

    /// 데드맨 스위치: 만료된 클레임 삭제 (리더 윈도우 비정상 종료 복구)
    pub async fn expire_stale(&self) -> Result<bool> {
        let now = self.clock.now_ms();
        let Some(claim) = self.read_claim().await? else {
            return Ok(false);
        };
        match self.check_fresh(claim, now) {
            Ok(_) => Ok(false),
            Err(e) => {
                warn!("{:<12} --> 만료된 클레임 삭제: {}", "Leader", e);
                self.clear_claim().await?;
                Ok(true)
            }
        }
    }

    /// 윈도우 종료 시 자신의 클레임 삭제 (비정상 종료 시에는 데드맨 스위치가 처리)
    pub async fn on_window_close(&self) -> Result<bool> {
        match self.read_claim().await? {
            Some(claim) if claim.owner_id == self.identity.owner_id() => {
                self.clear_claim().await?;
                info!("{:<12} --> 윈도우 종료, 클레임 삭제", "Leader");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// 클레임 변경 알림 처리
    /// 자신이 마지막으로 쓴 값이거나 소유자가 자신이면 에코로 본다.
    pub fn on_store_change(&self, change: &StoreChange) -> ClaimSignal {
        if change.key != SETTINGS_KEY {
            return ClaimSignal::Ignored;
        }
        let Some(new_claim) = change
            .new_value
            .as_ref()
            .and_then(|v| v.get(CLAIM_FIELD))
            .filter(|v| !v.is_null())
        else {
            return ClaimSignal::Released;
        };

        if self.last_written.lock().as_deref() == Some(canonical_json(new_claim).as_str()) {
            return ClaimSignal::Echo;
        }
        let claim: LeaderClaim = match serde_json::from_value(new_claim.clone()) {
            Ok(claim) => claim,
            Err(e) => {
                warn!("{:<12} --> 클레임 파싱 실패: {}", "Leader", e);
                return ClaimSignal::Ignored;
            }
        };
        if claim.owner_id == self.identity.owner_id() {
            return ClaimSignal::Echo;
        }
        if !claim.enabled || claim.is_expired(self.clock.now_ms(), self.ttl_ms) {
            return ClaimSignal::Inactive;
        }

        let mut local = self.local.lock();
        let demoted = local.enabled && !local.simulating;
        if demoted {
            local.enabled = false;
            info!(
                "{:<12} --> 윈도우 {} 가 리더가 되어 로컬 해제",
                "Leader", claim.owner_id
            );
        }
        ClaimSignal::ForeignLeader {
            owner_id: claim.owner_id,
            demoted,
        }
    }

    /// 공유 클레임 읽기
    pub async fn read_claim(&self) -> Result<Option<LeaderClaim>> {
        let settings = self.store.get(SETTINGS_KEY).await?;
        let claim = settings
            .as_ref()
            .and_then(|v| v.get(CLAIM_FIELD))
            .filter(|v| !v.is_null())
            .cloned();
        match claim {
            Some(value) => Ok(Some(
                serde_json::from_value(value).map_err(StoreError::from)?,
            )),
            None => Ok(None),
        }
    }

    fn check_fresh(&self, claim: LeaderClaim, now: i64) -> Result<LeaderClaim> {
        if claim.is_expired(now, self.ttl_ms) {
            return Err(CoordinatorError::StaleRead {
                key: SETTINGS_KEY.to_string(),
                age_ms: claim.age_ms(now),
            });
        }
        Ok(claim)
    }

    async fn settings_map(&self) -> Result<Map<String, Value>> {
        Ok(match self.store.get(SETTINGS_KEY).await? {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        })
    }

    // 설정 레코드의 다른 필드는 유지한다
    async fn write_claim(&self, claim: LeaderClaim) -> Result<()> {
        let claim_value = serde_json::to_value(&claim).map_err(StoreError::from)?;
        let mut settings = self.settings_map().await?;
        *self.last_written.lock() = Some(canonical_json(&claim_value));
        settings.insert(CLAIM_FIELD.to_string(), claim_value);
        self.store.set(SETTINGS_KEY, Value::Object(settings)).await?;
        Ok(())
    }

    async fn clear_claim(&self) -> Result<()> {
        let mut settings = self.settings_map().await?;
        settings.remove(CLAIM_FIELD);
        if settings.is_empty() {
            self.store.remove(SETTINGS_KEY).await?;
        } else {
            self.store.set(SETTINGS_KEY, Value::Object(settings)).await?;
        }
        Ok(())
    }
}

/// 키 순서와 무관한 직렬화
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

// endregion: --- Leader Election
