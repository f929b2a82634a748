/// 그룹 관리
/// 그룹별 자동 입찰 여부와 bid-all(낙찰 후에도 계속 입찰) 여부를 관리한다.
/// 스케줄러가 동기적으로 읽을 수 있도록 저장소 값을 캐시에 유지한다.
// region:    --- Imports
use crate::article::NO_GROUP;
use crate::clock::Clock;
use crate::error::{Result, StoreError};
use crate::store::{ReplicatedStore, StoreChange, GROUPS_KEY};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

// endregion: --- Imports

// region:    --- Group State
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupState {
    pub auto_bid: bool,
    pub bid_all: bool,
    #[serde(default)]
    pub last_modified: i64,
}

fn normalize(name: Option<&str>) -> String {
    match name.map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => NO_GROUP.to_string(),
    }
}

// endregion: --- Group State

// region:    --- Group Manager
pub struct GroupManager {
    store: Arc<dyn ReplicatedStore>,
    clock: Arc<dyn Clock>,
    retention_ms: i64,
    cache: RwLock<HashMap<String, GroupState>>,
}

impl GroupManager {
    pub fn new(store: Arc<dyn ReplicatedStore>, clock: Arc<dyn Clock>, retention_ms: i64) -> Self {
        Self {
            store,
            clock,
            retention_ms,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// 전체 그룹 조회 (저장소 기준, 캐시 갱신)
    pub async fn get_all(&self) -> Result<HashMap<String, GroupState>> {
        let groups = match self.store.get(GROUPS_KEY).await? {
            Some(value) => parse_groups(value),
            None => HashMap::new(),
        };
        *self.cache.write() = groups.clone();
        Ok(groups)
    }

    /// 그룹 상태 조회. 이름이 없으면 예약 이름을 쓴다.
    pub async fn get_state(&self, name: Option<&str>) -> Result<GroupState> {
        let name = normalize(name);
        Ok(self.get_all().await?.get(&name).copied().unwrap_or_default())
    }

    /// 캐시된 그룹 상태 (동기)
    pub fn cached_state(&self, name: &str) -> GroupState {
        self.cache.read().get(name).copied().unwrap_or_default()
    }

    /// 그룹 상태 변경. 값이 같으면 쓰지 않는다.
    pub async fn set_state(&self, name: Option<&str>, auto_bid: bool, bid_all: bool) -> Result<bool> {
        let name = normalize(name);
        let mut groups = self.get_all().await?;
        if let Some(existing) = groups.get(&name) {
            if existing.auto_bid == auto_bid && existing.bid_all == bid_all {
                debug!("{:<12} --> {} 변경 없음", "Group", name);
                return Ok(false);
            }
        }

        groups.insert(
            name.clone(),
            GroupState {
                auto_bid,
                bid_all,
                last_modified: self.clock.now_ms(),
            },
        );
        self.write(groups).await?;
        info!(
            "{:<12} --> {} autoBid={} bidAll={}",
            "Group", name, auto_bid, bid_all
        );
        Ok(true)
    }

    pub async fn toggle_auto_bid(&self, name: Option<&str>) -> Result<GroupState> {
        let current = self.get_state(name).await?;
        self.set_state(name, !current.auto_bid, current.bid_all).await?;
        self.get_state(name).await
    }

    pub async fn toggle_bid_all(&self, name: Option<&str>) -> Result<GroupState> {
        let current = self.get_state(name).await?;
        self.set_state(name, current.auto_bid, !current.bid_all).await?;
        self.get_state(name).await
    }

    /// 처음 쓰이는 그룹 이름이면 기본값으로 생성
    pub async fn ensure(&self, name: &str) -> Result<bool> {
        let name = normalize(Some(name));
        let mut groups = self.get_all().await?;
        if groups.contains_key(&name) {
            return Ok(false);
        }
        groups.insert(
            name.clone(),
            GroupState {
                last_modified: self.clock.now_ms(),
                ..GroupState::default()
            },
        );
        self.write(groups).await?;
        info!("{:<12} --> 그룹 생성: {}", "Group", name);
        Ok(true)
    }

    /// 사용되지 않고 보존 기간이 지난 그룹 삭제
    /// 윈도우 초기화 때 한 번만 실행한다.
    pub async fn remove_unused(&self, in_use: &HashSet<String>) -> Result<Vec<String>> {
        let now = self.clock.now_ms();
        let mut groups = self.get_all().await?;
        let mut removed: Vec<String> = groups
            .iter()
            .filter(|(name, state)| {
                name.as_str() != NO_GROUP
                    && !in_use.contains(name.as_str())
                    && now - state.last_modified > self.retention_ms
            })
            .map(|(name, _)| name.clone())
            .collect();
        removed.sort();

        if removed.is_empty() {
            return Ok(removed);
        }
        for name in &removed {
            groups.remove(name);
        }
        self.write(groups).await?;
        info!("{:<12} --> 미사용 그룹 삭제: {:?}", "Group", removed);
        Ok(removed)
    }

    /// 원격 변경 반영
    pub fn apply_remote(&self, change: &StoreChange) {
        if change.key != GROUPS_KEY {
            return;
        }
        let groups = change.new_value.clone().map(parse_groups).unwrap_or_default();
        *self.cache.write() = groups;
    }

    async fn write(&self, groups: HashMap<String, GroupState>) -> Result<()> {
        let value = serde_json::to_value(&groups).map_err(StoreError::from)?;
        self.store.set(GROUPS_KEY, value).await?;
        *self.cache.write() = groups;
        Ok(())
    }
}

fn parse_groups(value: Value) -> HashMap<String, GroupState> {
    match serde_json::from_value(value) {
        Ok(groups) => groups,
        Err(e) => {
            warn!("{:<12} --> 그룹 레코드 파싱 실패: {}", "Group", e);
            HashMap::new()
        }
    }
}

// endregion: --- Group Manager
