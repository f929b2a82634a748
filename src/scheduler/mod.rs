/// 입찰 시각 조정 스케줄러
/// 1. 펄렌슈누어: 같은 그룹 입찰 시각을 충돌 구간 이상 분산
/// 2. 입찰 잠금: 입찰 직전, 먼저 끝나는 형제 아티클의 결과가 불확실하면 입찰 보류
/// 둘 다 이미 가진 인메모리 상태만으로 동기 계산한다. 잠금 시 형제 아티클 새로고침 요청만 비동기로 보낸다.
// region:    --- Imports
use crate::article::{Article, ArticleId, ArticleRegistry, EventLog};
use crate::clock::Clock;
use crate::config::TimingPolicy;
use crate::error::{CoordinatorError, Result};
use crate::group::GroupManager;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

// endregion: --- Imports

// region:    --- Modules
pub mod bid_lock;
pub mod perlenschnur;
pub mod tasks;

pub use bid_lock::{check_bid_lock, BidLockState, LockCandidate};
pub use perlenschnur::{stagger, stagger_all, StaggerCandidate, StaggeredTime};
pub use tasks::PeriodicTasks;

// endregion: --- Modules

// region:    --- Policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionPolicy {
    pub collision_window_ms: i64,
    pub min_lead_ms: i64,
}

impl Default for CollisionPolicy {
    fn default() -> Self {
        Self::from(&TimingPolicy::default())
    }
}

impl From<&TimingPolicy> for CollisionPolicy {
    fn from(timing: &TimingPolicy) -> Self {
        Self {
            collision_window_ms: timing.collision_window_ms,
            min_lead_ms: timing.min_lead_ms,
        }
    }
}

// endregion: --- Policy

// region:    --- Adjusted Bid Time
/// getAdjustedBidTime 응답
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustedBidTime {
    pub article_id: ArticleId,
    /// 즉시 구매 전용 아티클은 None
    pub end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjustment_reason: Option<String>,
}

// endregion: --- Adjusted Bid Time

// region:    --- Collision Scheduler
pub struct CollisionScheduler {
    registry: Arc<ArticleRegistry>,
    groups: Arc<GroupManager>,
    clock: Arc<dyn Clock>,
    event_log: Arc<EventLog>,
    policy: CollisionPolicy,
    refresh_tx: mpsc::UnboundedSender<ArticleId>,
}

impl CollisionScheduler {
    pub fn new(
        registry: Arc<ArticleRegistry>,
        groups: Arc<GroupManager>,
        clock: Arc<dyn Clock>,
        event_log: Arc<EventLog>,
        policy: CollisionPolicy,
        refresh_tx: mpsc::UnboundedSender<ArticleId>,
    ) -> Self {
        Self {
            registry,
            groups,
            clock,
            event_log,
            policy,
            refresh_tx,
        }
    }

    pub fn policy(&self) -> &CollisionPolicy {
        &self.policy
    }

    /// 조정된 입찰 시각
    /// 형제 아티클 종료 시각이 바뀔 수 있으므로 매번 다시 계산한다.
    pub fn adjusted_bid_time(&self, article_id: &str) -> Result<AdjustedBidTime> {
        let article = self
            .registry
            .get(article_id)
            .ok_or_else(|| CoordinatorError::UnknownArticle(article_id.to_string()))?;
        let unchanged = AdjustedBidTime {
            article_id: article.id.clone(),
            end_time: article.end_time,
            adjustment_reason: None,
        };
        let Some(end_time) = article.end_time else {
            return Ok(unchanged);
        };

        let group = article.group_name().to_string();
        if self.groups.cached_state(&group).bid_all {
            self.registry.set_adjusted_end_time(article_id, Some(end_time));
            return Ok(unchanged);
        }

        let now = self.clock.now_ms();
        let candidates: Vec<StaggerCandidate> = self
            .registry
            .group_members(&group)
            .into_iter()
            .filter(|a| is_stagger_eligible(a, now))
            .filter_map(|a| a.end_time.map(|end| StaggerCandidate::new(a.id, end)))
            .collect();

        let Some(staggered) = stagger(&candidates, article_id, now, &self.policy) else {
            self.registry.set_adjusted_end_time(article_id, Some(end_time));
            return Ok(unchanged);
        };

        let changed = self
            .registry
            .set_adjusted_end_time(article_id, Some(staggered.end_time));
        if changed {
            if let Some(reason) = &staggered.adjustment_reason {
                self.event_log.info(article_id, "Scheduler", reason.clone());
            } else if staggered.late_skip {
                self.event_log.warn(
                    article_id,
                    "Scheduler",
                    "bid time collides with a group sibling but it is too late to move it",
                );
            }
        }

        Ok(AdjustedBidTime {
            article_id: staggered.article_id,
            end_time: Some(staggered.end_time),
            adjustment_reason: staggered.adjustment_reason,
        })
    }

    /// 그룹 전체 분산 결과 (원래 시각 오름차순)
    pub fn stagger_group(&self, group: &str) -> Vec<StaggeredTime> {
        let now = self.clock.now_ms();
        let candidates: Vec<StaggerCandidate> = self
            .registry
            .group_members(group)
            .into_iter()
            .filter(|a| is_stagger_eligible(a, now))
            .filter_map(|a| a.end_time.map(|end| StaggerCandidate::new(a.id, end)))
            .collect();
        stagger_all(&candidates, now, &self.policy)
    }

    /// 입찰 잠금 검사 (입찰 확정 직전)
    /// 잠기면 아티클 로그에 이유를 남기고 차단한 형제 아티클 새로고침을 요청한다.
    pub fn bid_lock_state(&self, article_id: &str) -> Result<BidLockState> {
        let state = self.evaluate_bid_lock(article_id)?;
        if let Some(blocker) = &state.blocked_by {
            if let Some(reason) = &state.reason {
                self.event_log.info(article_id, "BidLock", reason.clone());
            }
            // 결과와 무관하게 보내고 잊는다
            if self.refresh_tx.send(blocker.clone()).is_err() {
                debug!("{:<12} --> 새로고침 채널 닫힘", "BidLock");
            }
        }
        Ok(state)
    }

    fn evaluate_bid_lock(&self, article_id: &str) -> Result<BidLockState> {
        let article = self
            .registry
            .get(article_id)
            .ok_or_else(|| CoordinatorError::UnknownArticle(article_id.to_string()))?;
        let group = article.group_name().to_string();
        if self.groups.cached_state(&group).bid_all {
            return Ok(BidLockState::unlocked());
        }

        let candidates: Vec<LockCandidate> = self
            .registry
            .group_members(&group)
            .into_iter()
            .filter(|a| a.auto_bid)
            .filter_map(|a| {
                a.end_time.map(|end_time| LockCandidate {
                    article_id: a.id,
                    end_time,
                    auction_end_state: a.auction_end_state,
                    current_price: a.current_price,
                    max_bid: a.max_bid,
                })
            })
            .collect();

        Ok(check_bid_lock(
            &candidates,
            article_id,
            self.policy.collision_window_ms,
        ))
    }
}

/// 분산 대상: 자동 입찰 활성, 종료 시각이 미래
fn is_stagger_eligible(article: &Article, now: i64) -> bool {
    article.auto_bid && article.end_time.is_some_and(|end| end > now)
}

// endregion: --- Collision Scheduler
