/// 탭(실행 컨텍스트) 수명 관리
/// 입찰 판단 자체는 하지 않고, 입찰 시점에 살아있는 실행 컨텍스트가 있도록 보장한다.
/// - 조정된 종료 시각 60초 전에 탭 열기 (이미 그 안이면 즉시)
/// - 열린 탭 재사용, 카운트다운이 멈춘 탭은 새로고침
/// - 경매 결과 확인 10초 후 탭 닫기 (사용자가 보고 있으면 유지)
/// 예약된 타이머는 취소하지 않고, 실행 시점에 조건을 다시 검사한다.
/// 입찰 잠금은 열린 탭이 입찰 직전에 확인하므로 탭 열기를 막지 않는다.
// region:    --- Imports
use crate::article::{
    Article, ArticleId, ArticleRegistry, AuctionEndState, ContextId, EventLog,
};
use crate::clock::Clock;
use crate::config::TimingPolicy;
use crate::error::{CoordinatorError, Result};
use crate::group::GroupManager;
use crate::leader::LeaderElection;
use crate::scheduler::{CollisionScheduler, PeriodicTasks};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

// endregion: --- Imports

// region:    --- Modules
pub mod guard;
pub mod http;

pub use guard::{InFlight, InFlightGuard, RateLimiter};
pub use http::HttpExecutionContext;

// endregion: --- Modules

const OPEN_RETRY_BACKOFF_MS: u64 = 250;

// region:    --- Execution Context
/// 실행 컨텍스트 (탭) 제어 트레이트
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    async fn open(&self, article_id: &str) -> std::result::Result<ContextId, String>;

    async fn close(&self, context_id: &str) -> std::result::Result<(), String>;

    async fn reload(&self, context_id: &str) -> std::result::Result<(), String>;

    /// 아티클 실시간 상태 새로고침 요청
    async fn request_refresh(&self, context_id: &str) -> std::result::Result<(), String>;

    /// 사용자가 탭을 보고 있는지
    async fn is_user_active(&self, context_id: &str) -> std::result::Result<bool, String>;
}

// endregion: --- Execution Context

// region:    --- Tab Action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabAction {
    OpenNow { article_id: ArticleId },
    OpenAt { article_id: ArticleId, at: i64 },
    Reload { article_id: ArticleId, context_id: ContextId },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub opened: usize,
    pub scheduled: usize,
    pub reloaded: usize,
    pub failed: usize,
}

// endregion: --- Tab Action

// region:    --- Tab Lifecycle Manager
pub struct TabLifecycleManager {
    registry: Arc<ArticleRegistry>,
    groups: Arc<GroupManager>,
    leader: Arc<LeaderElection>,
    scheduler: Arc<CollisionScheduler>,
    contexts: Arc<dyn ExecutionContext>,
    clock: Arc<dyn Clock>,
    event_log: Arc<EventLog>,
    tasks: Arc<PeriodicTasks>,
    timing: TimingPolicy,
    rate_limiter: RateLimiter,
    in_flight: InFlight,
    pending_opens: Mutex<HashSet<ArticleId>>,
    heartbeats: Mutex<HashMap<ArticleId, i64>>,
}

impl TabLifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ArticleRegistry>,
        groups: Arc<GroupManager>,
        leader: Arc<LeaderElection>,
        scheduler: Arc<CollisionScheduler>,
        contexts: Arc<dyn ExecutionContext>,
        clock: Arc<dyn Clock>,
        event_log: Arc<EventLog>,
        tasks: Arc<PeriodicTasks>,
        timing: TimingPolicy,
    ) -> Self {
        Self {
            registry,
            groups,
            leader,
            scheduler,
            contexts,
            clock,
            event_log,
            tasks,
            timing,
            rate_limiter: RateLimiter::new(),
            in_flight: InFlight::new(),
            pending_opens: Mutex::new(HashSet::new()),
            heartbeats: Mutex::new(HashMap::new()),
        }
    }

    /// 탭을 열어도 되는지 검사. 가능하면 조정된 종료 시각을 반환.
    pub fn eligibility(&self, article_id: &str, now: i64) -> std::result::Result<i64, String> {
        let article = self
            .registry
            .get(article_id)
            .ok_or_else(|| "unknown article".to_string())?;
        if !self.groups.cached_state(article.group_name()).auto_bid {
            return Err(format!("auto-bid is off for group {}", article.group_name()));
        }
        if !article.auto_bid {
            return Err("auto-bid is off for this article".to_string());
        }
        if article.max_bid.is_none() {
            return Err("no max bid set".to_string());
        }
        let end_time = article
            .end_time
            .ok_or_else(|| "article has no end time".to_string())?;
        if end_time <= now {
            return Err("auction already ended".to_string());
        }
        if article.auction_end_state.is_terminal() {
            return Err("auction outcome already known".to_string());
        }
        let adjusted = self
            .scheduler
            .adjusted_bid_time(article_id)
            .map_err(|e| e.to_string())?
            .end_time
            .unwrap_or(end_time);
        if adjusted - now > self.timing.tab_lookahead_ms {
            return Err("outside the tab lookahead window".to_string());
        }
        Ok(adjusted)
    }

    /// 이번 스윕에서 할 일
    pub fn plan(&self, now: i64) -> Vec<TabAction> {
        self.plan_where(now, |_| true)
    }

    fn plan_where<F>(&self, now: i64, include: F) -> Vec<TabAction>
    where
        F: Fn(&Article) -> bool,
    {
        let mut articles = self.registry.snapshot();
        articles.retain(|a| include(a));
        articles.sort_by(|a, b| a.id.cmp(&b.id));

        let mut actions = Vec::new();
        for article in articles {
            if let Some(context_id) = article.execution_context {
                if self.is_stale(&article.id, now) {
                    actions.push(TabAction::Reload {
                        article_id: article.id,
                        context_id,
                    });
                }
                continue;
            }
            if let Ok(adjusted) = self.eligibility(&article.id, now) {
                let open_at = adjusted - self.timing.open_before_ms;
                if open_at <= now {
                    actions.push(TabAction::OpenNow {
                        article_id: article.id,
                    });
                } else {
                    actions.push(TabAction::OpenAt {
                        article_id: article.id,
                        at: open_at,
                    });
                }
            }
        }
        actions
    }

    async fn is_leading(&self) -> bool {
        match self.leader.get_state().await {
            Ok(state) => state.enabled,
            Err(e) => {
                error!("{:<12} --> 리더 상태 조회 실패: {}", "Tabs", e);
                false
            }
        }
    }

    /// 주기 스윕. 리더 윈도우일 때만 동작한다.
    pub async fn sweep(self: &Arc<Self>) -> SweepReport {
        if !self.is_leading().await {
            return SweepReport::default();
        }
        let now = self.clock.now_ms();
        let report = self.execute(self.plan(now), now).await;
        if report != SweepReport::default() {
            debug!(
                "{:<12} --> 스윕 결과: {:?}, 추적 중 {}",
                "Tabs",
                report,
                self.tracked_articles()
            );
        }
        report
    }

    /// 결과가 확정된 아티클의 그룹 형제들을 다시 계획
    pub async fn replan_siblings(self: &Arc<Self>, article_id: &str) -> SweepReport {
        let Some(group) = self
            .registry
            .get(article_id)
            .map(|a| a.group_name().to_string())
        else {
            return SweepReport::default();
        };
        if !self.is_leading().await {
            return SweepReport::default();
        }
        let now = self.clock.now_ms();
        let actions = self.plan_where(now, |a| a.id != article_id && a.group_name() == group);
        self.execute(actions, now).await
    }

    // 한 아티클의 실패가 다른 아티클 처리를 막지 않는다
    async fn execute(self: &Arc<Self>, actions: Vec<TabAction>, now: i64) -> SweepReport {
        let mut report = SweepReport::default();
        for action in actions {
            match action {
                TabAction::OpenNow { article_id } => match self.open_if_eligible(&article_id).await {
                    Ok(Some(_)) => report.opened += 1,
                    Ok(None) => {}
                    Err(_) => report.failed += 1,
                },
                TabAction::OpenAt { article_id, at } => {
                    if self.schedule_open(&article_id, at - now) {
                        report.scheduled += 1;
                    }
                }
                TabAction::Reload {
                    article_id,
                    context_id,
                } => match self.reload_stale(&article_id, &context_id, now).await {
                    Ok(true) => report.reloaded += 1,
                    Ok(false) => {}
                    Err(_) => report.failed += 1,
                },
            }
        }
        report
    }

    // 같은 아티클에 타이머가 이미 있으면 다시 예약하지 않는다
    fn schedule_open(self: &Arc<Self>, article_id: &str, delay_ms: i64) -> bool {
        if !self.pending_opens.lock().insert(article_id.to_string()) {
            return false;
        }
        let this = Arc::clone(self);
        let id = article_id.to_string();
        self.tasks.spawn_after(
            Duration::from_millis(delay_ms.max(0) as u64),
            async move {
                this.pending_opens.lock().remove(&id);
                if let Err(e) = this.open_if_eligible(&id).await {
                    this.event_log
                        .error(&id, "Tabs", format!("scheduled open failed: {}", e));
                }
            },
        );
        true
    }

    /// 조건을 다시 검사한 뒤 탭 열기. 이미 열려 있으면 재사용.
    pub async fn open_if_eligible(&self, article_id: &str) -> Result<Option<ContextId>> {
        match self.leader.get_state().await {
            Ok(state) if state.enabled => {}
            Ok(_) => return Ok(None),
            Err(e) => return Err(e),
        }
        let now = self.clock.now_ms();
        if let Err(reason) = self.eligibility(article_id, now) {
            debug!("{:<12} --> [{}] 탭 열기 생략: {}", "Tabs", article_id, reason);
            return Ok(None);
        }
        if let Some(existing) = self
            .registry
            .get(article_id)
            .and_then(|a| a.execution_context)
        {
            return Ok(Some(existing));
        }
        let Some(_guard) = self.in_flight.try_enter(&format!("open:{}", article_id)) else {
            return Ok(None);
        };
        self.open_with_retry(article_id).await.map(Some)
    }

    async fn open_with_retry(&self, article_id: &str) -> Result<ContextId> {
        let attempts = self.timing.max_open_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.contexts.open(article_id).await {
                Ok(context_id) => {
                    self.registry.attach_context(article_id, context_id.clone());
                    self.heartbeats
                        .lock()
                        .insert(article_id.to_string(), self.clock.now_ms());
                    self.event_log.info(
                        article_id,
                        "Tabs",
                        format!("tab {} opened for bidding", context_id),
                    );
                    return Ok(context_id);
                }
                Err(e) => {
                    warn!(
                        "{:<12} --> [{}] 탭 열기 실패 ({}/{}): {}",
                        "Tabs", article_id, attempt, attempts, e
                    );
                    last_error = e;
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_millis(
                            OPEN_RETRY_BACKOFF_MS * attempt as u64,
                        ))
                        .await;
                    }
                }
            }
        }

        let err = CoordinatorError::ExecutionContextUnavailable {
            article_id: article_id.to_string(),
            attempts,
            reason: last_error,
        };
        self.event_log.error(article_id, "Tabs", err.to_string());
        Err(err)
    }

    /// 카운트다운 갱신 (articleUpdated 메시지)
    pub fn on_heartbeat(&self, article_id: &str) {
        self.heartbeats
            .lock()
            .insert(article_id.to_string(), self.clock.now_ms());
    }

    fn is_stale(&self, article_id: &str, now: i64) -> bool {
        match self.heartbeats.lock().get(article_id) {
            Some(last) => now - last > self.timing.stale_countdown_ms,
            None => true,
        }
    }

    async fn reload_stale(&self, article_id: &str, context_id: &str, now: i64) -> Result<bool> {
        if !self
            .rate_limiter
            .should_run("reload", article_id, self.timing.reload_min_interval_ms, now)
        {
            return Ok(false);
        }
        self.contexts.reload(context_id).await.map_err(|reason| {
            let err = CoordinatorError::ExecutionContextUnavailable {
                article_id: article_id.to_string(),
                attempts: 1,
                reason,
            };
            self.event_log.warn(article_id, "Tabs", err.to_string());
            err
        })?;
        self.event_log
            .info(article_id, "Tabs", "countdown looked frozen, tab reloaded");
        Ok(true)
    }

    /// 경매 결과가 확정되면 형제 아티클을 다시 계획하고 일정 시간 후 탭 닫기 예약
    pub fn handle_end_state(self: &Arc<Self>, article_id: &str, state: AuctionEndState) {
        if !state.is_terminal() {
            return;
        }
        let this = Arc::clone(self);
        let id = article_id.to_string();
        self.tasks.spawn_after(Duration::ZERO, async move {
            let report = this.replan_siblings(&id).await;
            if report != SweepReport::default() {
                debug!("{:<12} --> [{}] 형제 재계획: {:?}", "Tabs", id, report);
            }
        });

        let has_context = self
            .registry
            .get(article_id)
            .is_some_and(|a| a.execution_context.is_some());
        if !has_context {
            return;
        }
        let this = Arc::clone(self);
        let id = article_id.to_string();
        self.tasks.spawn_after(
            Duration::from_millis(self.timing.close_delay_ms.max(0) as u64),
            async move {
                if let Err(e) = this.close_if_unattended(&id).await {
                    warn!("{:<12} --> [{}] 탭 닫기 실패: {}", "Tabs", id, e);
                }
            },
        );
    }

    /// 사용자가 보고 있지 않으면 탭 닫기
    pub async fn close_if_unattended(&self, article_id: &str) -> Result<bool> {
        let Some(context_id) = self
            .registry
            .get(article_id)
            .and_then(|a| a.execution_context)
        else {
            return Ok(false);
        };

        match self.contexts.is_user_active(&context_id).await {
            Ok(true) => {
                self.event_log
                    .info(article_id, "Tabs", "tab kept open: user is viewing it");
                return Ok(false);
            }
            Ok(false) => {}
            Err(e) => {
                self.event_log.warn(
                    article_id,
                    "Tabs",
                    format!("tab state unknown, not closing: {}", e),
                );
                return Ok(false);
            }
        }

        self.contexts.close(&context_id).await.map_err(|reason| {
            CoordinatorError::ExecutionContextUnavailable {
                article_id: article_id.to_string(),
                attempts: 1,
                reason,
            }
        })?;
        self.registry.detach_context(article_id);
        self.forget(article_id);
        self.registry.remove(article_id);
        self.event_log.info(article_id, "Tabs", "tab closed after auction end");
        Ok(true)
    }

    /// 탭이 닫히거나 아티클이 사라지면 추적 상태 정리
    pub fn forget(&self, article_id: &str) {
        self.heartbeats.lock().remove(article_id);
        self.rate_limiter.forget(article_id);
    }

    /// 카운트다운이나 실행 간격을 추적 중인 아티클 수
    pub fn tracked_articles(&self) -> usize {
        let mut ids: HashSet<String> = self.heartbeats.lock().keys().cloned().collect();
        ids.extend(self.rate_limiter.targets());
        ids.len()
    }

    /// 입찰 잠금을 건 형제 아티클의 실시간 상태 새로고침
    pub async fn refresh_article(&self, article_id: &str) -> Result<bool> {
        let Some(_guard) = self.in_flight.try_enter(&format!("refresh:{}", article_id)) else {
            debug!("{:<12} --> [{}] 새로고침 이미 진행 중", "Tabs", article_id);
            return Ok(false);
        };
        let now = self.clock.now_ms();
        if !self.rate_limiter.should_run(
            "refresh",
            article_id,
            self.timing.refresh_min_interval_ms,
            now,
        ) {
            return Ok(false);
        }
        let Some(context_id) = self
            .registry
            .get(article_id)
            .and_then(|a| a.execution_context)
        else {
            self.event_log
                .info(article_id, "Tabs", "refresh requested but no tab is open");
            return Ok(false);
        };
        self.contexts
            .request_refresh(&context_id)
            .await
            .map_err(|reason| CoordinatorError::ExecutionContextUnavailable {
                article_id: article_id.to_string(),
                attempts: 1,
                reason,
            })?;
        Ok(true)
    }
}

// endregion: --- Tab Lifecycle Manager
