/// 윈도우 코디네이터
/// 윈도우 시작 시 한 번 생성되고 종료 시 정리된다. 모든 협력 객체를 명시적으로 소유한다.
// region:    --- Imports
use crate::article::{
    ArticleDiff, ArticleField, ArticleObservation, ArticleRegistry, AuctionEndState, EventLog,
};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{CoordinatorError, Result};
use crate::group::GroupManager;
use crate::leader::{ClaimSignal, LeaderElection, WindowIdentity};
use crate::rpc::{Ack, ArticleAutoBidState, ContextMessage, ContextReply, MaxBidDetail};
use crate::scheduler::{CollisionPolicy, CollisionScheduler, PeriodicTasks};
use crate::store::{is_article_key, ReplicatedStore, StoreChange, GROUPS_KEY, SETTINGS_KEY};
use crate::tabs::{ExecutionContext, TabLifecycleManager};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

// endregion: --- Imports

// region:    --- Coordinator
pub struct Coordinator {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn ReplicatedStore>,
    pub registry: Arc<ArticleRegistry>,
    pub groups: Arc<GroupManager>,
    pub leader: Arc<LeaderElection>,
    pub scheduler: Arc<CollisionScheduler>,
    pub tabs: Arc<TabLifecycleManager>,
    pub event_log: Arc<EventLog>,
    tasks: Arc<PeriodicTasks>,
    refresh_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl Coordinator {
    pub fn new(
        config: Config,
        store: Arc<dyn ReplicatedStore>,
        contexts: Arc<dyn ExecutionContext>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let timing = config.timing.clone();
        let identity = WindowIdentity::new(config.install_id.clone(), config.window_id.clone());
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();

        let event_log = Arc::new(EventLog::new(Arc::clone(&clock)));
        let registry = Arc::new(ArticleRegistry::new(Arc::clone(&store)));
        let groups = Arc::new(GroupManager::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            timing.group_retention_ms,
        ));
        let leader = Arc::new(LeaderElection::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            identity,
            timing.claim_ttl_ms,
        ));
        let scheduler = Arc::new(CollisionScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&groups),
            Arc::clone(&clock),
            Arc::clone(&event_log),
            CollisionPolicy::from(&timing),
            refresh_tx,
        ));
        let tasks = Arc::new(PeriodicTasks::new());
        let tabs = Arc::new(TabLifecycleManager::new(
            Arc::clone(&registry),
            Arc::clone(&groups),
            Arc::clone(&leader),
            Arc::clone(&scheduler),
            contexts,
            Arc::clone(&clock),
            Arc::clone(&event_log),
            Arc::clone(&tasks),
            timing,
        ));

        Arc::new(Self {
            config,
            clock,
            store,
            registry,
            groups,
            leader,
            scheduler,
            tabs,
            event_log,
            tasks,
            refresh_rx: Mutex::new(Some(refresh_rx)),
        })
    }

    /// 윈도우 초기화: 저장소 로드, 미사용 그룹 정리, 리더 상태 부트스트랩
    pub async fn init(&self) -> Result<()> {
        self.registry.load().await?;
        self.groups.get_all().await?;

        // 우선순위가 낮은 정리 작업이라 실패해도 초기화는 계속한다
        match self.groups.remove_unused(&self.registry.group_names()).await {
            Ok(removed) if !removed.is_empty() => {
                info!("{:<12} --> 미사용 그룹 {}개 정리", "Coordinator", removed.len())
            }
            Ok(_) => {}
            Err(e) => warn!("{:<12} --> 그룹 정리 실패: {}", "Coordinator", e),
        }

        let state = self.leader.get_state().await?;
        info!(
            "{:<12} --> 초기화 완료: window={}, autoBid={}, simulating={}",
            "Coordinator",
            self.leader.identity(),
            state.enabled,
            state.simulating
        );
        Ok(())
    }

    /// 변경 감시와 주기 작업 시작
    pub fn start(self: &Arc<Self>) {
        self.spawn_watch_loop();
        self.spawn_refresh_worker();

        let timing = &self.config.timing;
        let leader = Arc::clone(&self.leader);
        self.tasks
            .spawn("claim-renewal", timing.renewal_interval, move || {
                let leader = Arc::clone(&leader);
                async move {
                    if let Err(e) = leader.renew().await {
                        error!("{:<12} --> 클레임 갱신 실패: {}", "Leader", e);
                    }
                }
            });

        let leader = Arc::clone(&self.leader);
        self.tasks
            .spawn("claim-expiry", timing.expiry_sweep_interval, move || {
                let leader = Arc::clone(&leader);
                async move {
                    if let Err(e) = leader.expire_stale().await {
                        error!("{:<12} --> 클레임 만료 검사 실패: {}", "Leader", e);
                    }
                }
            });

        let tabs = Arc::clone(&self.tabs);
        self.tasks
            .spawn("tab-sweep", timing.tab_sweep_interval, move || {
                let tabs = Arc::clone(&tabs);
                async move {
                    tabs.sweep().await;
                }
            });
    }

    fn spawn_watch_loop(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let mut changes = self.store.watch();
        let cancel = self.tasks.token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = changes.recv() => match received {
                        Ok(change) => this.handle_store_change(&change),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("{:<12} --> 변경 알림 {}개 누락, 다시 로드", "Coordinator", skipped);
                            if let Err(e) = this.resync().await {
                                error!("{:<12} --> 다시 로드 실패: {}", "Coordinator", e);
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("{:<12} --> 변경 감시 종료", "Coordinator");
        });
    }

    fn spawn_refresh_worker(self: &Arc<Self>) {
        let Some(mut refresh_rx) = self.refresh_rx.lock().take() else {
            return;
        };
        let tabs = Arc::clone(&self.tabs);
        let cancel = self.tasks.token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = refresh_rx.recv() => match next {
                        Some(article_id) => {
                            if let Err(e) = tabs.refresh_article(&article_id).await {
                                warn!("{:<12} --> [{}] 새로고침 실패: {}", "Coordinator", article_id, e);
                            }
                        }
                        None => break,
                    },
                }
            }
        });
    }

    async fn resync(&self) -> Result<()> {
        self.registry.load().await?;
        self.groups.get_all().await?;
        self.leader.get_state().await?;
        Ok(())
    }

    /// 저장소 변경 알림 분배
    pub fn handle_store_change(&self, change: &StoreChange) {
        match change.key.as_str() {
            SETTINGS_KEY => match self.leader.on_store_change(change) {
                ClaimSignal::ForeignLeader {
                    owner_id,
                    demoted: true,
                } => info!(
                    "{:<12} --> 윈도우 {} 에게 리더 양보",
                    "Coordinator", owner_id
                ),
                signal => debug!("{:<12} --> 클레임 알림: {:?}", "Coordinator", signal),
            },
            GROUPS_KEY => self.groups.apply_remote(change),
            key if is_article_key(key) => {
                let diff = self.registry.apply_remote(change);
                if !diff.is_empty() {
                    debug!("{:<12} --> [{}] 원격 변경 {:?}", "Coordinator", key, diff.fields());
                }
                if !self.registry.contains(key) {
                    self.tabs.forget(key);
                }
            }
            _ => {}
        }
    }

    /// 사용자가 아티클을 버림. 없는 아티클이면 false.
    pub async fn discard_article(&self, article_id: &str) -> Result<bool> {
        if !self.registry.contains(article_id) {
            return Ok(false);
        }
        self.registry.discard(article_id).await?;
        self.event_log.forget(article_id);
        self.tabs.forget(article_id);
        Ok(true)
    }

    /// 관찰 결과 반영. 새 그룹 이름이면 그룹을 만든다.
    pub async fn observe(&self, obs: ArticleObservation) -> Result<ArticleDiff> {
        let article_id = obs.article_id.clone();
        let diff = self.registry.upsert(obs).await?;
        if diff.contains(ArticleField::Group) {
            if let Some(group) = self.registry.get(&article_id).and_then(|a| a.group) {
                self.groups.ensure(&group).await?;
            }
        }
        Ok(diff)
    }

    /// 아티클 기준 자동 입찰 상태
    pub async fn auto_bid_state_for(&self, article_id: &str) -> Result<ArticleAutoBidState> {
        let article = self
            .registry
            .get(article_id)
            .ok_or_else(|| CoordinatorError::UnknownArticle(article_id.to_string()))?;
        let window = self.leader.get_state().await?;
        let group = self.groups.get_state(article.group.as_deref()).await?;

        let reason = if !window.enabled {
            Some(match &window.conflicting_owner_id {
                Some(owner) => format!("auto-bid is held by window {}", owner),
                None => "auto-bid is off for this window".to_string(),
            })
        } else if !group.auto_bid {
            Some(format!("auto-bid is off for group {}", article.group_name()))
        } else if !article.auto_bid {
            Some("auto-bid is off for this article".to_string())
        } else {
            None
        };

        Ok(ArticleAutoBidState {
            article_id: article.id.clone(),
            enabled: window.enabled,
            simulating: window.simulating,
            conflicting_owner_id: window.conflicting_owner_id,
            group_auto_bid: group.auto_bid,
            article_auto_bid: article.auto_bid,
            may_bid: reason.is_none(),
            reason,
        })
    }

    /// 탭 메시지 처리
    /// 실패는 해당 아티클 로그에 남기고 다른 아티클 처리에는 영향을 주지 않는다.
    pub async fn dispatch(self: &Arc<Self>, message: ContextMessage) -> Result<ContextReply> {
        let article_id = message.article_id().to_string();
        let action = message.action();
        debug!("{:<12} --> [{}] {}", "Coordinator", article_id, action);

        let result = self.dispatch_inner(message).await;
        if let Err(e) = &result {
            self.event_log
                .error(&article_id, "Coordinator", format!("{} failed: {}", action, e));
        }
        result
    }

    async fn dispatch_inner(self: &Arc<Self>, message: ContextMessage) -> Result<ContextReply> {
        match message {
            ContextMessage::ArticleUpdated {
                article_id,
                mut detail,
            } => {
                detail.article_id = article_id.clone();
                let diff = self.observe(detail).await?;
                self.tabs.on_heartbeat(&article_id);
                if diff.contains(ArticleField::AuctionEndState) {
                    self.on_end_state(&article_id);
                }
                Ok(ack(diff))
            }
            ContextMessage::MaxBidUpdated { article_id, detail } => {
                let MaxBidDetail {
                    max_bid,
                    auto_bid,
                    group,
                } = detail;
                let diff = self
                    .observe(ArticleObservation {
                        max_bid,
                        auto_bid,
                        group,
                        ..ArticleObservation::new(article_id)
                    })
                    .await?;
                Ok(ack(diff))
            }
            ContextMessage::Refresh { article_id } => {
                if !self.registry.contains(&article_id) {
                    return Err(CoordinatorError::UnknownArticle(article_id));
                }
                self.tabs.on_heartbeat(&article_id);
                self.scheduler.adjusted_bid_time(&article_id)?;
                Ok(ack(ArticleDiff::default()))
            }
            ContextMessage::AuctionEndStateChanged { article_id, detail } => {
                let diff = self
                    .observe(ArticleObservation {
                        auction_end_state: Some(detail.auction_end_state),
                        ..ArticleObservation::new(article_id.clone())
                    })
                    .await?;
                self.on_end_state(&article_id);
                Ok(ack(diff))
            }
            ContextMessage::GetAutoBidState { article_id } => Ok(ContextReply::AutoBid(
                self.auto_bid_state_for(&article_id).await?,
            )),
            ContextMessage::GetBidLockState { article_id } => Ok(ContextReply::BidLock(
                self.scheduler.bid_lock_state(&article_id)?,
            )),
            ContextMessage::GetAdjustedBidTime { article_id } => Ok(ContextReply::AdjustedTime(
                self.scheduler.adjusted_bid_time(&article_id)?,
            )),
        }
    }

    fn on_end_state(self: &Arc<Self>, article_id: &str) {
        let state = self
            .registry
            .get(article_id)
            .map(|a| a.auction_end_state)
            .unwrap_or(AuctionEndState::Unknown);
        if state.is_terminal() {
            self.event_log
                .info(article_id, "Coordinator", format!("auction outcome: {:?}", state));
            self.tabs.handle_end_state(article_id, state);
        }
    }

    /// 윈도우 종료: 주기 작업 취소, 자신의 클레임 삭제
    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
        if let Err(e) = self.leader.on_window_close().await {
            warn!("{:<12} --> 종료 시 클레임 정리 실패: {}", "Coordinator", e);
        }
        info!("{:<12} --> 윈도우 종료", "Coordinator");
    }
}

fn ack(diff: ArticleDiff) -> ContextReply {
    ContextReply::Ack(Ack {
        ok: true,
        changed: diff.fields(),
    })
}

// endregion: --- Coordinator
