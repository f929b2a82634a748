mod common;

use common::{auto_bid_article, eur, init_tracing, open_window, wait_until, NOW};
use snipe_coordinator::article::{ArticleField, ArticleObservation, LogLevel};
use snipe_coordinator::clock::ManualClock;
use snipe_coordinator::error::CoordinatorError;
use snipe_coordinator::rpc::{ContextMessage, ContextReply, MaxBidDetail};
use snipe_coordinator::store::{MemoryStore, ReplicatedStore, StoreChange, SETTINGS_KEY};

/// 자동 입찰 허용 여부: 윈도우, 그룹, 아티클 세 단계 모두 켜져야 함
#[tokio::test]
async fn test_auto_bid_state_layers() {
    init_tracing();
    let store = MemoryStore::new();
    let clock = ManualClock::new(NOW);
    let w = open_window(&store, &clock, "w1").await;
    let c = &w.coordinator;
    c.observe(auto_bid_article("A", "G", NOW + 30_000))
        .await
        .unwrap();

    let state = c.auto_bid_state_for("A").await.unwrap();
    assert!(!state.may_bid);
    assert_eq!(state.reason.as_deref(), Some("auto-bid is off for this window"));

    c.leader.set_state(true, false).await.unwrap();
    let state = c.auto_bid_state_for("A").await.unwrap();
    assert!(!state.may_bid);
    assert_eq!(state.reason.as_deref(), Some("auto-bid is off for group G"));

    c.groups.set_state(Some("G"), true, false).await.unwrap();
    let state = c.auto_bid_state_for("A").await.unwrap();
    assert!(state.may_bid);
    assert!(state.reason.is_none());
    assert!(state.group_auto_bid);
    assert!(state.article_auto_bid);

    c.observe(ArticleObservation {
        auto_bid: Some(false),
        ..ArticleObservation::new("A")
    })
    .await
    .unwrap();
    let state = c.auto_bid_state_for("A").await.unwrap();
    assert!(!state.may_bid);
    assert_eq!(state.reason.as_deref(), Some("auto-bid is off for this article"));
}

/// 다른 윈도우가 리더이면 그 윈도우를 이유로 보고
#[tokio::test]
async fn test_auto_bid_state_reports_conflicting_window() {
    init_tracing();
    let store = MemoryStore::new();
    let clock = ManualClock::new(NOW);
    let w1 = open_window(&store, &clock, "w1").await;
    let w2 = open_window(&store, &clock, "w2").await;
    w1.coordinator.leader.set_state(true, false).await.unwrap();
    w2.coordinator
        .observe(auto_bid_article("A", "G", NOW + 30_000))
        .await
        .unwrap();

    let state = w2.coordinator.auto_bid_state_for("A").await.unwrap();

    assert!(!state.enabled);
    assert_eq!(state.conflicting_owner_id.as_deref(), Some("install:w1"));
    assert_eq!(
        state.reason.as_deref(),
        Some("auto-bid is held by window install:w1")
    );
}

/// 새 그룹으로 최대 입찰가를 설정하면 그룹 생성
#[tokio::test]
async fn test_max_bid_update_creates_group() {
    init_tracing();
    let store = MemoryStore::new();
    let clock = ManualClock::new(NOW);
    let w = open_window(&store, &clock, "w1").await;

    let reply = w
        .coordinator
        .dispatch(ContextMessage::MaxBidUpdated {
            article_id: "A".to_string(),
            detail: MaxBidDetail {
                max_bid: Some(eur(4_200)),
                auto_bid: Some(true),
                group: Some("stamps".to_string()),
            },
        })
        .await
        .unwrap();

    let ContextReply::Ack(ack) = reply else {
        panic!("ack 응답이 아님: {:?}", reply);
    };
    assert!(ack.ok);
    assert_eq!(
        ack.changed,
        vec![ArticleField::MaxBid, ArticleField::AutoBid, ArticleField::Group]
    );
    let groups = w.coordinator.groups.get_all().await.unwrap();
    assert!(groups.contains_key("stamps"));
    assert!(store.get("A").await.unwrap().is_some());
}

/// 페이지 갱신 메시지는 관찰 결과를 병합
#[tokio::test]
async fn test_article_updated_merges_observation() {
    init_tracing();
    let store = MemoryStore::new();
    let clock = ManualClock::new(NOW);
    let w = open_window(&store, &clock, "w1").await;

    let reply = w
        .coordinator
        .dispatch(ContextMessage::ArticleUpdated {
            article_id: "A".to_string(),
            detail: ArticleObservation {
                end_time: Some(NOW + 60_000),
                current_price: Some(eur(1_500)),
                ..Default::default()
            },
        })
        .await
        .unwrap();

    let ContextReply::Ack(ack) = reply else {
        panic!("ack 응답이 아님: {:?}", reply);
    };
    assert_eq!(
        ack.changed,
        vec![ArticleField::EndTime, ArticleField::CurrentPrice]
    );
    let article = w.coordinator.registry.get("A").unwrap();
    assert_eq!(article.current_price, Some(eur(1_500)));
}

/// 조회 메시지 응답
#[tokio::test]
async fn test_query_messages() {
    init_tracing();
    let store = MemoryStore::new();
    let clock = ManualClock::new(NOW);
    let w = open_window(&store, &clock, "w1").await;
    for (id, end) in [("A", NOW + 100_000), ("B", NOW + 105_000)] {
        w.coordinator
            .observe(auto_bid_article(id, "G", end))
            .await
            .unwrap();
    }

    let lock = w
        .coordinator
        .dispatch(ContextMessage::GetBidLockState {
            article_id: "B".to_string(),
        })
        .await
        .unwrap();
    let ContextReply::BidLock(lock) = lock else {
        panic!("잠금 응답이 아님: {:?}", lock);
    };
    assert!(lock.locked);
    assert_eq!(lock.blocked_by.as_deref(), Some("A"));

    let adjusted = w
        .coordinator
        .dispatch(ContextMessage::GetAdjustedBidTime {
            article_id: "A".to_string(),
        })
        .await
        .unwrap();
    let ContextReply::AdjustedTime(adjusted) = adjusted else {
        panic!("조정 시각 응답이 아님: {:?}", adjusted);
    };
    assert_eq!(adjusted.end_time, Some(NOW + 95_000));
}

/// 모르는 아티클 요청은 에러를 반환하고 아티클 로그에 남김
#[tokio::test]
async fn test_unknown_article_error_logged() {
    init_tracing();
    let store = MemoryStore::new();
    let clock = ManualClock::new(NOW);
    let w = open_window(&store, &clock, "w1").await;

    let err = w
        .coordinator
        .dispatch(ContextMessage::GetAutoBidState {
            article_id: "ghost".to_string(),
        })
        .await
        .unwrap_err();

    assert_eq!(err, CoordinatorError::UnknownArticle("ghost".to_string()));
    let entries = w.coordinator.event_log.entries("ghost");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].level, LogLevel::Error);
    assert!(entries[0].message.starts_with("getAutoBidState failed"));
}

/// 다른 윈도우의 변경이 감시 루프로 반영됨
#[tokio::test]
async fn test_watch_loop_applies_remote_changes() {
    init_tracing();
    let store = MemoryStore::new();
    let clock = ManualClock::new(NOW);
    let w1 = open_window(&store, &clock, "w1").await;
    let w2 = open_window(&store, &clock, "w2").await;
    w2.coordinator.start();

    w1.coordinator
        .observe(auto_bid_article("A", "G", NOW + 30_000))
        .await
        .unwrap();
    w1.coordinator
        .groups
        .set_state(Some("G"), true, true)
        .await
        .unwrap();

    let c2 = w2.coordinator.clone();
    assert!(wait_until(|| c2.registry.contains("A")).await);
    assert!(wait_until(|| c2.groups.cached_state("G").bid_all).await);
    assert_eq!(c2.registry.get("A").unwrap().max_bid, Some(eur(5_000)));

    w2.coordinator.shutdown().await;
}

/// 설정 키 변경은 리더 선출로 전달되어 로컬 리더 해제
#[tokio::test]
async fn test_settings_change_routed_to_leader() {
    init_tracing();
    let store = MemoryStore::new();
    let clock = ManualClock::new(NOW);
    let w1 = open_window(&store, &clock, "w1").await;
    let w2 = open_window(&store, &clock, "w2").await;
    w2.coordinator.leader.set_state(true, false).await.unwrap();
    w1.coordinator.leader.set_state(true, false).await.unwrap();

    w2.coordinator.handle_store_change(&StoreChange {
        key: SETTINGS_KEY.to_string(),
        old_value: None,
        new_value: store.get(SETTINGS_KEY).await.unwrap(),
    });
    // 클레임이 사라져도 해제된 로컬 상태는 유지된다
    w1.coordinator.leader.on_window_close().await.unwrap();

    let state = w2.coordinator.leader.get_state().await.unwrap();
    assert!(!state.enabled);
    assert!(state.conflicting_owner_id.is_none());
}

/// 잠금을 건 형제 아티클의 탭에 새로고침 요청이 전달됨
#[tokio::test]
async fn test_refresh_worker_forwards_blocker() {
    init_tracing();
    let store = MemoryStore::new();
    let clock = ManualClock::new(NOW);
    let w = open_window(&store, &clock, "w1").await;
    let c = w.coordinator.clone();
    c.leader.set_state(true, false).await.unwrap();
    c.groups.set_state(Some("G"), true, false).await.unwrap();
    c.observe(auto_bid_article("A", "G", NOW + 30_000))
        .await
        .unwrap();
    c.observe(auto_bid_article("B", "G", NOW + 35_000))
        .await
        .unwrap();
    c.tabs.open_if_eligible("A").await.unwrap();
    c.start();

    let lock = c.scheduler.bid_lock_state("B").unwrap();
    assert!(lock.locked);

    let contexts = w.contexts.clone();
    assert!(wait_until(|| contexts.count("refresh:ctx-1") == 1).await);

    c.shutdown().await;
}

/// 종료 시 자신의 클레임 삭제
#[tokio::test]
async fn test_shutdown_releases_claim() {
    init_tracing();
    let store = MemoryStore::new();
    let clock = ManualClock::new(NOW);
    let w = open_window(&store, &clock, "w1").await;
    w.coordinator.leader.set_state(true, false).await.unwrap();
    w.coordinator.start();

    w.coordinator.shutdown().await;

    assert!(w.coordinator.leader.read_claim().await.unwrap().is_none());
}

/// 초기화 때 오래된 미사용 그룹 정리
#[tokio::test]
async fn test_init_removes_stale_groups() {
    init_tracing();
    let store = MemoryStore::new();
    let clock = ManualClock::new(NOW);
    store
        .set(
            "GROUPS",
            serde_json::json!({
                "old": { "autoBid": false, "bidAll": false, "lastModified": NOW - 6 * 24 * 60 * 60 * 1000 },
                "kept": { "autoBid": false, "bidAll": false, "lastModified": NOW - 6 * 24 * 60 * 60 * 1000 }
            }),
        )
        .await
        .unwrap();
    store
        .set(
            "A",
            serde_json::json!({ "maxBid": { "amount": 100, "currency": "EUR" }, "group": "kept" }),
        )
        .await
        .unwrap();

    let w = open_window(&store, &clock, "w1").await;

    let groups = w.coordinator.groups.get_all().await.unwrap();
    assert!(!groups.contains_key("old"));
    assert!(groups.contains_key("kept"));
    assert!(w.coordinator.registry.contains("A"));
}
