mod common;

use common::{auto_bid_article, init_tracing, open_window, wait_until, Window, NOW};
use snipe_coordinator::article::{ArticleObservation, AuctionEndState, LogLevel};
use snipe_coordinator::clock::{Clock, ManualClock};
use snipe_coordinator::error::CoordinatorError;
use snipe_coordinator::rpc::{ContextMessage, EndStateDetail};
use snipe_coordinator::store::MemoryStore;
use snipe_coordinator::tabs::{SweepReport, TabAction};
use std::time::Duration;

/// 리더 윈도우 + 자동 입찰 그룹 G
async fn leader_window() -> (Window, ManualClock) {
    init_tracing();
    let store = MemoryStore::new();
    let clock = ManualClock::new(NOW);
    let w = open_window(&store, &clock, "w1").await;
    w.coordinator.leader.set_state(true, false).await.unwrap();
    w.coordinator
        .groups
        .set_state(Some("G"), true, false)
        .await
        .unwrap();
    (w, clock)
}

/// 리더가 아니면 스윕하지 않음
#[tokio::test]
async fn test_sweep_requires_leadership() {
    init_tracing();
    let store = MemoryStore::new();
    let clock = ManualClock::new(NOW);
    let w = open_window(&store, &clock, "w1").await;
    w.coordinator
        .groups
        .set_state(Some("G"), true, false)
        .await
        .unwrap();
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 30_000))
        .await
        .unwrap();

    let report = w.coordinator.tabs.sweep().await;

    assert_eq!(report, SweepReport::default());
    assert!(w.contexts.calls().is_empty());
}

/// 조정된 종료 60초 전이 지났으면 즉시 열기
#[tokio::test]
async fn test_sweep_opens_due_article() {
    let (w, _clock) = leader_window().await;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 30_000))
        .await
        .unwrap();

    let report = w.coordinator.tabs.sweep().await;

    assert_eq!(report.opened, 1);
    assert_eq!(w.contexts.calls(), vec!["open:A".to_string()]);
    let article = w.coordinator.registry.get("A").unwrap();
    assert_eq!(article.execution_context.as_deref(), Some("ctx-1"));
    assert!(w
        .coordinator
        .event_log
        .entries("A")
        .iter()
        .any(|e| e.message == "tab ctx-1 opened for bidding"));

    // 이미 열린 탭은 다시 열지 않는다
    let again = w.coordinator.tabs.sweep().await;
    assert_eq!(again, SweepReport::default());
    assert_eq!(w.contexts.count("open:"), 1);
}

/// 탐색 구간 밖 아티클은 건드리지 않음
#[tokio::test]
async fn test_far_future_article_ignored() {
    let (w, _clock) = leader_window().await;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 200_000))
        .await
        .unwrap();

    assert!(w.coordinator.tabs.plan(NOW).is_empty());
    assert_eq!(
        w.coordinator.tabs.eligibility("A", NOW),
        Err("outside the tab lookahead window".to_string())
    );
}

/// 계획: 조정된 종료 60초 전에 열기 예약
#[tokio::test]
async fn test_plan_schedules_open_before_end() {
    let (w, _clock) = leader_window().await;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 80_000))
        .await
        .unwrap();

    assert_eq!(
        w.coordinator.tabs.plan(NOW),
        vec![TabAction::OpenAt {
            article_id: "A".to_string(),
            at: NOW + 20_000,
        }]
    );
}

/// 예약된 열기는 한 번만 걸리고 시간이 되면 실행됨
#[tokio::test(start_paused = true)]
async fn test_scheduled_open_fires_once() {
    let (w, _clock) = leader_window().await;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 80_000))
        .await
        .unwrap();

    assert_eq!(w.coordinator.tabs.sweep().await.scheduled, 1);
    assert_eq!(w.coordinator.tabs.sweep().await.scheduled, 0);
    assert!(w.contexts.calls().is_empty());

    tokio::time::sleep(Duration::from_secs(21)).await;

    assert_eq!(w.contexts.count("open:"), 1);
    assert!(w
        .coordinator
        .registry
        .get("A")
        .unwrap()
        .execution_context
        .is_some());
}

/// 열린 탭 재사용
#[tokio::test]
async fn test_existing_context_reused() {
    let (w, _clock) = leader_window().await;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 30_000))
        .await
        .unwrap();

    let first = w.coordinator.tabs.open_if_eligible("A").await.unwrap();
    let second = w.coordinator.tabs.open_if_eligible("A").await.unwrap();

    assert_eq!(first.as_deref(), Some("ctx-1"));
    assert_eq!(first, second);
    assert_eq!(w.contexts.count("open:"), 1);
}

/// 열기 실패는 재시도 후 아티클 로그에 에러로 남김
#[tokio::test(start_paused = true)]
async fn test_open_gives_up_after_retries() {
    let (w, _clock) = leader_window().await;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 30_000))
        .await
        .unwrap();
    w.contexts.fail_next_opens(3);

    let err = w.coordinator.tabs.open_if_eligible("A").await.unwrap_err();

    assert!(matches!(
        err,
        CoordinatorError::ExecutionContextUnavailable { attempts: 3, .. }
    ));
    assert_eq!(w.contexts.count("open:"), 3);
    let last = w.coordinator.event_log.entries("A").pop().unwrap();
    assert_eq!(last.level, LogLevel::Error);
    assert!(last.message.contains("tab host unreachable"));
}

/// 일시적 실패는 재시도로 복구
#[tokio::test(start_paused = true)]
async fn test_open_recovers_on_retry() {
    let (w, _clock) = leader_window().await;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 30_000))
        .await
        .unwrap();
    w.contexts.fail_next_opens(1);

    let opened = w.coordinator.tabs.open_if_eligible("A").await.unwrap();

    assert_eq!(opened.as_deref(), Some("ctx-1"));
    assert_eq!(w.contexts.count("open:"), 2);
}

/// 카운트다운이 멈춘 탭은 새로고침 (최소 간격 유지)
#[tokio::test]
async fn test_frozen_countdown_reloaded() {
    let (w, clock) = leader_window().await;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 85_000))
        .await
        .unwrap();
    w.coordinator.tabs.open_if_eligible("A").await.unwrap();

    clock.advance(61_000);
    assert_eq!(
        w.coordinator.tabs.plan(clock.now_ms()),
        vec![TabAction::Reload {
            article_id: "A".to_string(),
            context_id: "ctx-1".to_string(),
        }]
    );
    assert_eq!(w.coordinator.tabs.sweep().await.reloaded, 1);
    assert_eq!(w.coordinator.tabs.sweep().await.reloaded, 0);
    assert_eq!(w.contexts.count("reload:ctx-1"), 1);
}

/// 카운트다운 갱신이 있으면 새로고침하지 않음
#[tokio::test]
async fn test_heartbeat_prevents_reload() {
    let (w, clock) = leader_window().await;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 85_000))
        .await
        .unwrap();
    w.coordinator.tabs.open_if_eligible("A").await.unwrap();

    clock.advance(45_000);
    w.coordinator.tabs.on_heartbeat("A");
    clock.advance(45_000);

    assert_eq!(w.coordinator.tabs.sweep().await.reloaded, 0);
    assert_eq!(w.contexts.count("reload:"), 0);
}

/// 사용자가 보고 있지 않으면 탭을 닫고 아티클 의도는 유지
#[tokio::test]
async fn test_close_unattended_tab() {
    let (w, _clock) = leader_window().await;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 30_000))
        .await
        .unwrap();
    w.coordinator.tabs.open_if_eligible("A").await.unwrap();

    assert!(w.coordinator.tabs.close_if_unattended("A").await.unwrap());

    assert_eq!(w.contexts.count("close:ctx-1"), 1);
    let article = w.coordinator.registry.get("A").unwrap();
    assert!(article.execution_context.is_none());
    assert!(article.max_bid.is_some());
}

/// 사용자가 보고 있거나 상태를 모르면 닫지 않음
#[tokio::test]
async fn test_attended_or_unknown_tab_kept() {
    let (w, _clock) = leader_window().await;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 30_000))
        .await
        .unwrap();
    w.coordinator.tabs.open_if_eligible("A").await.unwrap();

    w.contexts.set_user_active(Some(true));
    assert!(!w.coordinator.tabs.close_if_unattended("A").await.unwrap());

    w.contexts.set_user_active(None);
    assert!(!w.coordinator.tabs.close_if_unattended("A").await.unwrap());

    assert_eq!(w.contexts.count("close:"), 0);
    let last = w.coordinator.event_log.entries("A").pop().unwrap();
    assert_eq!(last.level, LogLevel::Warn);
}

/// 경매 결과가 확정되면 10초 후 탭 닫기
#[tokio::test(start_paused = true)]
async fn test_tab_closed_after_auction_end() {
    let (w, _clock) = leader_window().await;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 30_000))
        .await
        .unwrap();
    w.coordinator.tabs.open_if_eligible("A").await.unwrap();

    w.coordinator
        .dispatch(ContextMessage::AuctionEndStateChanged {
            article_id: "A".to_string(),
            detail: EndStateDetail {
                auction_end_state: AuctionEndState::Purchased,
            },
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(w.contexts.count("close:"), 0);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(w.contexts.count("close:ctx-1"), 1);
}

/// 새로고침 요청: 탭이 없으면 로그만, 있으면 요청 후 최소 간격 유지
#[tokio::test]
async fn test_refresh_article() {
    let (w, _clock) = leader_window().await;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 30_000))
        .await
        .unwrap();
    w.coordinator
        .observe(auto_bid_article("B", "G", NOW + 300_000))
        .await
        .unwrap();
    w.coordinator.tabs.open_if_eligible("A").await.unwrap();

    assert!(!w.coordinator.tabs.refresh_article("B").await.unwrap());
    assert!(w
        .coordinator
        .event_log
        .entries("B")
        .iter()
        .any(|e| e.message == "refresh requested but no tab is open"));

    assert!(w.coordinator.tabs.refresh_article("A").await.unwrap());
    assert!(!w.coordinator.tabs.refresh_article("A").await.unwrap());
    assert_eq!(w.contexts.count("refresh:ctx-1"), 1);
}

/// 입찰 잠금이 걸린 형제도 탭은 받음 (잠금은 열린 탭이 입찰 직전에 확인)
#[tokio::test(start_paused = true)]
async fn test_locked_sibling_still_gets_tab() {
    let (w, _clock) = leader_window().await;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 60_000))
        .await
        .unwrap();
    w.coordinator
        .observe(auto_bid_article("B", "G", NOW + 65_000))
        .await
        .unwrap();
    assert!(w.coordinator.scheduler.bid_lock_state("B").unwrap().locked);
    assert_eq!(w.coordinator.tabs.eligibility("B", NOW), Ok(NOW + 65_000));

    let report = w.coordinator.tabs.sweep().await;

    assert_eq!(report.opened, 1);
    assert_eq!(report.scheduled, 1);
    assert_eq!(w.contexts.calls(), vec!["open:A".to_string()]);

    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(
        w.contexts.calls(),
        vec!["open:A".to_string(), "open:B".to_string()]
    );
    let b = w.coordinator.registry.get("B").unwrap();
    assert_eq!(b.execution_context.as_deref(), Some("ctx-2"));
}

/// 경매 결과가 확정되면 같은 그룹 형제만 바로 다시 계획
#[tokio::test]
async fn test_outcome_replans_group_siblings() {
    let (w, _clock) = leader_window().await;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 30_000))
        .await
        .unwrap();
    w.coordinator.tabs.open_if_eligible("A").await.unwrap();
    w.coordinator
        .observe(auto_bid_article("B", "G", NOW + 35_000))
        .await
        .unwrap();
    w.coordinator
        .observe(auto_bid_article("C", "H", NOW + 36_000))
        .await
        .unwrap();
    w.coordinator
        .groups
        .set_state(Some("H"), true, false)
        .await
        .unwrap();

    w.coordinator
        .dispatch(ContextMessage::AuctionEndStateChanged {
            article_id: "A".to_string(),
            detail: EndStateDetail {
                auction_end_state: AuctionEndState::Overbid,
            },
        })
        .await
        .unwrap();

    let contexts = w.contexts.clone();
    assert!(wait_until(|| contexts.count("open:B") == 1).await);
    assert_eq!(w.contexts.count("open:C"), 0);
    assert_eq!(w.contexts.count("open:A"), 1);
}

/// 한 아티클의 열기 실패가 같은 스윕의 다른 아티클을 막지 않음
#[tokio::test(start_paused = true)]
async fn test_failed_open_does_not_block_siblings() {
    let (w, _clock) = leader_window().await;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 30_000))
        .await
        .unwrap();
    w.coordinator
        .observe(auto_bid_article("B", "G", NOW + 45_000))
        .await
        .unwrap();
    w.contexts.fail_next_opens(3);

    let report = w.coordinator.tabs.sweep().await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.opened, 1);
    assert_eq!(w.contexts.count("open:A"), 3);
    assert_eq!(w.contexts.count("open:B"), 1);
    let b = w.coordinator.registry.get("B").unwrap();
    assert_eq!(b.execution_context.as_deref(), Some("ctx-1"));
    assert!(w.coordinator.registry.get("A").unwrap().execution_context.is_none());
}

/// 예약된 열기가 실패하면 아티클 로그에 남김
#[tokio::test(start_paused = true)]
async fn test_scheduled_open_failure_logged() {
    let (w, _clock) = leader_window().await;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 80_000))
        .await
        .unwrap();
    assert_eq!(w.coordinator.tabs.sweep().await.scheduled, 1);
    w.contexts.fail_next_opens(3);

    tokio::time::sleep(Duration::from_secs(22)).await;

    assert_eq!(w.contexts.count("open:A"), 3);
    let last = w.coordinator.event_log.entries("A").pop().unwrap();
    assert_eq!(last.level, LogLevel::Error);
    assert!(last.message.starts_with("scheduled open failed"));
}

/// 탭을 닫거나 아티클을 버리면 추적 상태 정리
#[tokio::test]
async fn test_tracking_pruned_on_close_and_discard() {
    let (w, _clock) = leader_window().await;
    let tabs = &w.coordinator.tabs;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 30_000))
        .await
        .unwrap();
    w.coordinator
        .observe(auto_bid_article("B", "G", NOW + 300_000))
        .await
        .unwrap();
    tabs.open_if_eligible("A").await.unwrap();
    assert!(tabs.refresh_article("A").await.unwrap());
    tabs.on_heartbeat("B");
    assert_eq!(tabs.tracked_articles(), 2);

    assert!(tabs.close_if_unattended("A").await.unwrap());
    assert_eq!(tabs.tracked_articles(), 1);

    assert!(w.coordinator.discard_article("B").await.unwrap());
    assert_eq!(tabs.tracked_articles(), 0);
    assert!(!w.coordinator.discard_article("B").await.unwrap());
}

/// 열기 조건 검사 순서
#[tokio::test]
async fn test_eligibility_reasons() {
    let (w, _clock) = leader_window().await;
    w.coordinator
        .observe(auto_bid_article("A", "G", NOW + 30_000))
        .await
        .unwrap();
    assert_eq!(w.coordinator.tabs.eligibility("A", NOW), Ok(NOW + 30_000));

    w.coordinator
        .observe(ArticleObservation {
            auction_end_state: Some(AuctionEndState::Overbid),
            ..ArticleObservation::new("A")
        })
        .await
        .unwrap();
    assert_eq!(
        w.coordinator.tabs.eligibility("A", NOW),
        Err("auction outcome already known".to_string())
    );

    w.coordinator
        .groups
        .set_state(Some("G"), false, false)
        .await
        .unwrap();
    assert_eq!(
        w.coordinator.tabs.eligibility("A", NOW),
        Err("auto-bid is off for group G".to_string())
    );
    assert_eq!(
        w.coordinator.tabs.eligibility("missing", NOW),
        Err("unknown article".to_string())
    );
}
