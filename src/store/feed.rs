/// 커밋된 변경의 전파
/// 정상일 때는 브로커를 거쳐 돌아온 알림(에코 포함)만 watch로 흘려보낸다.
/// 발행이 실패하면 쓰기는 이미 커밋됐으므로 로컬 구독자에게만 직접 전달한다.
// region:    --- Imports
use super::StoreChange;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::error;

// endregion: --- Imports

/// 변경 알림 발행 (Kafka 프로듀서 등)
#[async_trait]
pub trait ChangePublisher: Send + Sync {
    async fn publish(&self, change: &StoreChange) -> Result<(), String>;
}

pub struct ChangeFeed {
    publisher: Arc<dyn ChangePublisher>,
    local: broadcast::Sender<StoreChange>,
}

impl ChangeFeed {
    pub fn new(publisher: Arc<dyn ChangePublisher>) -> Self {
        let (local, _) = broadcast::channel(1024);
        Self { publisher, local }
    }

    /// 브로커에서 받은 알림을 넣는 송신자
    pub fn sender(&self) -> broadcast::Sender<StoreChange> {
        self.local.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.local.subscribe()
    }

    /// 커밋된 변경 발행. 실패해도 쓰기 결과는 바꾸지 않는다.
    pub async fn announce(&self, change: StoreChange) {
        if let Err(e) = self.publisher.publish(&change).await {
            error!(
                "{:<12} --> 변경 알림 발행 실패, 로컬에만 전달: key={}, {}",
                "ChangeFeed", change.key, e
            );
            let _ = self.local.send(change);
        }
    }
}
