/// 저장소 변경 알림 전송 (Kafka)
/// 모든 윈도우가 모든 변경을 받아야 하므로 윈도우마다 별도 컨슈머 그룹을 쓴다.
// region:    --- Imports
use crate::store::{ChangePublisher, StoreChange};
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// endregion: --- Imports

/// 변경 알림 토픽
pub const CHANGE_TOPIC: &str = "store-changes";

// region:    --- Kafka Producer
#[derive(Clone)]
pub struct KafkaProducer {
    producer: Arc<FutureProducer>,
}

impl KafkaProducer {
    pub fn new(brokers: &str) -> Result<Self, String> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| format!("Producer creation error: {:?}", e))?;

        Ok(KafkaProducer {
            producer: Arc::new(producer),
        })
    }

    /// 변경 알림 발행 (키 = 저장소 키, 같은 키의 순서는 파티션 내에서 유지)
    pub async fn send_change(&self, change: &StoreChange) -> Result<(), String> {
        let payload = serde_json::to_string(change).map_err(|e| e.to_string())?;
        debug!(
            "{:<12} --> 변경 알림 전송: topic={}, key={}",
            "Producer", CHANGE_TOPIC, change.key
        );
        let record = FutureRecord::to(CHANGE_TOPIC)
            .key(&change.key)
            .payload(&payload);

        self.producer
            .send(record, Duration::from_secs(0))
            .await
            .map_err(|(e, _)| format!("Error sending message: {:?}", e))?;

        Ok(())
    }
}

#[async_trait]
impl ChangePublisher for KafkaProducer {
    async fn publish(&self, change: &StoreChange) -> Result<(), String> {
        self.send_change(change).await
    }
}

// endregion: --- Kafka Producer

// region:    --- Kafka Consumer
pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
}

impl KafkaConsumer {
    pub fn new(brokers: &str, group_id: &str) -> Result<Self, String> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            // 윈도우는 시작 시 저장소 전체를 읽으므로 과거 변경은 필요 없다
            .set("auto.offset.reset", "latest")
            .set("session.timeout.ms", "6000")
            .set("allow.auto.create.topics", "true")
            .create()
            .map_err(|e| format!("Consumer creation failed: {:?}", e))?;

        Ok(KafkaConsumer {
            consumer: Arc::new(consumer),
        })
    }

    /// 변경 알림 소비
    pub async fn consume_changes<F>(&self, handler: F) -> Result<(), String>
    where
        F: Fn(StoreChange) + Send + 'static,
    {
        info!(
            "{:<12} --> 변경 알림 소비 시작: topic={}",
            "Consumer", CHANGE_TOPIC
        );
        self.consumer
            .subscribe(&[CHANGE_TOPIC])
            .map_err(|e| e.to_string())?;

        loop {
            match self.consumer.recv().await {
                Ok(message) => match message.payload() {
                    Some(payload) => match serde_json::from_slice::<StoreChange>(payload) {
                        Ok(change) => handler(change),
                        Err(e) => error!("{:<12} --> deserialize 오류: {:?}", "Consumer", e),
                    },
                    None => warn!("{:<12} --> 빈 페이로드 수신", "Consumer"),
                },
                Err(e) => error!("{:<12} --> 메시지 수신 오류: {:?}", "Consumer", e),
            }
        }
    }
}

// endregion: --- Kafka Consumer

// region:    --- Kafka Manager
pub struct KafkaManager {
    producer: Arc<KafkaProducer>,
    consumer: Arc<KafkaConsumer>,
    brokers: String,
}

impl KafkaManager {
    /// `group_id`는 윈도우마다 달라야 한다
    pub fn new(brokers: &str, group_id: &str) -> Result<Self, String> {
        Ok(KafkaManager {
            producer: Arc::new(KafkaProducer::new(brokers)?),
            consumer: Arc::new(KafkaConsumer::new(brokers, group_id)?),
            brokers: brokers.to_string(),
        })
    }

    /// 프로듀서 반환
    pub fn get_producer(&self) -> Arc<KafkaProducer> {
        Arc::clone(&self.producer)
    }

    /// 컨슈머 반환
    pub fn get_consumer(&self) -> Arc<KafkaConsumer> {
        Arc::clone(&self.consumer)
    }

    /// 토픽 생성 (이미 있으면 성공으로 처리)
    pub async fn create_topic(
        &self,
        topic_name: &str,
        num_partitions: i32,
        replication_factor: i32,
    ) -> Result<(), String> {
        info!("{:<12} --> Kafka 토픽 생성 시작: {}", "Manager", topic_name);

        let admin_client: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .create()
            .map_err(|e| format!("AdminClient 생성 실패: {:?}", e))?;

        let new_topic = NewTopic::new(
            topic_name,
            num_partitions,
            TopicReplication::Fixed(replication_factor),
        );

        match admin_client
            .create_topics(&[new_topic], &AdminOptions::new())
            .await
        {
            Ok(_) => {
                info!("{:<12} --> Kafka 토픽 준비 완료: {}", "Manager", topic_name);
                Ok(())
            }
            Err(e) => {
                error!("{:<12} --> Kafka 토픽 생성 실패: {:?}", "Manager", e);
                Err(format!("토픽 생성 실패: {:?}", e))
            }
        }
    }
}

// endregion: --- Kafka Manager
