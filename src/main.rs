// region:    --- Imports
use axum::extract::DefaultBodyLimit;
use snipe_coordinator::clock::SystemClock;
use snipe_coordinator::config::{Config, StoreBackend};
use snipe_coordinator::coordinator::Coordinator;
use snipe_coordinator::database::DatabaseManager;
use snipe_coordinator::message_broker::{KafkaManager, CHANGE_TOPIC};
use snipe_coordinator::rpc;
use snipe_coordinator::store::{ChangeFeed, MemoryStore, PostgresStore, ReplicatedStore};
use snipe_coordinator::tabs::HttpExecutionContext;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
// endregion: --- Imports

// region:    --- Main
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // logging 초기화
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .without_time()
        .with_target(false)
        .init();

    let config = Config::from_env();
    info!(
        "{:<12} --> 윈도우 시작: install={}, window={}",
        "Main", config.install_id, config.window_id
    );

    // 복제 저장소 선택
    let store: Arc<dyn ReplicatedStore> = match config.store_backend {
        StoreBackend::Memory => {
            info!("{:<12} --> 인메모리 저장소 사용", "Main");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .clone()
                .ok_or("DATABASE_URL 환경 변수가 필요합니다")?;

            // DatabaseManager 생성 및 스키마 초기화
            let db_manager = Arc::new(DatabaseManager::new(&database_url).await?);
            if let Err(e) = db_manager.initialize_schema().await {
                error!("{:<12} --> 데이터베이스 초기화 실패: {:?}", "Main", e);
                return Err(e.into());
            }
            info!("{:<12} --> 데이터베이스 초기화 성공", "Main");

            // 윈도우마다 별도 컨슈머 그룹으로 모든 변경을 받는다
            let group_id = format!("store-watch-{}-{}", config.install_id, config.window_id);
            let kafka_manager = KafkaManager::new(&config.kafka_brokers, &group_id)?;
            kafka_manager.create_topic(CHANGE_TOPIC, 1, 1).await?;
            info!("{:<12} --> Kafka 초기화 성공", "Main");

            let feed = ChangeFeed::new(kafka_manager.get_producer());
            let pg_store = PostgresStore::new(db_manager, feed);
            pg_store.start_change_feed(kafka_manager.get_consumer());
            Arc::new(pg_store)
        }
    };

    let contexts = Arc::new(HttpExecutionContext::new(&config.tab_host_url));
    let bind_addr = config.bind_addr.clone();
    let coordinator = Coordinator::new(config, store, contexts, Arc::new(SystemClock));
    coordinator.init().await?;
    coordinator.start();

    // 탭 스크립트 호출을 위한 cors 설정
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let routes_all = rpc::router(Arc::clone(&coordinator))
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024));

    let listener = TcpListener::bind(&bind_addr).await?;
    info!(
        "{:<12} --> Web Server: Listening on {}",
        "Main",
        listener.local_addr()?
    );

    // 서버 실행 (Ctrl+C 시 종료)
    if let Err(err) = axum::serve(listener, routes_all.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    {
        error!("{:<12} --> Server error: {}", "Main", err);
    }

    coordinator.shutdown().await;
    Ok(())
}
// endregion: --- Main
