// region:    --- Imports
use super::ContextMessage;
use crate::coordinator::Coordinator;
use crate::error::{CoordinatorError, StoreError};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

// endregion: --- Imports

type AppState = State<Arc<Coordinator>>;

// region:    --- Router
pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/message", post(handle_message))
        .route(
            "/auto-bid",
            get(handle_get_auto_bid).post(handle_set_auto_bid),
        )
        .route("/auto-bid/toggle", post(handle_toggle_auto_bid))
        .route("/groups", get(handle_get_groups))
        .route(
            "/groups/:name/toggle-auto-bid",
            post(handle_toggle_group_auto_bid),
        )
        .route(
            "/groups/:name/toggle-bid-all",
            post(handle_toggle_group_bid_all),
        )
        .route(
            "/articles/:id",
            get(handle_get_article).delete(handle_discard_article),
        )
        .route("/articles/:id/log", get(handle_get_article_log))
        .with_state(coordinator)
}

// endregion: --- Router

// region:    --- Error Response
impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoordinatorError::Store(StoreError::QuotaExceeded { .. }) => {
                StatusCode::INSUFFICIENT_STORAGE
            }
            CoordinatorError::UnknownArticle(_) => StatusCode::NOT_FOUND,
            CoordinatorError::InvalidMessage(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::ExecutionContextUnavailable { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "error": self.to_string(), "code": self.code() });
        (status, Json(body)).into_response()
    }
}

// endregion: --- Error Response

// region:    --- Message Handler
/// 탭 메시지 처리
pub async fn handle_message(
    State(coordinator): AppState,
    payload: Result<Json<ContextMessage>, JsonRejection>,
) -> Result<Response, CoordinatorError> {
    let Json(message) =
        payload.map_err(|e| CoordinatorError::InvalidMessage(e.body_text()))?;
    let reply = coordinator.dispatch(message).await?;
    Ok(Json(reply).into_response())
}

// endregion: --- Message Handler

// region:    --- Auto Bid Handlers
#[derive(Debug, Deserialize)]
pub struct SetAutoBidRequest {
    pub enabled: bool,
    #[serde(default)]
    pub simulating: bool,
}

pub async fn handle_get_auto_bid(State(coordinator): AppState) -> Result<Response, CoordinatorError> {
    let state = coordinator.leader.get_state().await?;
    Ok(Json(state).into_response())
}

pub async fn handle_set_auto_bid(
    State(coordinator): AppState,
    Json(req): Json<SetAutoBidRequest>,
) -> Result<Response, CoordinatorError> {
    info!(
        "{:<12} --> 자동 입찰 설정: enabled={}, simulating={}",
        "Handler", req.enabled, req.simulating
    );
    let state = coordinator
        .leader
        .set_state(req.enabled, req.simulating)
        .await?;
    Ok(Json(state).into_response())
}

pub async fn handle_toggle_auto_bid(
    State(coordinator): AppState,
) -> Result<Response, CoordinatorError> {
    let state = coordinator.leader.toggle_state().await?;
    info!("{:<12} --> 자동 입찰 토글: {}", "Handler", state.enabled);
    Ok(Json(state).into_response())
}

// endregion: --- Auto Bid Handlers

// region:    --- Group Handlers
pub async fn handle_get_groups(State(coordinator): AppState) -> Result<Response, CoordinatorError> {
    let groups = coordinator.groups.get_all().await?;
    Ok(Json(groups).into_response())
}

pub async fn handle_toggle_group_auto_bid(
    State(coordinator): AppState,
    Path(name): Path<String>,
) -> Result<Response, CoordinatorError> {
    let state = coordinator.groups.toggle_auto_bid(Some(&name)).await?;
    info!("{:<12} --> 그룹 {} autoBid={}", "Handler", name, state.auto_bid);
    Ok(Json(state).into_response())
}

pub async fn handle_toggle_group_bid_all(
    State(coordinator): AppState,
    Path(name): Path<String>,
) -> Result<Response, CoordinatorError> {
    let state = coordinator.groups.toggle_bid_all(Some(&name)).await?;
    info!("{:<12} --> 그룹 {} bidAll={}", "Handler", name, state.bid_all);
    Ok(Json(state).into_response())
}

// endregion: --- Group Handlers

// region:    --- Article Handlers
pub async fn handle_get_article(
    State(coordinator): AppState,
    Path(id): Path<String>,
) -> Result<Response, CoordinatorError> {
    let article = coordinator
        .registry
        .get(&id)
        .ok_or(CoordinatorError::UnknownArticle(id))?;
    Ok(Json(article).into_response())
}

pub async fn handle_discard_article(
    State(coordinator): AppState,
    Path(id): Path<String>,
) -> Result<Response, CoordinatorError> {
    if !coordinator.discard_article(&id).await? {
        return Err(CoordinatorError::UnknownArticle(id));
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn handle_get_article_log(
    State(coordinator): AppState,
    Path(id): Path<String>,
) -> Result<Response, CoordinatorError> {
    Ok(Json(coordinator.event_log.entries(&id)).into_response())
}

// endregion: --- Article Handlers
