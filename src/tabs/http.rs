/// HTTP로 탭 호스트를 제어하는 실행 컨텍스트
// region:    --- Imports
use super::ExecutionContext;
use crate::article::ContextId;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

// endregion: --- Imports

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenTabRequest<'a> {
    article_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenTabResponse {
    context_id: ContextId,
}

#[derive(Deserialize)]
struct TabStatusResponse {
    active: bool,
}

pub struct HttpExecutionContext {
    client: Client,
    base_url: String,
}

impl HttpExecutionContext {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn tab_url(&self, context_id: &str) -> String {
        format!("{}/tabs/{}", self.base_url, context_id)
    }

    async fn post_empty(&self, url: String) -> Result<(), String> {
        self.client
            .post(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionContext for HttpExecutionContext {
    async fn open(&self, article_id: &str) -> Result<ContextId, String> {
        let response: OpenTabResponse = self
            .client
            .post(format!("{}/tabs", self.base_url))
            .json(&OpenTabRequest { article_id })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;
        info!(
            "{:<12} --> 탭 열림: article={}, context={}",
            "TabHost", article_id, response.context_id
        );
        Ok(response.context_id)
    }

    async fn close(&self, context_id: &str) -> Result<(), String> {
        self.client
            .delete(self.tab_url(context_id))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn reload(&self, context_id: &str) -> Result<(), String> {
        self.post_empty(format!("{}/reload", self.tab_url(context_id)))
            .await
    }

    async fn request_refresh(&self, context_id: &str) -> Result<(), String> {
        self.post_empty(format!("{}/refresh", self.tab_url(context_id)))
            .await
    }

    async fn is_user_active(&self, context_id: &str) -> Result<bool, String> {
        let status: TabStatusResponse = self
            .client
            .get(self.tab_url(context_id))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;
        Ok(status.active)
    }
}
