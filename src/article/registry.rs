/// 아티클 레지스트리
/// 윈도우별 인메모리 아티클 테이블. 페이지 관찰 결과와 복제 저장소 상태를 병합한다.
/// 저장소 병합은 필드 단위 last-write-wins이며 벡터 클록은 쓰지 않는다.
/// 두 윈도우가 같은 필드를 동시에 쓰면 나중에 관찰된 쓰기가 이기고 다른 쪽은 사라질 수 있다.
// region:    --- Imports
use super::model::{
    Article, ArticleDiff, ArticleField, ArticleId, ArticleObservation, ContextId,
    PersistedArticle,
};
use crate::error::Result;
use crate::store::{is_article_key, ReplicatedStore, StoreChange};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

// endregion: --- Imports

// region:    --- Remove Outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// 선호 설정도 탭도 없어 삭제됨
    Dropped,
    /// 사용자 의도가 남아 있어 탭 참조만 해제됨
    ContextCleared,
    NotFound,
}

// endregion: --- Remove Outcome

// region:    --- Article Registry
pub struct ArticleRegistry {
    store: Arc<dyn ReplicatedStore>,
    articles: RwLock<HashMap<ArticleId, Article>>,
}

impl ArticleRegistry {
    pub fn new(store: Arc<dyn ReplicatedStore>) -> Self {
        Self {
            store,
            articles: RwLock::new(HashMap::new()),
        }
    }

    /// 저장소에 있는 모든 아티클 레코드를 읽어 병합
    pub async fn load(&self) -> Result<usize> {
        let all = self.store.get_all().await?;
        let mut loaded = 0;
        let mut articles = self.articles.write();
        for (key, value) in all.into_iter().filter(|(k, _)| is_article_key(k)) {
            match serde_json::from_value::<PersistedArticle>(value) {
                Ok(record) => {
                    articles
                        .entry(key.clone())
                        .or_insert_with(|| Article::new(key.clone()))
                        .apply_persisted(&record);
                    loaded += 1;
                }
                Err(e) => warn!("{:<12} --> 레코드 파싱 실패 {}: {}", "Registry", key, e),
            }
        }
        info!("{:<12} --> 저장소에서 {}개 아티클 로드", "Registry", loaded);
        Ok(loaded)
    }

    /// 관찰 결과 병합
    /// 저장 대상 필드가 바뀌면 저장소에 write-through 한다.
    pub async fn upsert(&self, obs: ArticleObservation) -> Result<ArticleDiff> {
        let id = obs.article_id.clone();
        let (diff, local, should_persist) = {
            let mut articles = self.articles.write();
            let article = articles
                .entry(id.clone())
                .or_insert_with(|| Article::new(id.clone()));
            let diff = article.merge(&obs);
            let should_persist = diff.touches_persisted()
                && (article.has_preferences() || article.auto_bid || diff.touches_preferences());
            (diff, article.persisted(), should_persist)
        };

        if !diff.is_empty() {
            debug!("{:<12} --> {} 변경: {:?}", "Registry", id, diff.fields());
        }
        if should_persist {
            self.write_through(&id, &diff, &local).await?;
        }
        Ok(diff)
    }

    /// 변경된 필드만 원격 레코드 위에 덮어쓴다
    async fn write_through(
        &self,
        id: &str,
        diff: &ArticleDiff,
        local: &PersistedArticle,
    ) -> Result<()> {
        let remote = self.store.get(id).await?;
        let local_map = match serde_json::to_value(local) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => return Err(crate::error::StoreError::from(e).into()),
        };

        let merged = match remote {
            Some(Value::Object(mut remote_map)) => {
                for key in diff.fields().into_iter().filter_map(ArticleField::persisted_key) {
                    match local_map.get(key) {
                        Some(value) => remote_map.insert(key.to_string(), value.clone()),
                        None => remote_map.remove(key),
                    };
                }
                remote_map
            }
            _ => local_map,
        };

        let merged = Value::Object(merged);
        self.store.set(id, merged.clone()).await?;

        // 이번에 쓰지 않은 필드는 원격 값을 따른다
        if let Ok(record) = serde_json::from_value::<PersistedArticle>(merged) {
            if let Some(article) = self.articles.write().get_mut(id) {
                article.apply_persisted(&record);
            }
        }
        Ok(())
    }

    /// 저장소 변경 알림 반영 (다시 쓰지 않는다)
    pub fn apply_remote(&self, change: &StoreChange) -> ArticleDiff {
        if !is_article_key(&change.key) {
            return ArticleDiff::default();
        }
        let mut articles = self.articles.write();
        match &change.new_value {
            Some(value) => match serde_json::from_value::<PersistedArticle>(value.clone()) {
                Ok(record) => articles
                    .entry(change.key.clone())
                    .or_insert_with(|| Article::new(change.key.clone()))
                    .apply_persisted(&record),
                Err(e) => {
                    warn!(
                        "{:<12} --> 원격 레코드 파싱 실패 {}: {}",
                        "Registry", change.key, e
                    );
                    ArticleDiff::default()
                }
            },
            None => {
                let Some(article) = articles.get_mut(&change.key) else {
                    return ArticleDiff::default();
                };
                let diff = article.clear_preferences();
                if article.execution_context.is_none() {
                    articles.remove(&change.key);
                }
                diff
            }
        }
    }

    /// 아티클 제거
    /// 사용자 의도가 남아 있으면 탭 참조만 해제한다.
    pub fn remove(&self, id: &str) -> RemoveOutcome {
        let mut articles = self.articles.write();
        let Some(article) = articles.get_mut(id) else {
            return RemoveOutcome::NotFound;
        };
        if !article.is_ephemeral() {
            article.execution_context = None;
            return RemoveOutcome::ContextCleared;
        }
        articles.remove(id);
        debug!("{:<12} --> {} 제거", "Registry", id);
        RemoveOutcome::Dropped
    }

    /// 사용자가 명시적으로 버린 아티클 (저장소에서도 삭제)
    pub async fn discard(&self, id: &str) -> Result<()> {
        self.articles.write().remove(id);
        self.store.remove(id).await?;
        info!("{:<12} --> {} 삭제", "Registry", id);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Article> {
        self.articles.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.articles.read().contains_key(id)
    }

    pub fn snapshot(&self) -> Vec<Article> {
        self.articles.read().values().cloned().collect()
    }

    /// 같은 그룹 이름을 가진 아티클 (예약 이름 포함)
    pub fn group_members(&self, group: &str) -> Vec<Article> {
        self.articles
            .read()
            .values()
            .filter(|a| a.group_name() == group)
            .cloned()
            .collect()
    }

    /// 사용 중인 그룹 이름
    pub fn group_names(&self) -> HashSet<String> {
        self.articles
            .read()
            .values()
            .filter_map(|a| a.group.clone())
            .collect()
    }

    pub fn attach_context(&self, id: &str, context_id: ContextId) -> bool {
        match self.articles.write().get_mut(id) {
            Some(article) => {
                article.execution_context = Some(context_id);
                true
            }
            None => false,
        }
    }

    pub fn detach_context(&self, id: &str) -> Option<ContextId> {
        self.articles
            .write()
            .get_mut(id)
            .and_then(|a| a.execution_context.take())
    }

    /// 조정된 종료 시각 기록. 이전 값과 다르면 true.
    pub fn set_adjusted_end_time(&self, id: &str, adjusted: Option<i64>) -> bool {
        match self.articles.write().get_mut(id) {
            Some(article) if article.adjusted_end_time != adjusted => {
                article.adjusted_end_time = adjusted;
                true
            }
            _ => false,
        }
    }
}

// endregion: --- Article Registry
