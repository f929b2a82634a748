/// 아티클 모델
// region:    --- Imports
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// endregion: --- Imports

pub type ArticleId = String;
pub type ContextId = String;

/// "그룹 없음"을 나타내는 예약 그룹 이름
pub const NO_GROUP: &str = "$$$nogroup$$$";

// region:    --- Price
/// 통화 단위가 붙은 금액 (최소 단위, 예: 센트)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub amount: i64,
    pub currency: String,
}

impl Price {
    pub fn new(amount: i64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    pub fn exceeds(&self, other: &Price) -> bool {
        self.amount > other.amount
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.abs();
        write!(f, "{}{}.{:02} {}", sign, abs / 100, abs % 100, self.currency)
    }
}

// endregion: --- Price

// region:    --- Auction End State
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuctionEndState {
    #[default]
    Unknown,
    Ended,
    Purchased,
    Overbid,
}

impl AuctionEndState {
    /// 결과가 확정된 상태
    pub fn is_terminal(self) -> bool {
        !matches!(self, AuctionEndState::Unknown)
    }
}

// endregion: --- Auction End State

// region:    --- Article Field
/// 변경 추적용 필드 이름
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ArticleField {
    EndTime,
    CurrentPrice,
    MinimumBid,
    BuyNowPrice,
    MaxBid,
    AutoBid,
    Group,
    AuctionEndState,
    AuctionStateText,
    PaymentMethods,
    ExecutionContext,
}

impl ArticleField {
    /// 저장소 레코드의 키 (저장 대상이 아니면 None)
    pub fn persisted_key(self) -> Option<&'static str> {
        match self {
            ArticleField::EndTime => Some("endTime"),
            ArticleField::MaxBid => Some("maxBid"),
            ArticleField::AutoBid => Some("autoBid"),
            ArticleField::Group => Some("group"),
            ArticleField::AuctionEndState => Some("auctionEndState"),
            _ => None,
        }
    }

    /// 사용자 의도(선호 설정) 필드
    pub fn is_preference(self) -> bool {
        matches!(
            self,
            ArticleField::MaxBid | ArticleField::AutoBid | ArticleField::Group
        )
    }
}

/// upsert 결과로 변경된 필드 집합
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArticleDiff(pub BTreeSet<ArticleField>);

impl ArticleDiff {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: ArticleField) -> bool {
        self.0.contains(&field)
    }

    pub fn insert(&mut self, field: ArticleField) {
        self.0.insert(field);
    }

    pub fn touches_persisted(&self) -> bool {
        self.0.iter().any(|f| f.persisted_key().is_some())
    }

    pub fn touches_preferences(&self) -> bool {
        self.0.iter().any(|f| f.is_preference())
    }

    pub fn fields(&self) -> Vec<ArticleField> {
        self.0.iter().copied().collect()
    }
}

// endregion: --- Article Field

// region:    --- Observation
/// 페이지 관찰 결과 또는 사용자 입력
/// 값이 있는 필드만 덮어쓰고 없는 필드는 유지한다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArticleObservation {
    pub article_id: ArticleId,
    pub end_time: Option<i64>,
    pub current_price: Option<Price>,
    pub minimum_bid: Option<Price>,
    pub buy_now_price: Option<Price>,
    pub auction_state_text: Option<String>,
    pub payment_methods: Option<Vec<String>>,
    pub auction_end_state: Option<AuctionEndState>,
    pub max_bid: Option<Price>,
    pub auto_bid: Option<bool>,
    /// `NO_GROUP` 또는 빈 문자열이면 그룹 해제
    pub group: Option<String>,
}

impl ArticleObservation {
    pub fn new(article_id: impl Into<ArticleId>) -> Self {
        Self {
            article_id: article_id.into(),
            ..Default::default()
        }
    }
}

// endregion: --- Observation

// region:    --- Persisted Record
/// 저장소 레코드 (키 = 아티클 ID)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedArticle {
    pub end_time: Option<i64>,
    pub max_bid: Option<Price>,
    pub auto_bid: bool,
    pub group: Option<String>,
    pub auction_end_state: AuctionEndState,
}

// endregion: --- Persisted Record

// region:    --- Article
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: ArticleId,
    /// 즉시 구매 전용이면 None
    pub end_time: Option<i64>,
    pub current_price: Option<Price>,
    pub minimum_bid: Option<Price>,
    pub buy_now_price: Option<Price>,
    pub max_bid: Option<Price>,
    pub auto_bid: bool,
    pub group: Option<String>,
    pub auction_end_state: AuctionEndState,
    pub auction_state_text: Option<String>,
    pub payment_methods: Vec<String>,
    /// 마지막으로 계산된 조정 종료 시각 (항상 end_time 이하)
    pub adjusted_end_time: Option<i64>,
    pub execution_context: Option<ContextId>,
}

impl Article {
    pub fn new(id: impl Into<ArticleId>) -> Self {
        Self {
            id: id.into(),
            end_time: None,
            current_price: None,
            minimum_bid: None,
            buy_now_price: None,
            max_bid: None,
            auto_bid: false,
            group: None,
            auction_end_state: AuctionEndState::Unknown,
            auction_state_text: None,
            payment_methods: Vec::new(),
            adjusted_end_time: None,
            execution_context: None,
        }
    }

    /// 그룹 이름 (없으면 예약 이름)
    pub fn group_name(&self) -> &str {
        self.group.as_deref().unwrap_or(NO_GROUP)
    }

    /// 저장할 사용자 의도가 있는지
    pub fn has_preferences(&self) -> bool {
        self.max_bid.is_some() || self.group.is_some()
    }

    /// 선호 설정도 열린 탭도 없는 아티클은 저장 없이 버려도 된다
    pub fn is_ephemeral(&self) -> bool {
        !self.has_preferences() && self.execution_context.is_none()
    }

    pub fn persisted(&self) -> PersistedArticle {
        PersistedArticle {
            end_time: self.end_time,
            max_bid: self.max_bid.clone(),
            auto_bid: self.auto_bid,
            group: self.group.clone(),
            auction_end_state: self.auction_end_state,
        }
    }

    /// 관찰 결과를 필드 단위로 병합하고 변경된 필드를 반환
    pub fn merge(&mut self, obs: &ArticleObservation) -> ArticleDiff {
        let mut diff = ArticleDiff::default();

        merge_field(&mut self.end_time, obs.end_time.map(Some), ArticleField::EndTime, &mut diff);
        merge_field(
            &mut self.current_price,
            obs.current_price.clone().map(Some),
            ArticleField::CurrentPrice,
            &mut diff,
        );
        merge_field(
            &mut self.minimum_bid,
            obs.minimum_bid.clone().map(Some),
            ArticleField::MinimumBid,
            &mut diff,
        );
        merge_field(
            &mut self.buy_now_price,
            obs.buy_now_price.clone().map(Some),
            ArticleField::BuyNowPrice,
            &mut diff,
        );
        merge_field(
            &mut self.auction_state_text,
            obs.auction_state_text.clone().map(Some),
            ArticleField::AuctionStateText,
            &mut diff,
        );
        merge_field(
            &mut self.payment_methods,
            obs.payment_methods.clone(),
            ArticleField::PaymentMethods,
            &mut diff,
        );
        merge_field(
            &mut self.max_bid,
            obs.max_bid.clone().map(Some),
            ArticleField::MaxBid,
            &mut diff,
        );
        merge_field(&mut self.auto_bid, obs.auto_bid, ArticleField::AutoBid, &mut diff);
        merge_field(
            &mut self.group,
            obs.group.as_deref().map(normalize_group),
            ArticleField::Group,
            &mut diff,
        );
        if let Some(state) = obs.auction_end_state {
            self.set_end_state(state, &mut diff);
        }

        diff
    }

    /// 저장소 레코드 병합 (원격 변경 또는 쓰기 후 병합 결과)
    pub fn apply_persisted(&mut self, record: &PersistedArticle) -> ArticleDiff {
        let mut diff = ArticleDiff::default();
        merge_field(&mut self.end_time, record.end_time.map(Some), ArticleField::EndTime, &mut diff);
        merge_field(&mut self.max_bid, Some(record.max_bid.clone()), ArticleField::MaxBid, &mut diff);
        merge_field(&mut self.auto_bid, Some(record.auto_bid), ArticleField::AutoBid, &mut diff);
        merge_field(
            &mut self.group,
            Some(record.group.as_deref().and_then(normalize_group)),
            ArticleField::Group,
            &mut diff,
        );
        self.set_end_state(record.auction_end_state, &mut diff);
        diff
    }

    /// 선호 설정 초기화 (원격 삭제)
    pub fn clear_preferences(&mut self) -> ArticleDiff {
        let mut diff = ArticleDiff::default();
        merge_field(&mut self.max_bid, Some(None), ArticleField::MaxBid, &mut diff);
        merge_field(&mut self.auto_bid, Some(false), ArticleField::AutoBid, &mut diff);
        merge_field(&mut self.group, Some(None), ArticleField::Group, &mut diff);
        diff
    }

    // 확정된 결과는 Unknown으로 되돌리지 않는다
    fn set_end_state(&mut self, state: AuctionEndState, diff: &mut ArticleDiff) {
        if state == self.auction_end_state {
            return;
        }
        if self.auction_end_state.is_terminal() && !state.is_terminal() {
            return;
        }
        self.auction_end_state = state;
        diff.insert(ArticleField::AuctionEndState);
    }
}

fn merge_field<T: PartialEq>(
    slot: &mut T,
    incoming: Option<T>,
    field: ArticleField,
    diff: &mut ArticleDiff,
) {
    if let Some(value) = incoming {
        if *slot != value {
            *slot = value;
            diff.insert(field);
        }
    }
}

fn normalize_group(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() || name == NO_GROUP {
        None
    } else {
        Some(name.to_string())
    }
}

// endregion: --- Article
