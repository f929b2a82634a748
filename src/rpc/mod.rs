/// 실행 컨텍스트(탭) ↔ 코디네이터 메시지
/// 탭이 입찰 직전에 호출하는 API는 getAutoBidState, getBidLockState, getAdjustedBidTime 세 가지다.
// region:    --- Imports
use crate::article::{ArticleField, ArticleId, ArticleObservation, AuctionEndState, Price};
use crate::scheduler::{AdjustedBidTime, BidLockState};
use serde::{Deserialize, Serialize};

// endregion: --- Imports

// region:    --- Modules
pub mod routes;

pub use routes::router;

// endregion: --- Modules

// region:    --- Messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "action",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ContextMessage {
    /// 페이지 관찰 결과 (카운트다운 갱신 포함)
    ArticleUpdated {
        article_id: ArticleId,
        #[serde(default)]
        detail: ArticleObservation,
    },
    MaxBidUpdated {
        article_id: ArticleId,
        detail: MaxBidDetail,
    },
    /// 탭이 다시 로드되어 재동기화 요청
    Refresh { article_id: ArticleId },
    AuctionEndStateChanged {
        article_id: ArticleId,
        detail: EndStateDetail,
    },
    GetAutoBidState { article_id: ArticleId },
    GetBidLockState { article_id: ArticleId },
    GetAdjustedBidTime { article_id: ArticleId },
}

impl ContextMessage {
    pub fn article_id(&self) -> &str {
        match self {
            ContextMessage::ArticleUpdated { article_id, .. }
            | ContextMessage::MaxBidUpdated { article_id, .. }
            | ContextMessage::Refresh { article_id }
            | ContextMessage::AuctionEndStateChanged { article_id, .. }
            | ContextMessage::GetAutoBidState { article_id }
            | ContextMessage::GetBidLockState { article_id }
            | ContextMessage::GetAdjustedBidTime { article_id } => article_id,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            ContextMessage::ArticleUpdated { .. } => "articleUpdated",
            ContextMessage::MaxBidUpdated { .. } => "maxBidUpdated",
            ContextMessage::Refresh { .. } => "refresh",
            ContextMessage::AuctionEndStateChanged { .. } => "auctionEndStateChanged",
            ContextMessage::GetAutoBidState { .. } => "getAutoBidState",
            ContextMessage::GetBidLockState { .. } => "getBidLockState",
            ContextMessage::GetAdjustedBidTime { .. } => "getAdjustedBidTime",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MaxBidDetail {
    pub max_bid: Option<Price>,
    pub auto_bid: Option<bool>,
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndStateDetail {
    pub auction_end_state: AuctionEndState,
}

// endregion: --- Messages

// region:    --- Replies
/// 아티클 기준 자동 입찰 허용 여부
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleAutoBidState {
    pub article_id: ArticleId,
    pub enabled: bool,
    pub simulating: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_owner_id: Option<String>,
    pub group_auto_bid: bool,
    pub article_auto_bid: bool,
    pub may_bid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub ok: bool,
    pub changed: Vec<ArticleField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ContextReply {
    Ack(Ack),
    AutoBid(ArticleAutoBidState),
    BidLock(BidLockState),
    AdjustedTime(AdjustedBidTime),
}

// endregion: --- Replies
