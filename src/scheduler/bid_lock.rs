/// 입찰 직전 잠금 검사
/// 충돌 구간 안에서 먼저 끝나는 형제 아티클은 결과가 확정됐거나 이미 지고 있어야 한다.

use super::perlenschnur::sort_key_cmp;
use crate::article::{ArticleId, AuctionEndState, Price};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockCandidate {
    pub article_id: ArticleId,
    pub end_time: i64,
    pub auction_end_state: AuctionEndState,
    pub current_price: Option<Price>,
    pub max_bid: Option<Price>,
}

impl LockCandidate {
    /// 현재가가 최대 입찰가를 넘어 낙찰될 수 없음
    fn is_losing(&self) -> bool {
        match (&self.current_price, &self.max_bid) {
            (Some(price), Some(max)) => price.exceeds(max),
            (_, None) => true,
            (None, Some(_)) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidLockState {
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<ArticleId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BidLockState {
    pub fn unlocked() -> Self {
        Self {
            locked: false,
            blocked_by: None,
            reason: None,
        }
    }
}

pub fn check_bid_lock(
    candidates: &[LockCandidate],
    article_id: &str,
    collision_window_ms: i64,
) -> BidLockState {
    let mut sorted: Vec<&LockCandidate> = candidates.iter().collect();
    sorted.sort_by(|a, b| {
        sort_key_cmp(
            (a.end_time, a.article_id.as_str()),
            (b.end_time, b.article_id.as_str()),
        )
    });

    let Some(target_index) = sorted.iter().position(|c| c.article_id == article_id) else {
        return BidLockState::unlocked();
    };
    let target = sorted[target_index];

    for sibling in &sorted[..target_index] {
        if target.end_time - sibling.end_time > collision_window_ms {
            continue;
        }
        if sibling.auction_end_state.is_terminal() {
            continue;
        }
        if sibling.is_losing() {
            continue;
        }
        let gap_ms = target.end_time - sibling.end_time;
        return BidLockState {
            locked: true,
            blocked_by: Some(sibling.article_id.clone()),
            reason: Some(format!(
                "bid locked: article {} ends {}ms earlier and its outcome is still open",
                sibling.article_id, gap_ms
            )),
        };
    }

    BidLockState::unlocked()
}
