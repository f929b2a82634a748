/// 펄렌슈누어(진주 목걸이) 시간 분산
/// 같은 그룹 형제 아티클의 입찰 시각을 충돌 구간 이상 벌려 놓는다.
/// 가장 늦게 끝나는 아티클은 그대로 두고, 앞쪽 아티클을 뒤 아티클 기준으로 당긴다.

use super::CollisionPolicy;
use crate::article::ArticleId;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaggerCandidate {
    pub article_id: ArticleId,
    pub end_time: i64,
}

impl StaggerCandidate {
    pub fn new(article_id: impl Into<ArticleId>, end_time: i64) -> Self {
        Self {
            article_id: article_id.into(),
            end_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaggeredTime {
    pub article_id: ArticleId,
    pub end_time: i64,
    pub original_end_time: i64,
    pub adjustment_reason: Option<String>,
    /// 이동이 필요했지만 너무 늦어 건너뜀
    pub late_skip: bool,
}

impl StaggeredTime {
    pub fn is_shifted(&self) -> bool {
        self.end_time != self.original_end_time
    }
}

/// 입찰 잠금과 공유하는 정렬 순서: 종료 시각, 그다음 ID
pub fn sort_key_cmp(a: (i64, &str), b: (i64, &str)) -> std::cmp::Ordering {
    a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1))
}

/// 모든 후보 분산. 결과는 원래 시각 기준 `(end_time, id)` 오름차순.
pub fn stagger_all(
    candidates: &[StaggerCandidate],
    now: i64,
    policy: &CollisionPolicy,
) -> Vec<StaggeredTime> {
    let mut sorted: Vec<&StaggerCandidate> = candidates.iter().collect();
    sorted.sort_by(|a, b| {
        sort_key_cmp(
            (a.end_time, a.article_id.as_str()),
            (b.end_time, b.article_id.as_str()),
        )
    });

    let mut out: Vec<StaggeredTime> = sorted
        .iter()
        .map(|c| StaggeredTime {
            article_id: c.article_id.clone(),
            end_time: c.end_time,
            original_end_time: c.end_time,
            adjustment_reason: None,
            late_skip: false,
        })
        .collect();

    let mut previous: Option<usize> = None;
    for i in (0..out.len()).rev() {
        if let Some(p) = previous {
            let prev_end = out[p].end_time;
            if prev_end - out[i].end_time < policy.collision_window_ms {
                let shifted = prev_end - policy.collision_window_ms;
                if shifted - now < policy.min_lead_ms {
                    warn!(
                        "{:<12} --> [{}] collides with {} but shifting to {} is too late, keeping {}",
                        "Perlenschnur", out[i].article_id, out[p].article_id, shifted, out[i].end_time
                    );
                    out[i].late_skip = true;
                } else {
                    let shift_ms = out[i].end_time - shifted;
                    out[i].adjustment_reason = Some(format!(
                        "bid time moved {}s earlier to stay clear of article {}",
                        format_seconds(shift_ms),
                        out[p].article_id
                    ));
                    out[i].end_time = shifted;
                }
            }
        }
        previous = Some(i);
    }

    out
}

/// 단일 아티클의 분산 결과. 후보가 아니면 None.
pub fn stagger(
    candidates: &[StaggerCandidate],
    article_id: &str,
    now: i64,
    policy: &CollisionPolicy,
) -> Option<StaggeredTime> {
    stagger_all(candidates, now, policy)
        .into_iter()
        .find(|t| t.article_id == article_id)
}

fn format_seconds(ms: i64) -> String {
    if ms % 1000 == 0 {
        (ms / 1000).to_string()
    } else {
        format!("{:.1}", ms as f64 / 1000.0)
    }
}
