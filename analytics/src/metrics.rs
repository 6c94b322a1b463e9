use crate::pagination::paginate;
use chrono::{DateTime, Utc};
use gateway::PullRequest;
use std::time::Duration;

const LONGEST_RUNNING_LIMIT: usize = 5;

/// Metrics derived from one collection of pull requests.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricsResult {
    pub developer: String,
    pub total: usize,
    pub open: usize,
    pub closed_unmerged: usize,
    pub merged: usize,
    /// Mean of `merged_at - created_at`; `None` when nothing was merged
    pub average_merge_time: Option<Duration>,
    /// Percentage rounded to two decimals
    pub success_rate: f64,
    pub page: usize,
    pub page_size: usize,
    pub prs: Vec<PullRequest>,
}

pub fn aggregate(
    developer: &str,
    items: &[PullRequest],
    page: usize,
    page_size: usize,
) -> MetricsResult {
    let mut open = 0;
    let mut closed_unmerged = 0;
    let mut merge_times = Vec::new();

    for pr in items {
        if let Some(merged_at) = pr.merged_at {
            merge_times.push(elapsed_ms(pr.created_at, merged_at));
        } else if pr.is_open() {
            open += 1;
        } else if pr.is_closed_unmerged() {
            closed_unmerged += 1;
        }
    }
    let merged = merge_times.len();

    tracing::debug!(
        developer,
        total = items.len(),
        open,
        closed_unmerged,
        merged,
        "aggregated pull requests"
    );

    MetricsResult {
        developer: developer.to_string(),
        total: items.len(),
        open,
        closed_unmerged,
        merged,
        average_merge_time: mean(&merge_times),
        success_rate: success_rate(merged, closed_unmerged),
        page,
        page_size,
        prs: paginate(items, page, page_size).to_vec(),
    }
}

fn success_rate(merged: usize, closed_unmerged: usize) -> f64 {
    let decided = merged + closed_unmerged;
    if decided == 0 {
        return 0.0;
    }
    let rate = merged as f64 / decided as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

/// Mean time from creation to close across every non-open pull request with
/// a close timestamp, merged or not.
pub fn average_close_time(items: &[PullRequest]) -> Option<Duration> {
    let durations: Vec<u64> = items
        .iter()
        .filter(|pr| !pr.is_open())
        .filter_map(|pr| pr.closed_at.map(|closed_at| elapsed_ms(pr.created_at, closed_at)))
        .collect();
    mean(&durations)
}

#[derive(Clone, Debug, PartialEq)]
pub struct OpenPullRequest {
    pub pull_request: PullRequest,
    pub open_for: Duration,
}

/// The open pull requests that have been waiting the longest, oldest first.
pub fn longest_running_open(items: &[PullRequest], now: DateTime<Utc>) -> Vec<OpenPullRequest> {
    let mut open: Vec<&PullRequest> = items.iter().filter(|pr| pr.is_open()).collect();
    open.sort_by_key(|pr| pr.created_at);

    open.into_iter()
        .take(LONGEST_RUNNING_LIMIT)
        .map(|pr| OpenPullRequest {
            pull_request: pr.clone(),
            open_for: Duration::from_millis(elapsed_ms(pr.created_at, now)),
        })
        .collect()
}

// Timestamps out of order (clock skew upstream) count as zero.
fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}

fn mean(values_ms: &[u64]) -> Option<Duration> {
    if values_ms.is_empty() {
        return None;
    }
    let total: u128 = values_ms.iter().map(|&ms| u128::from(ms)).sum();
    let mean = total / values_ms.len() as u128;
    Some(Duration::from_millis(u64::try_from(mean).unwrap_or(u64::MAX)))
}
