//! Typed access to the GitHub REST endpoints the service consumes.
//!
//! Payloads are deserialized into per-endpoint records and converted to
//! [`PullRequest`] here, so nothing untyped travels further in.

use crate::config::UpstreamConfig;
use crate::errors::{GatewayError, Result};
use crate::gateway::Gateway;
use crate::metrics_defs::FANOUT_FAILURES;
use crate::transport::UpstreamRequest;
use crate::types::{AccessToken, PrState, PullRequest, Repository};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use shared::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use url::Url;

#[derive(Clone, Debug, Deserialize)]
pub struct GithubAccount {
    pub login: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GithubUser {
    pub login: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GithubRepo {
    pub name: String,
    pub owner: GithubAccount,
}

/// Search results carry the merge timestamp in a nested object.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GithubPullRequestRef {
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
}

/// Shared shape of `/repos/{owner}/{repo}/pulls` and `/search/issues` items.
#[derive(Clone, Debug, Deserialize)]
pub struct GithubPullRequest {
    pub title: String,
    #[serde(default)]
    pub user: Option<GithubAccount>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    pub state: PrState,
    pub html_url: String,
    #[serde(default)]
    pub pull_request: Option<GithubPullRequestRef>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GithubSearchResponse {
    pub total_count: u64,
    #[serde(default)]
    pub incomplete_results: bool,
    pub items: Vec<GithubPullRequest>,
}

impl GithubPullRequest {
    /// Converts to the internal record. Without a known repository, it is
    /// derived from `html_url` (`https://github.com/{owner}/{repo}/pull/{n}`).
    pub fn into_pull_request(self, repository: Option<&Repository>) -> Result<PullRequest> {
        let repository = match repository {
            Some(repository) => repository.full_name(),
            None => repository_from_html_url(&self.html_url)?,
        };
        let merged_at = self
            .merged_at
            .or(self.pull_request.and_then(|links| links.merged_at));

        Ok(PullRequest {
            title: self.title,
            author: self.user.map(|user| user.login),
            created_at: self.created_at,
            closed_at: self.closed_at,
            merged_at,
            state: self.state,
            url: self.html_url,
            repository,
        })
    }
}

fn repository_from_html_url(html_url: &str) -> Result<String> {
    let url = Url::parse(html_url)
        .map_err(|e| GatewayError::Decode(format!("invalid html_url {html_url:?}: {e}")))?;
    let segments: Vec<&str> = url.path_segments().map(Iterator::collect).unwrap_or_default();

    match segments.as_slice() {
        [owner, repo, "pull" | "issues", ..] if !owner.is_empty() && !repo.is_empty() => {
            Ok(format!("{owner}/{repo}"))
        }
        _ => Err(GatewayError::Decode(format!(
            "cannot derive repository from html_url {html_url:?}"
        ))),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PullState {
    Open,
    Closed,
    All,
}

impl PullState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PullState::Open => "open",
            PullState::Closed => "closed",
            PullState::All => "all",
        }
    }
}

#[derive(Debug)]
pub struct SearchResult {
    /// Total matches reported by upstream, may exceed `items.len()`
    pub total_count: u64,
    pub items: Vec<PullRequest>,
}

/// Outcome of a fan-out: the union of every successful sub-fetch plus the
/// sub-resources that failed and were left out.
#[derive(Debug)]
pub struct FanOut<T> {
    pub items: Vec<T>,
    pub failures: Vec<(String, GatewayError)>,
}

impl<T> Default for FanOut<T> {
    fn default() -> Self {
        FanOut {
            items: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> FanOut<T> {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Clone)]
pub struct GithubClient {
    gateway: Arc<Gateway>,
    per_page: u32,
    max_pages: u32,
    fanout_concurrency: usize,
}

impl GithubClient {
    pub fn new(gateway: Arc<Gateway>, config: &UpstreamConfig) -> Self {
        GithubClient {
            gateway,
            per_page: config.per_page,
            max_pages: config.max_pages,
            fanout_concurrency: config.fanout_concurrency,
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// The account the token belongs to.
    pub async fn authenticated_user(&self, token: &AccessToken) -> Result<GithubUser> {
        let request = UpstreamRequest::get("/user").with_token(token);
        self.gateway.fetch_json(&request).await
    }

    pub async fn search_pull_requests(
        &self,
        token: &AccessToken,
        author: &str,
    ) -> Result<SearchResult> {
        let base = UpstreamRequest::get("/search/issues")
            .param("q", format!("type:pr author:{author}"))
            .with_token(token);

        let mut items = Vec::new();
        let mut total_count = 0;
        for page in 1..=self.max_pages {
            let request = base
                .clone()
                .param("per_page", self.per_page)
                .param("page", page);
            let response: GithubSearchResponse = self.gateway.fetch_json(&request).await?;
            if response.incomplete_results {
                tracing::debug!(author, page, "upstream search results are incomplete");
            }

            total_count = response.total_count;
            let received = response.items.len();
            for item in response.items {
                items.push(item.into_pull_request(None)?);
            }
            if received < self.per_page as usize || items.len() as u64 >= total_count {
                break;
            }
        }

        Ok(SearchResult { total_count, items })
    }

    pub async fn repositories(&self, token: &AccessToken, owner: &str) -> Result<Vec<Repository>> {
        let request = UpstreamRequest::get(format!("/users/{owner}/repos")).with_token(token);
        let repos: Vec<GithubRepo> = self.paginate(request).await?;
        Ok(repos
            .into_iter()
            .map(|repo| Repository {
                owner: repo.owner.login,
                name: repo.name,
            })
            .collect())
    }

    pub async fn pull_requests(
        &self,
        token: &AccessToken,
        repository: &Repository,
        state: PullState,
    ) -> Result<Vec<PullRequest>> {
        let request = UpstreamRequest::get(format!(
            "/repos/{}/{}/pulls",
            repository.owner, repository.name
        ))
        .param("state", state.as_str())
        .with_token(token);

        let records: Vec<GithubPullRequest> = self.paginate(request).await?;
        records
            .into_iter()
            .map(|record| record.into_pull_request(Some(repository)))
            .collect()
    }

    /// Pull requests across every repository of `owner`. Repositories are
    /// queried concurrently; one that fails is logged and left out.
    pub async fn pull_requests_for_owner(
        &self,
        token: &AccessToken,
        owner: &str,
        state: PullState,
    ) -> Result<FanOut<PullRequest>> {
        let repositories = self.repositories(token, owner).await?;
        let semaphore = Arc::new(Semaphore::new(self.fanout_concurrency));
        let mut join_set = JoinSet::new();
        let mut names = HashMap::new();

        for repository in repositories {
            let name = repository.full_name();
            let client = self.clone();
            let token = token.clone();
            let semaphore = semaphore.clone();
            let handle = join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                client.pull_requests(&token, &repository, state).await
            });
            names.insert(handle.id(), name);
        }

        let mut fan_out = FanOut::default();
        while let Some(joined) = join_set.join_next_with_id().await {
            let (repository, error) = match joined {
                Ok((_, Ok(items))) => {
                    fan_out.items.extend(items);
                    continue;
                }
                Ok((id, Err(e))) => (names.remove(&id).unwrap_or_default(), e),
                Err(e) => {
                    tracing::error!("Fan-out task panicked: {}", e);
                    (
                        names.remove(&e.id()).unwrap_or_default(),
                        GatewayError::TaskFailed(e.to_string()),
                    )
                }
            };
            counter!(FANOUT_FAILURES).increment(1);
            tracing::warn!(%repository, error = %error, "skipping repository");
            fan_out.failures.push((repository, error));
        }

        // Completion order is arbitrary; newest first like the upstream lists
        fan_out
            .items
            .sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(fan_out)
    }

    /// Follows `page` until a short page or the configured page ceiling.
    async fn paginate<T: DeserializeOwned>(&self, request: UpstreamRequest) -> Result<Vec<T>> {
        let mut items = Vec::new();
        for page in 1..=self.max_pages {
            let paged = request
                .clone()
                .param("per_page", self.per_page)
                .param("page", page);
            let batch: Vec<T> = self.gateway.fetch_json(&paged).await?;
            let received = batch.len();
            items.extend(batch);
            if received < self.per_page as usize {
                break;
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::config::GatewayConfig;
    use crate::testutils::{MockReply, MockTransport};
    use http::StatusCode;
    use serde_json::json;
    use std::time::Duration;

    fn client(transport: Arc<MockTransport>) -> GithubClient {
        client_with_timeout(transport, 10)
    }

    fn client_with_timeout(transport: Arc<MockTransport>, timeout_secs: u64) -> GithubClient {
        let mut config = GatewayConfig::default();
        config.retry.max_attempts = 1;
        config.upstream.timeout_secs = timeout_secs;
        // Keep the breaker closed through the failing sub-fetches below
        config.circuit_breaker.minimum_calls = 20;
        let cache = Arc::new(MemoryCacheStore::new(100, Duration::from_secs(60)));
        let gateway = Arc::new(Gateway::new(&config, transport, cache));
        GithubClient::new(gateway, &config.upstream)
    }

    fn pr_json(
        title: &str,
        created_at: &str,
        merged_at: Option<&str>,
        state: &str,
    ) -> serde_json::Value {
        json!({
            "title": title,
            "user": {"login": "octocat"},
            "created_at": created_at,
            "closed_at": merged_at,
            "merged_at": merged_at,
            "state": state,
            "html_url": format!("https://github.com/octocat/hello/pull/{}", title.len()),
        })
    }

    #[test]
    fn test_search_item_conversion() {
        let item: GithubPullRequest = serde_json::from_value(json!({
            "title": "Fix race",
            "user": {"login": "octocat"},
            "created_at": "2024-01-01T00:00:00Z",
            "closed_at": "2024-01-01T03:00:00Z",
            "state": "closed",
            "html_url": "https://github.com/octocat/hello/pull/7",
            "pull_request": {"merged_at": "2024-01-01T03:00:00Z"}
        }))
        .unwrap();

        let pr = item.into_pull_request(None).unwrap();
        assert_eq!(pr.repository, "octocat/hello");
        assert_eq!(pr.author.as_deref(), Some("octocat"));
        assert!(pr.is_merged());
    }

    #[test]
    fn test_conversion_rejects_unknown_repository() {
        let item: GithubPullRequest = serde_json::from_value(json!({
            "title": "Orphan",
            "created_at": "2024-01-01T00:00:00Z",
            "state": "open",
            "html_url": "https://github.com/octocat"
        }))
        .unwrap();

        assert!(matches!(
            item.into_pull_request(None),
            Err(GatewayError::Decode(_))
        ));
    }

    #[test]
    fn test_malformed_state_is_rejected() {
        let parsed = serde_json::from_value::<GithubPullRequest>(json!({
            "title": "Draft",
            "created_at": "2024-01-01T00:00:00Z",
            "state": "draft",
            "html_url": "https://github.com/octocat/hello/pull/1"
        }));
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn test_search_pull_requests() {
        let transport = Arc::new(MockTransport::new());
        transport.on(
            "/search/issues",
            MockReply::json(json!({
                "total_count": 2,
                "incomplete_results": false,
                "items": [
                    pr_json("a", "2024-01-02T00:00:00Z", None, "open"),
                    pr_json("bb", "2024-01-01T00:00:00Z", Some("2024-01-01T01:00:00Z"), "closed"),
                ]
            })),
        );
        let client = client(transport.clone());

        let result = client
            .search_pull_requests(&AccessToken::new("t"), "octocat")
            .await
            .unwrap();

        assert_eq!(result.total_count, 2);
        assert_eq!(result.items.len(), 2);
        let call = &transport.recorded()[0];
        assert!(call.authorized);
        assert!(
            call.params
                .contains(&("q".to_string(), "type:pr author:octocat".to_string()))
        );
    }

    #[tokio::test]
    async fn test_fan_out_keeps_successful_repositories() {
        let transport = Arc::new(MockTransport::new());
        transport
            .on(
                "/users/octocat/repos",
                MockReply::json(json!([
                    {"name": "hello", "owner": {"login": "octocat"}},
                    {"name": "broken", "owner": {"login": "octocat"}},
                    {"name": "spoon", "owner": {"login": "octocat"}},
                ])),
            )
            .on(
                "/repos/octocat/hello/pulls",
                MockReply::json(json!([pr_json("a", "2024-01-01T00:00:00Z", None, "open")])),
            )
            .on(
                "/repos/octocat/broken/pulls",
                MockReply::status(StatusCode::NOT_FOUND),
            )
            .on(
                "/repos/octocat/spoon/pulls",
                MockReply::json(json!([
                    pr_json("bb", "2024-02-01T00:00:00Z", None, "open"),
                    pr_json("ccc", "2024-03-01T00:00:00Z", None, "open"),
                ])),
            );
        let client = client(transport.clone());

        let fan_out = client
            .pull_requests_for_owner(&AccessToken::new("t"), "octocat", PullState::Open)
            .await
            .unwrap();

        assert_eq!(fan_out.items.len(), 3);
        assert!(fan_out.is_partial());
        assert_eq!(fan_out.failures.len(), 1);
        assert_eq!(fan_out.failures[0].0, "octocat/broken");

        let titles: Vec<&str> = fan_out.items.iter().map(|pr| pr.title.as_str()).collect();
        assert_eq!(titles, ["ccc", "bb", "a"]);
        assert!(
            fan_out
                .items
                .iter()
                .filter(|pr| pr.title != "a")
                .all(|pr| pr.repository == "octocat/spoon")
        );

        let pulls_call = transport
            .recorded()
            .into_iter()
            .find(|call| call.path == "/repos/octocat/hello/pulls")
            .unwrap();
        assert!(
            pulls_call
                .params
                .contains(&("state".to_string(), "open".to_string()))
        );
    }

    fn three_repositories(transport: &MockTransport, stuck: MockReply) {
        transport
            .on(
                "/users/octocat/repos",
                MockReply::json(json!([
                    {"name": "hello", "owner": {"login": "octocat"}},
                    {"name": "stuck", "owner": {"login": "octocat"}},
                    {"name": "spoon", "owner": {"login": "octocat"}},
                ])),
            )
            .on(
                "/repos/octocat/hello/pulls",
                MockReply::json(json!([pr_json("a", "2024-01-01T00:00:00Z", None, "open")])),
            )
            .on("/repos/octocat/stuck/pulls", stuck)
            .on(
                "/repos/octocat/spoon/pulls",
                MockReply::json(json!([pr_json("bb", "2024-02-01T00:00:00Z", None, "open")])),
            );
    }

    #[tokio::test]
    async fn test_fan_out_hung_repository_does_not_block_siblings() {
        let transport = Arc::new(MockTransport::new());
        three_repositories(&transport, MockReply::Hang);
        let client = client_with_timeout(transport, 1);

        let started = std::time::Instant::now();
        let fan_out = client
            .pull_requests_for_owner(&AccessToken::new("t"), "octocat", PullState::Open)
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        let titles: Vec<&str> = fan_out.items.iter().map(|pr| pr.title.as_str()).collect();
        assert_eq!(titles, ["bb", "a"]);
        assert_eq!(fan_out.failures.len(), 1);
        assert_eq!(fan_out.failures[0].0, "octocat/stuck");
        assert!(matches!(
            fan_out.failures[0].1,
            GatewayError::Transient { status: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_fan_out_reports_panicked_sub_fetch() {
        let transport = Arc::new(MockTransport::new());
        three_repositories(&transport, MockReply::Panic);
        let client = client(transport);

        let fan_out = client
            .pull_requests_for_owner(&AccessToken::new("t"), "octocat", PullState::Open)
            .await
            .unwrap();

        assert_eq!(fan_out.items.len(), 2);
        assert_eq!(fan_out.failures.len(), 1);
        assert_eq!(fan_out.failures[0].0, "octocat/stuck");
        assert!(matches!(fan_out.failures[0].1, GatewayError::TaskFailed(_)));
    }

    #[tokio::test]
    async fn test_fan_out_fails_when_repository_listing_fails() {
        let transport = Arc::new(MockTransport::new());
        transport.on("/users/ghost/repos", MockReply::status(StatusCode::NOT_FOUND));
        let client = client(transport);

        let err = client
            .pull_requests_for_owner(&AccessToken::new("t"), "ghost", PullState::All)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_authenticated_user() {
        let transport = Arc::new(MockTransport::new());
        transport.on("/user", MockReply::json(json!({"login": "octocat", "email": null})));
        let client = client(transport);

        let user = client
            .authenticated_user(&AccessToken::new("t"))
            .await
            .unwrap();
        assert_eq!(user.login, "octocat");
        assert_eq!(user.email, None);
    }
}
