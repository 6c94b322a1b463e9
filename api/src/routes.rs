use crate::AppState;
use crate::auth::BearerToken;
use crate::errors::ApiError;
use crate::metrics_defs::{PARTIAL_RESULTS, USERS_AUTHENTICATED};
use crate::rate_limit::limit_by_client_ip;
use analytics::{aggregate, average_close_time, format_std_duration, longest_running_open, paginate};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use gateway::{AccessToken, GatewayError, PullRequest, PullState, Repository};
use serde::{Deserialize, Serialize};
use shared::counter;

const DEFAULT_PAGE: usize = 1;
const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth", post(authenticate))
        .route("/api/prs/analytics", get(developer_analytics))
        .route("/api/prs/{developer}/open", get(open_pull_requests))
        .route("/api/prs/metrics/{developer}", get(timing_metrics))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            limit_by_client_ip,
        ))
        .with_state(state)
}

#[derive(Deserialize, Debug, Default)]
pub struct ListParams {
    developer: Option<String>,
    repo: Option<String>,
    page: Option<usize>,
    limit: Option<usize>,
}

impl ListParams {
    fn window(&self) -> Result<(usize, usize), ApiError> {
        let page = self.page.unwrap_or(DEFAULT_PAGE);
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if page == 0 {
            return Err(ApiError::BadRequest("page must be at least 1".into()));
        }
        if limit == 0 || limit > MAX_LIMIT {
            return Err(ApiError::BadRequest(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
        Ok((page, limit))
    }
}

fn query_params(params: Result<Query<ListParams>, QueryRejection>) -> Result<ListParams, ApiError> {
    params
        .map(|Query(params)| params)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// GitHub logins and repository names: alphanumerics, `-` and `_`.
fn validate_name<'a>(field: &str, value: &'a str) -> Result<&'a str, ApiError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(value)
    } else {
        Err(ApiError::BadRequest(format!(
            "{field} must contain only letters, digits, dash or underscore"
        )))
    }
}

/// Repository names also allow `.`, but are never `.` or `..`.
fn validate_repo_name(value: &str) -> Result<&str, ApiError> {
    let valid = !matches!(value, "" | "." | "..")
        && value.len() <= 100
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(value)
    } else {
        Err(ApiError::BadRequest(
            "repo must contain only letters, digits, dash, underscore or dot".into(),
        ))
    }
}

async fn ensure_registered(state: &AppState, developer: &str) -> Result<(), ApiError> {
    match state.users.find(developer).await {
        Some(_) => Ok(()),
        None => Err(ApiError::UserNotFound(developer.to_string())),
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestView {
    title: String,
    author: Option<String>,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    merged_at: Option<DateTime<Utc>>,
    status: &'static str,
    repo: String,
    pr: String,
}

impl From<&PullRequest> for PullRequestView {
    fn from(pr: &PullRequest) -> Self {
        PullRequestView {
            title: pr.title.clone(),
            author: pr.author.clone(),
            created_at: pr.created_at,
            closed_at: pr.closed_at,
            merged_at: pr.merged_at,
            status: pr.state.as_str(),
            repo: pr.repository.clone(),
            pr: pr.url.clone(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct AuthRequest {
    pat: Option<String>,
}

#[derive(Serialize, Debug)]
struct AuthenticatedUser {
    #[serde(rename = "userName")]
    user_name: String,
}

#[derive(Serialize, Debug)]
struct AuthResponse {
    message: &'static str,
    user: AuthenticatedUser,
}

async fn authenticate(
    State(state): State<AppState>,
    body: Result<Json<AuthRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let pat = request
        .pat
        .filter(|pat| !pat.trim().is_empty())
        .ok_or_else(|| {
            ApiError::BadRequest("GitHub Personal Access Token (PAT) is required.".into())
        })?;
    let token = AccessToken::new(pat.trim());
    if !token.is_well_formed() {
        return Err(ApiError::BadRequest(
            "GitHub Personal Access Token (PAT) is malformed.".into(),
        ));
    }

    let user = match state.github.authenticated_user(&token).await {
        Ok(user) => user,
        Err(GatewayError::NonTransient { status, .. })
            if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) =>
        {
            return Err(ApiError::InvalidToken);
        }
        Err(e) => return Err(e.into()),
    };

    let credential = state.vault.encrypt(token.expose())?;
    let record = state
        .users
        .upsert_credential(&user.login, user.email, credential)
        .await;

    counter!(USERS_AUTHENTICATED).increment(1);
    tracing::info!(user = %record.user_name, "personal access token validated");

    Ok(Json(AuthResponse {
        message: "Authenticated successfully",
        user: AuthenticatedUser {
            user_name: record.user_name,
        },
    }))
}

#[derive(Serialize, Debug)]
struct AnalyticsResponse {
    developer: String,
    #[serde(rename = "openPRs")]
    open_prs: usize,
    #[serde(rename = "closedPRs")]
    closed_prs: usize,
    #[serde(rename = "mergedPRs")]
    merged_prs: usize,
    #[serde(rename = "totalPRs")]
    total_prs: u64,
    #[serde(rename = "averageMergeTime")]
    average_merge_time: Option<String>,
    #[serde(rename = "successRate")]
    success_rate: String,
    page: usize,
    limit: usize,
    prs: Vec<PullRequestView>,
}

async fn developer_analytics(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<AnalyticsResponse>, ApiError> {
    let params = query_params(params)?;
    let developer = params
        .developer
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("Developer username is required".into()))?;
    let developer = validate_name("developer", developer)?;
    let (page, limit) = params.window()?;

    let search = state.github.search_pull_requests(&token, developer).await?;
    let metrics = aggregate(developer, &search.items, page, limit);

    Ok(Json(AnalyticsResponse {
        developer: metrics.developer,
        open_prs: metrics.open,
        closed_prs: metrics.closed_unmerged,
        merged_prs: metrics.merged,
        total_prs: search.total_count,
        average_merge_time: metrics.average_merge_time.map(format_std_duration),
        success_rate: format!("{:.2}%", metrics.success_rate),
        page,
        limit,
        prs: metrics.prs.iter().map(PullRequestView::from).collect(),
    }))
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct OpenPullRequestsResponse {
    developer: String,
    prs: Vec<PullRequestView>,
    page: usize,
    limit: usize,
    total: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failed_repositories: Vec<String>,
}

async fn open_pull_requests(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Path(developer): Path<String>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<OpenPullRequestsResponse>, ApiError> {
    let params = query_params(params)?;
    validate_name("developer", &developer)?;
    let (page, limit) = params.window()?;
    ensure_registered(&state, &developer).await?;

    let (items, failed_repositories) = match params.repo.as_deref() {
        Some(repo) => {
            let repository = Repository {
                owner: developer.clone(),
                name: validate_repo_name(repo)?.to_string(),
            };
            let items = state
                .github
                .pull_requests(&token, &repository, PullState::Open)
                .await?;
            (items, Vec::new())
        }
        None => {
            let fan_out = state
                .github
                .pull_requests_for_owner(&token, &developer, PullState::Open)
                .await?;
            if fan_out.is_partial() {
                counter!(PARTIAL_RESULTS).increment(1);
            }
            let failed = fan_out.failures.into_iter().map(|(name, _)| name).collect();
            (fan_out.items, failed)
        }
    };

    Ok(Json(OpenPullRequestsResponse {
        prs: paginate(&items, page, limit)
            .iter()
            .map(PullRequestView::from)
            .collect(),
        developer,
        page,
        limit,
        total: items.len(),
        failed_repositories,
    }))
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct LongRunningView {
    #[serde(flatten)]
    pull_request: PullRequestView,
    open_since: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TimingMetricsResponse {
    developer: String,
    avg_close_or_merge_time: Option<String>,
    #[serde(rename = "longestRunningOpenPRs")]
    longest_running_open_prs: Vec<LongRunningView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failed_repositories: Vec<String>,
}

async fn timing_metrics(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Path(developer): Path<String>,
) -> Result<Json<TimingMetricsResponse>, ApiError> {
    validate_name("developer", &developer)?;
    ensure_registered(&state, &developer).await?;

    let fan_out = state
        .github
        .pull_requests_for_owner(&token, &developer, PullState::All)
        .await?;
    if fan_out.is_partial() {
        counter!(PARTIAL_RESULTS).increment(1);
    }

    let longest = longest_running_open(&fan_out.items, Utc::now())
        .into_iter()
        .map(|open| LongRunningView {
            pull_request: PullRequestView::from(&open.pull_request),
            open_since: format_std_duration(open.open_for),
        })
        .collect();

    Ok(Json(TimingMetricsResponse {
        avg_close_or_merge_time: average_close_time(&fan_out.items).map(format_std_duration),
        longest_running_open_prs: longest,
        failed_repositories: fan_out.failures.into_iter().map(|(name, _)| name).collect(),
        developer,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::rate_limit::ClientRateLimiter;
    use crate::users::{InMemoryUserStore, UserStore};
    use axum::extract::ConnectInfo;
    use axum::body::Body;
    use axum::http::Request;
    use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
    use gateway::cache::MemoryCacheStore;
    use gateway::config::GatewayConfig;
    use gateway::testutils::{MockReply, MockTransport};
    use gateway::{Gateway, GithubClient};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use vault::CredentialVault;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    struct TestApp {
        state: AppState,
        transport: Arc<MockTransport>,
        users: Arc<InMemoryUserStore>,
    }

    fn test_app() -> TestApp {
        test_app_with_limit(RateLimitConfig::default())
    }

    fn test_app_with_limit(rate_limit: RateLimitConfig) -> TestApp {
        let mut config = GatewayConfig::default();
        config.retry.max_attempts = 1;
        config.circuit_breaker.minimum_calls = 20;

        let transport = Arc::new(MockTransport::new());
        let cache = Arc::new(MemoryCacheStore::new(100, Duration::from_secs(60)));
        let gateway = Arc::new(Gateway::new(&config, transport.clone(), cache));
        let users = Arc::new(InMemoryUserStore::new());
        let state = AppState {
            github: GithubClient::new(gateway, &config.upstream),
            users: users.clone(),
            vault: Arc::new(CredentialVault::from_hex(KEY).unwrap()),
            rate_limiter: Arc::new(ClientRateLimiter::new(&rate_limit).unwrap()),
        };
        TestApp {
            state,
            transport,
            users,
        }
    }

    async fn register(app: &TestApp, developer: &str) {
        let credential = app.state.vault.encrypt("ghp_registered").unwrap();
        app.users
            .upsert_credential(developer, None, credential)
            .await;
    }

    async fn get(app: &TestApp, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri(uri)
            .header(AUTHORIZATION, "Bearer ghp_caller")
            .body(Body::empty())
            .unwrap();
        send(app, request).await
    }

    async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(app.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn pr(title: &str, repo: &str, state: &str, created: &str, merged: Option<&str>) -> Value {
        json!({
            "title": title,
            "user": {"login": "octocat"},
            "created_at": created,
            "closed_at": merged,
            "merged_at": merged,
            "state": state,
            "html_url": format!("https://github.com/octocat/{repo}/pull/1"),
            "pull_request": {"merged_at": merged},
        })
    }

    #[tokio::test]
    async fn test_authenticate_registers_user_with_encrypted_token() {
        let app = test_app();
        app.transport.on(
            "/user",
            MockReply::json(json!({"login": "octocat", "email": "octo@example.com"})),
        );

        let request = Request::builder()
            .method("POST")
            .uri("/api/auth")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"pat": "ghp_fresh"}"#))
            .unwrap();
        let (status, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["userName"], "octocat");
        assert!(body.get("token").is_none());

        let record = app.users.find("octocat").await.unwrap();
        let credential = record.encrypted_credential.unwrap();
        assert!(!credential.content.contains("ghp_fresh"));
        assert_eq!(app.state.vault.decrypt(&credential).unwrap(), "ghp_fresh");
        assert_eq!(record.email.as_deref(), Some("octo@example.com"));
    }

    #[tokio::test]
    async fn test_authenticate_rejects_missing_and_invalid_tokens() {
        let app = test_app();
        app.transport
            .on("/user", MockReply::status(StatusCode::UNAUTHORIZED));

        let missing = Request::builder()
            .method("POST")
            .uri("/api/auth")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let (status, body) = send(&app, missing).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "GitHub Personal Access Token (PAT) is required.");

        let invalid = Request::builder()
            .method("POST")
            .uri("/api/auth")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"pat": "ghp_revoked"}"#))
            .unwrap();
        let (status, _) = send(&app, invalid).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(app.users.find("octocat").await.is_none());
    }

    #[tokio::test]
    async fn test_authenticate_rejects_malformed_token_before_upstream() {
        let app = test_app();
        app.transport.on(
            "/user",
            MockReply::json(json!({"login": "octocat"})),
        );

        let request = Request::builder()
            .method("POST")
            .uri("/api/auth")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"pat": "ghp_\nX"}"#))
            .unwrap();
        let (status, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "GitHub Personal Access Token (PAT) is malformed.");
        assert_eq!(app.transport.calls(), 0);
        assert_eq!(
            app.state.github.gateway().circuit_state(),
            gateway::breaker::CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn test_requests_over_client_allowance_are_refused() {
        let app = test_app_with_limit(RateLimitConfig {
            max_requests: 2,
            window_secs: 900,
        });
        let from = |addr: &str| {
            let mut request = Request::builder()
                .uri("/api/prs/octocat/open")
                .header(AUTHORIZATION, "Bearer ghp_caller")
                .body(Body::empty())
                .unwrap();
            let addr: SocketAddr = addr.parse().unwrap();
            request.extensions_mut().insert(ConnectInfo(addr));
            request
        };

        for _ in 0..2 {
            let (status, _) = send(&app, from("10.0.0.1:4000")).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        }

        let response = router(app.state.clone())
            .oneshot(from("10.0.0.1:4001"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body["error"],
            "Too many requests from this IP, please try again later."
        );

        let (status, _) = send(&app, from("10.0.0.2:4000")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(app.transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_developer_analytics() {
        let app = test_app();
        app.transport.on(
            "/search/issues",
            MockReply::json(json!({
                "total_count": 5,
                "incomplete_results": false,
                "items": [
                    pr("a", "hello", "open", "2024-01-01T00:00:00Z", None),
                    pr("b", "hello", "open", "2024-01-01T01:00:00Z", None),
                    pr("c", "hello", "closed", "2024-01-01T02:00:00Z", None),
                    pr("d", "spoon", "closed", "2024-01-01T03:00:00Z", Some("2024-01-01T04:00:00Z")),
                    pr("e", "spoon", "closed", "2024-01-01T04:00:00Z", Some("2024-01-01T07:00:00Z")),
                ]
            })),
        );

        let (status, body) = get(&app, "/api/prs/analytics?developer=octocat&limit=2").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["openPRs"], 2);
        assert_eq!(body["closedPRs"], 1);
        assert_eq!(body["mergedPRs"], 2);
        assert_eq!(body["totalPRs"], 5);
        assert_eq!(body["averageMergeTime"], "2 hours");
        assert_eq!(body["successRate"], "66.67%");
        assert_eq!(body["page"], 1);
        assert_eq!(body["limit"], 2);
        assert_eq!(body["prs"].as_array().unwrap().len(), 2);
        assert_eq!(body["prs"][0]["repo"], "octocat/hello");
    }

    #[tokio::test]
    async fn test_analytics_validation() {
        let app = test_app();

        let (status, body) = get(&app, "/api/prs/analytics").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Developer username is required");

        let (status, _) = get(&app, "/api/prs/analytics?developer=octocat&page=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get(&app, "/api/prs/analytics?developer=octocat&limit=abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get(&app, "/api/prs/analytics?developer=octo%20cat").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .uri("/api/prs/analytics?developer=octocat")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        assert_eq!(app.transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_is_reported_with_reset_time() {
        let app = test_app();
        app.transport.on(
            "/search/issues",
            MockReply::status(StatusCode::FORBIDDEN)
                .with_header("x-ratelimit-remaining", "0")
                .with_header("x-ratelimit-reset", "4102444800"),
        );

        let (status, body) = get(&app, "/api/prs/analytics?developer=octocat").await;

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["resetAt"], "2100-01-01T00:00:00Z");
        assert_eq!(app.transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_open_pull_requests_requires_registration() {
        let app = test_app();
        let (status, body) = get(&app, "/api/prs/octocat/open").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "user octocat is not registered");
        assert_eq!(app.transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_open_pull_requests_for_one_repository() {
        let app = test_app();
        register(&app, "octocat").await;
        app.transport.on(
            "/repos/octocat/hello/pulls",
            MockReply::json(json!([
                pr("a", "hello", "open", "2024-01-01T00:00:00Z", None),
                pr("b", "hello", "open", "2024-01-02T00:00:00Z", None),
                pr("c", "hello", "open", "2024-01-03T00:00:00Z", None),
            ])),
        );

        let (status, body) = get(&app, "/api/prs/octocat/open?repo=hello&page=2&limit=2").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 3);
        assert_eq!(body["page"], 2);
        let prs = body["prs"].as_array().unwrap();
        assert_eq!(prs.len(), 1);
        assert_eq!(prs[0]["title"], "c");
        assert!(body.get("failedRepositories").is_none());
    }

    #[tokio::test]
    async fn test_repository_names_may_contain_dots() {
        let app = test_app();
        register(&app, "octocat").await;
        app.transport.on(
            "/repos/octocat/socket.io/pulls",
            MockReply::json(json!([pr("a", "socket.io", "open", "2024-01-01T00:00:00Z", None)])),
        );

        let (status, body) = get(&app, "/api/prs/octocat/open?repo=socket.io").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);

        for repo in ["..", ".", "a%2Fb"] {
            let (status, _) = get(&app, &format!("/api/prs/octocat/open?repo={repo}")).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "repo {repo}");
        }
        assert_eq!(app.transport.calls(), 1);

        let (status, _) = get(&app, "/api/prs/analytics?developer=octo.cat").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_open_pull_requests_across_repositories_is_partial() {
        let app = test_app();
        register(&app, "octocat").await;
        app.transport
            .on(
                "/users/octocat/repos",
                MockReply::json(json!([
                    {"name": "hello", "owner": {"login": "octocat"}},
                    {"name": "broken", "owner": {"login": "octocat"}},
                ])),
            )
            .on(
                "/repos/octocat/hello/pulls",
                MockReply::json(json!([pr("a", "hello", "open", "2024-01-01T00:00:00Z", None)])),
            )
            .on(
                "/repos/octocat/broken/pulls",
                MockReply::status(StatusCode::INTERNAL_SERVER_ERROR),
            );

        let (status, body) = get(&app, "/api/prs/octocat/open").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["failedRepositories"], json!(["octocat/broken"]));
    }

    #[tokio::test]
    async fn test_timing_metrics() {
        let app = test_app();
        register(&app, "octocat").await;
        app.transport
            .on(
                "/users/octocat/repos",
                MockReply::json(json!([{"name": "hello", "owner": {"login": "octocat"}}])),
            )
            .on(
                "/repos/octocat/hello/pulls",
                MockReply::json(json!([
                    pr("old", "hello", "open", "2020-01-01T00:00:00Z", None),
                    pr("new", "hello", "open", "2024-01-01T00:00:00Z", None),
                    pr("merged", "hello", "closed", "2024-01-01T00:00:00Z", Some("2024-01-01T02:00:00Z")),
                ])),
            );

        let (status, body) = get(&app, "/api/prs/metrics/octocat").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["developer"], "octocat");
        assert_eq!(body["avgCloseOrMergeTime"], "2 hours");
        let longest = body["longestRunningOpenPRs"].as_array().unwrap();
        assert_eq!(longest.len(), 2);
        assert_eq!(longest[0]["title"], "old");
        assert!(longest[0]["openSince"].as_str().unwrap().contains("year"));
    }
}
