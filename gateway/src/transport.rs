use crate::cache::{ParamValue, generate_key};
use crate::errors::GatewayError;
use crate::types::AccessToken;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, ETAG, IF_NONE_MATCH, USER_AGENT};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use reqwest::Url;

/// The semantic description of one upstream call. Two requests that differ
/// only in parameter order are the same request.
#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Path relative to the upstream base url, e.g. `/users/octocat/repos`
    pub path: String,
    pub params: Vec<(String, ParamValue)>,
    pub token: Option<AccessToken>,
}

impl UpstreamRequest {
    pub fn get(path: impl Into<String>) -> Self {
        UpstreamRequest {
            method: Method::GET,
            path: path.into(),
            params: Vec::new(),
            token: None,
        }
    }

    pub fn param(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.params.push((name.to_string(), value.into()));
        self
    }

    pub fn with_token(mut self, token: &AccessToken) -> Self {
        self.token = Some(token.clone());
        self
    }

    /// Fingerprint used as cache key. The token only participates through
    /// its digest so distinct callers never share cached data.
    pub fn cache_key(&self) -> String {
        let auth = self
            .token
            .as_ref()
            .map(|token| ParamValue::Str(token.fingerprint()));

        let params = self
            .params
            .iter()
            .map(|(name, value)| (name.as_str(), value))
            .chain(auth.iter().map(|value| ("auth", value)));

        generate_key(&format!("{} {}", self.method, self.path), params)
    }

    /// Checks what can be checked without contacting the upstream. A request
    /// failing here is never sent.
    pub fn validate(&self) -> Result<(), GatewayError> {
        match &self.token {
            Some(token) if !token.is_well_formed() => Err(GatewayError::InvalidRequest(
                "access token contains characters not allowed in a header".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Short form used in logs; never includes the token.
    pub fn descriptor(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

#[derive(Clone, Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn etag(&self) -> Option<String> {
        self.headers
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("could not reach upstream: {0}")]
    Connection(String),
    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),
    #[error("invalid header value for {0}")]
    InvalidHeader(&'static str),
}

impl TransportError {
    /// Whether repeating the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Connection(_))
    }
}

/// Sends one attempt of a request. Retries, timeouts and caching are the
/// gateway's concern, not the transport's.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identifier of the upstream target, used to pick its circuit breaker.
    fn target(&self) -> &str;

    async fn send(
        &self,
        request: &UpstreamRequest,
        if_none_match: Option<&str>,
    ) -> Result<UpstreamResponse, TransportError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Url,
    target: String,
}

impl ReqwestTransport {
    pub fn new(base_url: Url, user_agent: &str) -> Result<Self, TransportError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|_| TransportError::InvalidHeader("user-agent"))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let target = base_url
            .host_str()
            .map(str::to_string)
            .ok_or_else(|| TransportError::InvalidUrl(base_url.to_string()))?;

        Ok(ReqwestTransport {
            client,
            base_url,
            target,
        })
    }

    fn url_for(&self, request: &UpstreamRequest) -> Url {
        let mut url = self.base_url.clone();
        let base_path = self.base_url.path().trim_end_matches('/');
        url.set_path(&format!("{base_path}{}", request.path));

        if !request.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &request.params {
                pairs.append_pair(name, &value.render());
            }
        }
        url
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    fn target(&self) -> &str {
        &self.target
    }

    async fn send(
        &self,
        request: &UpstreamRequest,
        if_none_match: Option<&str>,
    ) -> Result<UpstreamResponse, TransportError> {
        let url = self.url_for(request);
        let mut builder = self.client.request(request.method.clone(), url);

        if let Some(token) = &request.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
                .map_err(|_| TransportError::InvalidHeader("authorization"))?;
            builder = builder.header(AUTHORIZATION, value);
        }
        if let Some(etag) = if_none_match {
            builder = builder.header(IF_NONE_MATCH, etag);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
