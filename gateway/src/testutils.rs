//! Scripted transport for exercising the gateway without a network.

use crate::transport::{Transport, TransportError, UpstreamRequest, UpstreamResponse};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Clone, Debug)]
pub enum MockReply {
    Respond {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    ConnectionError,
    /// Never answers within any sensible timeout
    Hang,
    /// Panics inside the calling task
    Panic,
}

impl MockReply {
    pub fn json(value: serde_json::Value) -> Self {
        MockReply::Respond {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from(value.to_string()),
        }
    }

    pub fn status(status: StatusCode) -> Self {
        MockReply::Respond {
            status,
            headers: HeaderMap::new(),
            body: Bytes::from(
                serde_json::json!({"message": status.canonical_reason()}).to_string(),
            ),
        }
    }

    pub fn body(body: &'static str) -> Self {
        MockReply::Respond {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    pub fn with_status(mut self, code: StatusCode) -> Self {
        if let MockReply::Respond { status, .. } = &mut self {
            *status = code;
        }
        self
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let MockReply::Respond { headers, .. } = &mut self {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_str(value).expect("valid header value"),
            );
        }
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    pub path: String,
    pub params: Vec<(String, String)>,
    pub if_none_match: Option<String>,
    pub authorized: bool,
}

/// Replies are scripted per request path. Each call pops the next reply of
/// its path; the last one keeps being replayed.
pub struct MockTransport {
    target: String,
    routes: Mutex<HashMap<String, VecDeque<MockReply>>>,
    calls: AtomicUsize,
    recorded: Mutex<Vec<RecordedCall>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport {
            target: "mock.upstream".into(),
            routes: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn on(&self, path: &str, reply: MockReply) -> &Self {
        self.routes
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.recorded.lock().iter().filter(|c| c.path == path).count()
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.recorded.lock().clone()
    }

    fn next_reply(&self, path: &str) -> Option<MockReply> {
        let mut routes = self.routes.lock();
        let queue = routes.get_mut(path)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn target(&self) -> &str {
        &self.target
    }

    async fn send(
        &self,
        request: &UpstreamRequest,
        if_none_match: Option<&str>,
    ) -> Result<UpstreamResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.recorded.lock().push(RecordedCall {
            path: request.path.clone(),
            params: request
                .params
                .iter()
                .map(|(name, value)| (name.clone(), value.render()))
                .collect(),
            if_none_match: if_none_match.map(str::to_string),
            authorized: request.token.is_some(),
        });

        match self.next_reply(&request.path) {
            Some(MockReply::Respond {
                status,
                headers,
                body,
            }) => Ok(UpstreamResponse {
                status,
                headers,
                body,
            }),
            Some(MockReply::ConnectionError) => {
                Err(TransportError::Connection("connection refused".into()))
            }
            Some(MockReply::Panic) => panic!("scripted transport panic for {}", request.path),
            Some(MockReply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Err(TransportError::Connection("hung".into()))
            }
            None => Ok(UpstreamResponse {
                status: StatusCode::NOT_FOUND,
                headers: HeaderMap::new(),
                body: Bytes::from_static(br#"{"message":"Not Found"}"#),
            }),
        }
    }
}
