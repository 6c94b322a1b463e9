use crate::config::RetryConfig;
use chrono::{DateTime, Utc};
use http::{HeaderMap, Method, StatusCode};
use std::time::Duration;

const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// How an upstream response status is handled by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Success,
    NotModified,
    /// Quota exhausted; never retried
    RateLimited { reset_at: Option<DateTime<Utc>> },
    /// Overload or throttling; retried while attempts remain
    Transient,
    /// Rejected for good, e.g. bad credentials or unknown resource
    NonTransient,
}

pub fn classify(status: StatusCode, headers: &HeaderMap) -> Disposition {
    if status == StatusCode::NOT_MODIFIED {
        return Disposition::NotModified;
    }
    if status.is_success() {
        return Disposition::Success;
    }

    if matches!(status, StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS)
        && header_str(headers, RATE_LIMIT_REMAINING) == Some("0")
    {
        let reset_at = header_str(headers, RATE_LIMIT_RESET)
            .and_then(|value| value.trim().parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0));
        return Disposition::RateLimited { reset_at };
    }

    const TRANSIENT_CLIENT_CODES: &[StatusCode] = &[
        StatusCode::REQUEST_TIMEOUT,   // 408
        StatusCode::TOO_MANY_REQUESTS, // 429
    ];

    if status.is_server_error() || TRANSIENT_CLIENT_CODES.contains(&status) {
        Disposition::Transient
    } else {
        Disposition::NonTransient
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Only requests that are safe to repeat are ever retried.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
    )
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Backoff applied after `attempt` failed: `min(base * 2^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Book-keeping for one logical request across its attempts.
#[derive(Debug)]
pub struct RetryContext {
    attempt: u32,
    descriptor: String,
    idempotent: bool,
    schedule: Vec<Duration>,
}

impl RetryContext {
    pub fn new(method: &Method, descriptor: impl Into<String>) -> Self {
        RetryContext {
            attempt: 1,
            descriptor: descriptor.into(),
            idempotent: is_idempotent(method),
            schedule: Vec::new(),
        }
    }

    /// Number of the attempt currently in flight, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Backoff delays applied so far.
    pub fn schedule(&self) -> &[Duration] {
        &self.schedule
    }

    /// After a transient failure, returns the delay to wait before the next
    /// attempt, or `None` once the request may not be retried anymore.
    pub fn next_delay(&mut self, policy: &RetryPolicy) -> Option<Duration> {
        if !self.idempotent || self.attempt >= policy.max_attempts {
            return None;
        }
        let delay = policy.delay_for(self.attempt);
        self.schedule.push(delay);
        self.attempt += 1;
        Some(delay)
    }
}
