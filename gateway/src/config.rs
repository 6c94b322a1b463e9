use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("upstream base url cannot be used as a base: {0}")]
    InvalidBaseUrl(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("failure_ratio must be within (0, 1], got {0}")]
    InvalidFailureRatio(f64),

    #[error("minimum_calls ({minimum_calls}) cannot exceed window_size ({window_size})")]
    WindowTooSmall {
        minimum_calls: usize,
        window_size: usize,
    },
}

/// Everything the gateway needs to talk to the upstream API.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.upstream.validate()?;
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.cache.validate()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Root of the REST API, e.g. `https://api.github.com`
    pub base_url: Url,
    /// Hard timeout applied to every single upstream attempt
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Page size requested from paginated collection endpoints
    pub per_page: u32,
    /// Upper bound on pages followed for one collection
    pub max_pages: u32,
    /// Maximum number of concurrent sub-fetches in a fan-out
    pub fanout_concurrency: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            base_url: Url::parse("https://api.github.com").expect("static url is valid"),
            timeout_secs: 10,
            user_agent: "prpulse".into(),
            per_page: 100,
            max_pages: 10,
            fanout_concurrency: 8,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.base_url.cannot_be_a_base() {
            return Err(ValidationError::InvalidBaseUrl(self.base_url.to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::Zero("upstream.timeout_secs"));
        }
        if self.per_page == 0 {
            return Err(ValidationError::Zero("upstream.per_page"));
        }
        if self.max_pages == 0 {
            return Err(ValidationError::Zero("upstream.max_pages"));
        }
        if self.fanout_concurrency == 0 {
            return Err(ValidationError::Zero("upstream.fanout_concurrency"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::Zero("retry.max_attempts"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of most recent outcomes kept in the rolling window
    pub window_size: usize,
    /// Outcomes required in the window before the ratio is evaluated
    pub minimum_calls: usize,
    /// Failure ratio at or above which the circuit opens
    pub failure_ratio: f64,
    pub cool_down_ms: u64,
    /// Probe requests let through while half-open
    pub half_open_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            window_size: 20,
            minimum_calls: 5,
            failure_ratio: 0.5,
            cool_down_ms: 30_000,
            half_open_probes: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cool_down(&self) -> Duration {
        Duration::from_millis(self.cool_down_ms)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.window_size == 0 {
            return Err(ValidationError::Zero("circuit_breaker.window_size"));
        }
        if self.minimum_calls == 0 {
            return Err(ValidationError::Zero("circuit_breaker.minimum_calls"));
        }
        if self.minimum_calls > self.window_size {
            return Err(ValidationError::WindowTooSmall {
                minimum_calls: self.minimum_calls,
                window_size: self.window_size,
            });
        }
        if !(self.failure_ratio > 0.0 && self.failure_ratio <= 1.0) {
            return Err(ValidationError::InvalidFailureRatio(self.failure_ratio));
        }
        if self.half_open_probes == 0 {
            return Err(ValidationError::Zero("circuit_breaker.half_open_probes"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a stored response is served as fresh
    pub ttl_secs: u64,
    /// How long an expired response is kept around for revalidation and
    /// serve-stale fallback
    pub stale_retention_secs: u64,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            ttl_secs: 60,
            stale_retention_secs: 3_600,
            max_entries: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn stale_retention(&self) -> Duration {
        Duration::from_secs(self.stale_retention_secs)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.max_entries == 0 {
            return Err(ValidationError::Zero("cache.max_entries"));
        }
        Ok(())
    }
}
