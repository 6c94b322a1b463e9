use serde::Deserialize;
use std::time::Duration;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ListenerError {
    #[error("listener host cannot be empty")]
    EmptyHost,
    #[error("listener port cannot be 0")]
    ZeroPort,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

impl Listener {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ListenerError> {
        if self.host.is_empty() {
            return Err(ListenerError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ListenerError::ZeroPort);
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum RateLimitError {
    #[error("rate_limit.max_requests cannot be 0")]
    ZeroRequests,
    #[error("rate_limit.window_secs cannot be 0")]
    ZeroWindow,
}

/// Requests a single client IP may make to `/api` per window.
#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            max_requests: 100,
            window_secs: 15 * 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn validate(&self) -> Result<(), RateLimitError> {
        if self.max_requests == 0 {
            return Err(RateLimitError::ZeroRequests);
        }
        if self.window_secs == 0 {
            return Err(RateLimitError::ZeroWindow);
        }
        Ok(())
    }
}
