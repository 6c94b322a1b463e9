use chrono::{DateTime, Utc};
use http::StatusCode;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Failures surfaced by the gateway. Transient failures are retried locally
/// and only show up here once the attempt ceiling is exhausted.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("upstream request failed after {attempts} attempt(s): {reason}")]
    Transient {
        status: Option<StatusCode>,
        reason: String,
        attempts: u32,
    },

    #[error("upstream rate limit exhausted, resets at {}", describe_reset(.reset_at))]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    #[error("upstream rejected the request with {status}: {message}")]
    NonTransient { status: StatusCode, message: String },

    /// Circuit open and nothing cached. `retry_after` is the cool-down left.
    #[error("upstream {target} is temporarily unavailable")]
    UpstreamUnavailable {
        target: String,
        retry_after: Duration,
    },

    #[error("malformed upstream payload: {0}")]
    Decode(String),

    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),

    #[error("sub-fetch did not complete: {0}")]
    TaskFailed(String),
}

impl GatewayError {
    /// Status reported by the upstream, if the failure came with one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            GatewayError::Transient { status, .. } => *status,
            GatewayError::NonTransient { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn describe_reset(reset_at: &Option<DateTime<Utc>>) -> String {
    match reset_at {
        Some(at) => at.to_rfc3339(),
        None => "an unknown time".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_message_includes_reset() {
        let reset_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let err = GatewayError::RateLimited {
            reset_at: Some(reset_at),
        };
        assert_eq!(
            err.to_string(),
            "upstream rate limit exhausted, resets at 2023-11-14T22:13:20+00:00"
        );

        let err = GatewayError::RateLimited { reset_at: None };
        assert!(err.to_string().ends_with("an unknown time"));
    }

    #[test]
    fn test_unavailable_is_distinct_from_rejection() {
        let unavailable = GatewayError::UpstreamUnavailable {
            target: "api.github.com".into(),
            retry_after: Duration::from_secs(30),
        };
        let rejected = GatewayError::NonTransient {
            status: StatusCode::UNAUTHORIZED,
            message: "Bad credentials".into(),
        };
        assert_eq!(unavailable.status(), None);
        assert_eq!(rejected.status(), Some(StatusCode::UNAUTHORIZED));
        assert!(unavailable.to_string().contains("temporarily unavailable"));
    }
}
