//! Per client IP request limit for the `/api` routes.
//!
//! The quota is a token bucket holding `max_requests`, refilled evenly over
//! `window_secs`: a client may burst the full allowance, then gets one more
//! request per `window / max_requests`.

use crate::config::{RateLimitConfig, RateLimitError};
use crate::errors::ApiError;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::Clock;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

// Idle clients are dropped once this many are tracked
const MAX_TRACKED_CLIENTS: usize = 10_000;

pub struct ClientRateLimiter {
    limiter: DefaultKeyedRateLimiter<IpAddr>,
}

impl ClientRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        config.validate()?;
        let burst = NonZeroU32::new(config.max_requests).ok_or(RateLimitError::ZeroRequests)?;
        let quota = Quota::with_period(config.window() / config.max_requests)
            .ok_or(RateLimitError::ZeroWindow)?
            .allow_burst(burst);

        Ok(ClientRateLimiter {
            limiter: RateLimiter::keyed(quota),
        })
    }

    /// Takes one request from the client's allowance. On refusal, returns
    /// how long until the next request would be admitted.
    pub fn check(&self, client: IpAddr) -> Result<(), Duration> {
        if self.limiter.len() > MAX_TRACKED_CLIENTS {
            self.limiter.retain_recent();
        }
        self.limiter
            .check_key(&client)
            .map_err(|not_until| not_until.wait_time_from(self.limiter.clock().now()))
    }
}

/// Middleware rejecting clients over their allowance with 429. Requests
/// without a peer address (in-process callers) share one bucket.
pub async fn limit_by_client_ip(
    State(limiter): State<Arc<ClientRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    match limiter.check(client) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            tracing::debug!(%client, "client over request allowance");
            ApiError::TooManyRequests { retry_after }.into_response()
        }
    }
}
