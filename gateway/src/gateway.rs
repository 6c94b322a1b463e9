use crate::breaker::{BreakerRegistry, CircuitState};
use crate::cache::{CacheEntry, CacheStore, MemoryCacheStore};
use crate::config::GatewayConfig;
use crate::errors::{GatewayError, Result};
use crate::metrics_defs::{
    CACHE_REVALIDATED, CACHE_STALE_SERVED, RATE_LIMITED, UPSTREAM_ATTEMPTS, UPSTREAM_DURATION,
    UPSTREAM_RETRIES,
};
use crate::retry::{Disposition, RetryContext, RetryPolicy, classify};
use crate::transport::{ReqwestTransport, Transport, TransportError, UpstreamRequest, UpstreamResponse};
use bytes::Bytes;
use http::StatusCode;
use serde::de::DeserializeOwned;
use shared::{counter, histogram};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadOrigin {
    /// Fresh cache entry, upstream not contacted
    Cache,
    Upstream,
    /// Expired entry confirmed unchanged by a 304
    Revalidated,
    /// Expired entry served because the circuit was open
    Stale,
}

#[derive(Clone, Debug)]
pub struct Payload {
    pub body: Bytes,
    pub origin: PayloadOrigin,
}

/// Resilient access to the upstream API: cache lookup, breaker gate, retried
/// attempts and cache write, in that order, for every request.
pub struct Gateway {
    transport: Arc<dyn Transport>,
    cache: Arc<dyn CacheStore>,
    breakers: BreakerRegistry,
    retry: RetryPolicy,
    cache_ttl: Duration,
    attempt_timeout: Duration,
}

impl Gateway {
    pub fn new(
        config: &GatewayConfig,
        transport: Arc<dyn Transport>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Gateway {
            transport,
            cache,
            breakers: BreakerRegistry::new(config.circuit_breaker.clone()),
            retry: RetryPolicy::from(&config.retry),
            cache_ttl: config.cache.ttl(),
            attempt_timeout: config.upstream.timeout(),
        }
    }

    /// Gateway talking HTTP to the configured upstream with an in-process
    /// cache.
    pub fn from_config(config: &GatewayConfig) -> std::result::Result<Self, TransportError> {
        let transport =
            ReqwestTransport::new(config.upstream.base_url.clone(), &config.upstream.user_agent)?;
        let cache = MemoryCacheStore::new(config.cache.max_entries, config.cache.stale_retention());
        Ok(Gateway::new(config, Arc::new(transport), Arc::new(cache)))
    }

    pub fn target(&self) -> &str {
        self.transport.target()
    }

    /// State of the upstream circuit as seen by the next request: an open
    /// circuit past its cool-down reads `HalfOpen`.
    pub fn circuit_state(&self) -> CircuitState {
        self.breakers.get(self.transport.target()).effective_state()
    }

    pub fn circuits(&self) -> BTreeMap<String, CircuitState> {
        self.breakers.snapshot()
    }

    pub async fn fetch(&self, request: &UpstreamRequest) -> Result<Payload> {
        // Never reaches the breaker: nothing would be sent upstream
        request.validate()?;
        let key = request.cache_key();

        if let Some(entry) = self.cache.get(&key).await {
            tracing::debug!(request = %request.descriptor(), "served from cache");
            return Ok(Payload {
                body: entry.value,
                origin: PayloadOrigin::Cache,
            });
        }

        let breaker = self.breakers.get(self.transport.target());
        let Some(permit) = breaker.try_acquire() else {
            return self
                .serve_stale(&key, request, breaker.remaining_cool_down())
                .await;
        };

        // An expired entry lets the upstream answer 304 instead of a body
        let stale = self.cache.get_stale(&key).await;
        let etag = stale.as_ref().and_then(|entry| entry.etag.as_deref());

        let result = self.send_with_retry(request, etag).await;
        match result {
            Ok(response) if response.status == StatusCode::NOT_MODIFIED && stale.is_none() => {
                permit.failure();
                Err(GatewayError::Decode(format!(
                    "{}: 304 Not Modified for an unconditional request",
                    request.descriptor()
                )))
            }
            Ok(response) => {
                permit.success();
                Ok(self.store(&key, response, stale).await)
            }
            // Rejected locally; the permit goes back unreported
            Err(err @ GatewayError::InvalidRequest(_)) => Err(err),
            Err(err) => {
                permit.failure();
                Err(err)
            }
        }
    }

    /// Fetches and decodes a JSON payload. A payload that does not decode is
    /// dropped from the cache so it is not served again.
    pub async fn fetch_json<T: DeserializeOwned>(&self, request: &UpstreamRequest) -> Result<T> {
        let payload = self.fetch(request).await?;
        match serde_json::from_slice(&payload.body) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.cache.delete(&request.cache_key()).await;
                Err(GatewayError::Decode(format!("{}: {e}", request.descriptor())))
            }
        }
    }

    async fn serve_stale(
        &self,
        key: &str,
        request: &UpstreamRequest,
        retry_after: Duration,
    ) -> Result<Payload> {
        match self.cache.get_stale(key).await {
            Some(entry) => {
                counter!(CACHE_STALE_SERVED).increment(1);
                tracing::warn!(
                    request = %request.descriptor(),
                    created_at = %entry.created_at,
                    "circuit open, serving stale cache entry"
                );
                Ok(Payload {
                    body: entry.value,
                    origin: PayloadOrigin::Stale,
                })
            }
            None => Err(GatewayError::UpstreamUnavailable {
                target: self.transport.target().to_string(),
                retry_after,
            }),
        }
    }

    async fn store(
        &self,
        key: &str,
        response: UpstreamResponse,
        stale: Option<CacheEntry>,
    ) -> Payload {
        match stale {
            Some(entry) if response.status == StatusCode::NOT_MODIFIED => {
                let etag = response.etag().or(entry.etag);
                self.cache
                    .set(key, entry.value.clone(), self.cache_ttl, etag)
                    .await;
                counter!(CACHE_REVALIDATED).increment(1);
                Payload {
                    body: entry.value,
                    origin: PayloadOrigin::Revalidated,
                }
            }
            _ => {
                let etag = response.etag();
                self.cache
                    .set(key, response.body.clone(), self.cache_ttl, etag)
                    .await;
                Payload {
                    body: response.body,
                    origin: PayloadOrigin::Upstream,
                }
            }
        }
    }

    async fn send_with_retry(
        &self,
        request: &UpstreamRequest,
        etag: Option<&str>,
    ) -> Result<UpstreamResponse> {
        let mut ctx = RetryContext::new(&request.method, request.descriptor());

        loop {
            counter!(UPSTREAM_ATTEMPTS).increment(1);
            let started = Instant::now();
            let attempt = timeout(self.attempt_timeout, self.transport.send(request, etag)).await;

            let (outcome, status, reason) = match attempt {
                Err(_) => (
                    "timeout",
                    None,
                    format!("timed out after {}ms", self.attempt_timeout.as_millis()),
                ),
                Ok(Err(e)) if e.is_transient() => ("connection_error", None, e.to_string()),
                Ok(Err(e)) => return Err(GatewayError::InvalidRequest(e.to_string())),
                Ok(Ok(response)) => match classify(response.status, &response.headers) {
                    Disposition::Success | Disposition::NotModified => {
                        record_duration(started, "ok");
                        return Ok(response);
                    }
                    Disposition::RateLimited { reset_at } => {
                        record_duration(started, "rate_limited");
                        counter!(RATE_LIMITED).increment(1);
                        tracing::warn!(
                            request = %ctx.descriptor(),
                            reset_at = ?reset_at,
                            "upstream quota exhausted"
                        );
                        return Err(GatewayError::RateLimited { reset_at });
                    }
                    Disposition::NonTransient => {
                        record_duration(started, "rejected");
                        return Err(GatewayError::NonTransient {
                            status: response.status,
                            message: upstream_message(&response),
                        });
                    }
                    Disposition::Transient => (
                        "transient",
                        Some(response.status),
                        upstream_message(&response),
                    ),
                },
            };
            record_duration(started, outcome);

            match ctx.next_delay(&self.retry) {
                Some(delay) => {
                    counter!(UPSTREAM_RETRIES).increment(1);
                    tracing::warn!(
                        request = %ctx.descriptor(),
                        attempt = ctx.attempt() - 1,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "transient upstream failure, retrying"
                    );
                    sleep(delay).await;
                }
                None => {
                    tracing::error!(
                        request = %ctx.descriptor(),
                        attempts = ctx.attempt(),
                        backoff = ?ctx.schedule(),
                        %reason,
                        "upstream request failed"
                    );
                    return Err(GatewayError::Transient {
                        status,
                        reason,
                        attempts: ctx.attempt(),
                    });
                }
            }
        }
    }
}

fn record_duration(started: Instant, outcome: &'static str) {
    histogram!(UPSTREAM_DURATION, "outcome" => outcome).record(started.elapsed().as_secs_f64());
}

// GitHub reports errors as {"message": "..."}; fall back to the status text.
fn upstream_message(response: &UpstreamResponse) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        message: String,
    }

    serde_json::from_slice::<ErrorBody>(&response.body)
        .map(|body| body.message)
        .unwrap_or_else(|_| {
            response
                .status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        })
}
