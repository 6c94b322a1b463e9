//! Metrics definitions for the upstream gateway.

use shared::metrics_defs::{MetricDef, MetricType};

pub const CACHE_HIT: MetricDef = MetricDef {
    name: "gateway.cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of lookups answered by a fresh cache entry",
};

pub const CACHE_MISS: MetricDef = MetricDef {
    name: "gateway.cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of lookups without a fresh cache entry",
};

pub const CACHE_REVALIDATED: MetricDef = MetricDef {
    name: "gateway.cache.revalidated",
    metric_type: MetricType::Counter,
    description: "Number of expired entries renewed by a 304 from upstream",
};

pub const CACHE_STALE_SERVED: MetricDef = MetricDef {
    name: "gateway.cache.stale_served",
    metric_type: MetricType::Counter,
    description: "Number of expired entries served because the circuit was open",
};

pub const UPSTREAM_ATTEMPTS: MetricDef = MetricDef {
    name: "gateway.upstream.attempts",
    metric_type: MetricType::Counter,
    description: "Number of upstream attempts, including retries",
};

pub const UPSTREAM_RETRIES: MetricDef = MetricDef {
    name: "gateway.upstream.retries",
    metric_type: MetricType::Counter,
    description: "Number of attempts scheduled after a transient failure",
};

pub const UPSTREAM_DURATION: MetricDef = MetricDef {
    name: "gateway.upstream.duration",
    metric_type: MetricType::Histogram,
    description: "Upstream attempt duration in seconds. Tagged with outcome.",
};

pub const RATE_LIMITED: MetricDef = MetricDef {
    name: "gateway.upstream.rate_limited",
    metric_type: MetricType::Counter,
    description: "Number of responses signalling an exhausted upstream quota",
};

pub const BREAKER_TRANSITIONS: MetricDef = MetricDef {
    name: "gateway.breaker.transitions",
    metric_type: MetricType::Counter,
    description: "Circuit breaker state changes. Tagged with the new state.",
};

pub const BREAKER_STATE: MetricDef = MetricDef {
    name: "gateway.breaker.state",
    metric_type: MetricType::Gauge,
    description: "Current circuit state per target: 0 closed, 1 open, 2 half-open",
};

pub const BREAKER_REJECTED: MetricDef = MetricDef {
    name: "gateway.breaker.rejected",
    metric_type: MetricType::Counter,
    description: "Number of requests short-circuited by an open breaker",
};

pub const FANOUT_FAILURES: MetricDef = MetricDef {
    name: "gateway.fanout.failures",
    metric_type: MetricType::Counter,
    description: "Number of fan-out sub-fetches that failed and were skipped",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CACHE_HIT,
    CACHE_MISS,
    CACHE_REVALIDATED,
    CACHE_STALE_SERVED,
    UPSTREAM_ATTEMPTS,
    UPSTREAM_RETRIES,
    UPSTREAM_DURATION,
    RATE_LIMITED,
    BREAKER_TRANSITIONS,
    BREAKER_STATE,
    BREAKER_REJECTED,
    FANOUT_FAILURES,
];
