//! Metrics definitions for the web API.

use shared::metrics_defs::{MetricDef, MetricType};

pub const API_ERRORS: MetricDef = MetricDef {
    name: "api.errors",
    metric_type: MetricType::Counter,
    description: "Error responses returned to callers. Tagged with status.",
};

pub const USERS_AUTHENTICATED: MetricDef = MetricDef {
    name: "api.users.authenticated",
    metric_type: MetricType::Counter,
    description: "Successful personal access token validations",
};

pub const PARTIAL_RESULTS: MetricDef = MetricDef {
    name: "api.partial_results",
    metric_type: MetricType::Counter,
    description: "Responses built from a fan-out where some repositories failed",
};

pub const ALL_METRICS: &[MetricDef] = &[API_ERRORS, USERS_AUTHENTICATED, PARTIAL_RESULTS];
