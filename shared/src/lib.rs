//! Plumbing shared by the prpulse services: the hyper accept loop, the admin
//! endpoints and the metric definition helpers.

pub mod admin_service;
pub mod http;
pub mod metrics_defs;
