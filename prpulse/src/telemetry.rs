use crate::config::{LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const METRICS_PREFIX: &str = "prpulse";

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("could not install tracing subscriber: {0}")]
    Tracing(String),
    #[error("could not install statsd recorder: {0}")]
    Metrics(String),
}

/// Keeps the sentry client alive; events are flushed when dropped.
pub struct TelemetryGuard {
    _sentry: Option<sentry::ClientInitGuard>,
}

/// Sets up logging (and sentry when a DSN is configured). `RUST_LOG` takes
/// precedence over the configured level.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<TelemetryGuard, TelemetryError> {
    let default = LoggingConfig::default();
    let config = config.unwrap_or(&default);

    let sentry = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .try_init()
        .map_err(|e| TelemetryError::Tracing(e.to_string()))?;

    Ok(TelemetryGuard { _sentry: sentry })
}

pub fn init_metrics(config: &MetricsConfig) -> Result<(), TelemetryError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| TelemetryError::Metrics(e.to_string()))?;

    shared::metrics_defs::describe_all(gateway::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe_all(api::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "statsd metrics enabled"
    );
    Ok(())
}
