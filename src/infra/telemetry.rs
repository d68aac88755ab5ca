use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "marquee_cache_hit_total",
            Unit::Count,
            "Total number of cache-aside reads served from the cache."
        );
        describe_counter!(
            "marquee_cache_miss_total",
            Unit::Count,
            "Total number of cache-aside reads that fell through to the store."
        );
        describe_counter!(
            "marquee_cache_backend_error_total",
            Unit::Count,
            "Total number of cache backend calls that failed and were absorbed."
        );
        describe_counter!(
            "marquee_cache_invalidated_keys_total",
            Unit::Count,
            "Total number of cache keys removed by invalidation."
        );
        describe_gauge!(
            "marquee_hub_listeners",
            Unit::Count,
            "Current number of listeners registered with the notification hub."
        );
        describe_counter!(
            "marquee_hub_broadcast_total",
            Unit::Count,
            "Total number of notifications fanned out by the hub."
        );
        describe_counter!(
            "marquee_hub_evicted_total",
            Unit::Count,
            "Total number of slow listeners evicted by the hub."
        );
    });
}
