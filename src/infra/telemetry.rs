use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metrics::{
    METRIC_LOOKUP_TOTAL, METRIC_REFRESH_MS, METRIC_REFRESH_PENDING, METRIC_REFRESH_TOTAL,
    METRIC_STORE_EVICT_TOTAL,
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

/// Register metric descriptions with the installed recorder. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_LOOKUP_TOTAL,
            Unit::Count,
            "Cache lookups by cache and outcome (hit, miss, invalid, stale)."
        );
        describe_counter!(
            METRIC_STORE_EVICT_TOTAL,
            Unit::Count,
            "Entries evicted from LRU stores due to capacity."
        );
        describe_counter!(
            METRIC_REFRESH_TOTAL,
            Unit::Count,
            "Refresh submissions and job results by outcome."
        );
        describe_gauge!(
            METRIC_REFRESH_PENDING,
            Unit::Count,
            "Keys with a refresh currently in flight."
        );
        describe_histogram!(
            METRIC_REFRESH_MS,
            Unit::Milliseconds,
            "Refresh job latency in milliseconds."
        );
    });
}
