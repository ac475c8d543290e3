use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
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
///
/// Logs go to stderr; stdout carries command output such as printed timelines.
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
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
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

/// Register descriptions for every metric the engine emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "murmur_posts_created_total",
            Unit::Count,
            "Posts durably recorded in the global store."
        );
        describe_counter!(
            "murmur_fanout_writes_total",
            Unit::Count,
            "Timeline entry writes attempted during fan-out, labelled by result."
        );
        describe_histogram!(
            "murmur_fanout_ms",
            Unit::Milliseconds,
            "Time from first dispatch to the last fan-out worker finishing."
        );
        describe_counter!(
            "murmur_timeline_reads_total",
            Unit::Count,
            "Timeline reads served, labelled by source (cache or store)."
        );
        describe_counter!(
            "murmur_timeline_cache_hit_total",
            Unit::Count,
            "Timeline cache lookups that found a live slice."
        );
        describe_counter!(
            "murmur_timeline_cache_miss_total",
            Unit::Count,
            "Timeline cache lookups that found nothing or an expired slice."
        );
        describe_counter!(
            "murmur_timeline_cache_evict_total",
            Unit::Count,
            "Timeline slices evicted due to the user capacity bound."
        );
        describe_counter!(
            "murmur_publish_failures_total",
            Unit::Count,
            "Post-created events that could not be delivered."
        );
        describe_counter!(
            "murmur_degraded_total",
            Unit::Count,
            "Best-effort side paths that failed, labelled by path."
        );
    });
}
