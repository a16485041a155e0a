//! Logging setup and span helpers

use tokio::time::Instant;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::DEFAULT_LOG_FILTER;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Initialize tracing with environment-based configuration
///
/// Panics if a global subscriber is already installed; embedders that may
/// race with another initializer should use [`try_init_tracing`].
pub fn init_tracing() {
    let fmt_layer = fmt::layer().with_target(true).with_line_number(true);

    Registry::default().with(env_filter()).with(fmt_layer).init();
}

/// Like [`init_tracing`] but returns false when a subscriber already exists
pub fn try_init_tracing() -> bool {
    let fmt_layer = fmt::layer().with_target(true);

    Registry::default()
        .with(env_filter())
        .with(fmt_layer)
        .try_init()
        .is_ok()
}

/// Create a span for a data access operation
#[inline]
pub fn data_span(operation: &str, collection: &str, tenant_id: &str) -> Span {
    tracing::debug_span!(
        "data",
        operation = %operation,
        collection = %collection,
        tenant_id = %tenant_id,
        duration_ms = tracing::field::Empty,
    )
}

/// Record the elapsed time in the current span and return it in milliseconds
pub fn record_duration(start: Instant) -> u64 {
    let duration_ms = start.elapsed().as_millis() as u64;
    Span::current().record("duration_ms", duration_ms);
    duration_ms
}
