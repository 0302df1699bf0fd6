//! Observability Module - Structured Logging
//! JSON logs for the resilience layer, driven by the observer hook

mod tracing_observer;

pub use tracing_observer::TracingObserver;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global JSON log subscriber. Honors `RUST_LOG`.
pub fn init_logging(service_name: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,resiliency_core=debug"));

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .try_init()?;

    tracing::info!(
        service = service_name,
        "Logging initialized"
    );

    Ok(())
}
