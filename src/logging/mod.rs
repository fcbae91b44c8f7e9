use crate::cli::TracingFormat;
use crate::config::Config;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise dependencies log at `warn` and this
/// crate at the configured level.
pub fn setup_logging(config: &Config, tracing_format: TracingFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let base_level = &config.log_level;
        EnvFilter::new(format!(
            "warn,forecast_cache={base_level},tower_http=info"
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);

    match tracing_format {
        TracingFormat::Pretty => registry
            .with(fmt::layer().compact().with_target(true))
            .init(),
        TracingFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_target(true),
            )
            .init(),
    }
}
