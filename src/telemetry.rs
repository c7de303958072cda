use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogConfig;

/// Initialize logging.
///
/// Logs go to stderr so stdout stays free for trace output. `RUST_LOG`
/// wins over the configured filter. `format = "json"` switches
/// to one JSON object per line, anything else uses the compact formatter.
pub fn init(log: &LogConfig) {
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));

    let registry = tracing_subscriber::registry().with(filter_layer);

    if log.format.eq_ignore_ascii_case("json") {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(true),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .init();
    }
}
