use crate::cli::TracingFormat;
use crate::config::Config;
use tracing_subscriber::EnvFilter;

/// Configure and initialize logging for the application.
///
/// `RUST_LOG` takes precedence when set; otherwise the configured log level
/// applies to this crate's target only and everything else stays at warn.
pub fn setup_logging(config: &Config, tracing_format: TracingFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,placegrid={}", config.log_level))
    });

    match tracing_format {
        TracingFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_target(true)
                .with_env_filter(filter)
                .init();
        }
        TracingFormat::Json => {
            tracing_subscriber::fmt()
                .with_target(true)
                .with_env_filter(filter)
                .json()
                .init();
        }
    }
}
