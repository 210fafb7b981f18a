use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ConfigError, LogFormat, LogLevel};

/// Directives appended to the configured level. aya logs every map
/// syscall at debug, which drowns out per-entry sweep decisions.
const QUIET_DEPENDENCIES: &str = "aya=warn,hyper=warn";

/// `RUST_LOG` if set, otherwise `level` for our crates.
fn build_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},{QUIET_DEPENDENCIES}")))
}

/// Initialize structured logging to stdout.
///
/// - `LogFormat::Json`: flattened JSON, one object per event.
/// - `LogFormat::Text`: human-readable colored output.
///
/// Must be called once at startup; a second call fails.
pub fn init_logging(level: LogLevel, format: LogFormat) -> Result<(), ConfigError> {
    let registry = tracing_subscriber::registry().with(build_filter(level));

    let result = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_target(true)
                    .with_ansi(false),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().pretty().with_target(true).with_ansi(true))
            .try_init(),
    };

    result.map_err(|e| ConfigError::Validation {
        field: "agent.log_format".to_string(),
        message: format!("cannot install {format} logger: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_level_builds_a_filter() {
        for level in [
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ] {
            let directives = format!("{level},{QUIET_DEPENDENCIES}");
            assert!(
                EnvFilter::try_new(&directives).is_ok(),
                "{directives} should be a valid filter"
            );
        }
    }

    #[test]
    fn second_init_fails() {
        let first = init_logging(LogLevel::Info, LogFormat::Json);
        let second = init_logging(LogLevel::Info, LogFormat::Text);
        // Another test in this binary may have installed a subscriber first.
        assert!(first.is_err() || second.is_err());
        assert!(second.is_err());
    }
}
