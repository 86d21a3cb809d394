//! Tracing setup for the binary.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Log line format on stderr
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Filter used when `RUST_LOG` is unset
pub fn default_level(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `--verbose`.
///
/// Output goes to stderr; stdout is reserved for the report.
pub fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    // A subscriber may already be installed when embedded in tests
    let _ = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level() {
        assert_eq!(default_level(false), "info");
        assert_eq!(default_level(true), "debug");
    }
}
