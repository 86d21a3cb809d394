//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
///
/// The same type is used for the global file (fatal for the run) and for
/// individual entry files (isolated to that entry); the caller decides which
/// one it is from where the error surfaced.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("unsupported config format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("invalid configuration in {}: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("force_renew_days ({force_renew_days}) must be less than warn_days ({warn_days})")]
    Thresholds {
        warn_days: u32,
        force_renew_days: u32,
    },

    #[error("invalid scan pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("duplicate entry name '{name}' (first defined in {})", first.display())]
    DuplicateEntry { name: String, first: PathBuf },

    #[error("failed to load secrets file {}: {reason}", path.display())]
    Secrets { path: PathBuf, reason: String },
}
