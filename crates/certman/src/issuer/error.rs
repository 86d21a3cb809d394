//! Issuer error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from preparing or running the external issuer.
#[derive(Debug, Error)]
pub enum IssuerError {
    /// The issuer binary does not exist; no entry can make progress
    #[error("issuer binary '{0}' not found")]
    NotFound(String),

    #[error("failed to prepare {}: {source}", path.display())]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start issuer: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("issuer timed out: {0}")]
    Timeout(String),

    #[error("issuer exited with {status}: {summary}")]
    Failed { status: String, summary: String },
}

impl IssuerError {
    /// Whether the run as a whole must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the issuer process was actually started
    pub fn was_invoked(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Failed { .. })
    }
}
