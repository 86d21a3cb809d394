//! Certman Library
//!
//! Certificate lifecycle automation around an external ACME client. Decides
//! when a certificate needs action, resolves DNS-provider credentials, drives
//! the issuer and republishes its artifacts under a stable layout.
//!
//! - **Expiry**: four-state classification with inclusive day thresholds
//! - **Credentials**: inline or per-account lookup with `${ENV_VAR}` templating
//! - **Issuer**: certbot `dns-aliyun` invocation behind a swappable runner
//! - **Export**: atomic copy of issued files to `output/<entry>/`
//! - **Orchestrator**: per-command state machine and exit-code aggregation
//! - **Run log**: one JSON record per run under `log/`, issuer output included
//!
//! # Example
//!
//! ```ignore
//! use certman::{Command, Orchestrator, ProcessRunner};
//! use std::sync::Arc;
//!
//! let loaded = certman_config::load("data".as_ref(), "data/conf/config.toml".as_ref())?;
//! let orchestrator = Orchestrator::from_loaded(&loaded, Arc::new(ProcessRunner::new()));
//! let entries: Vec<_> = loaded.entries.iter().collect();
//! let outcomes = orchestrator
//!     .run(Command::Check { fix: false, export: true }, &entries)
//!     .await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod credentials;
pub mod expiry;
pub mod export;
pub mod issuer;
pub mod logging;
pub mod orchestrator;
pub mod report;
pub mod runlog;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Credential resolution
pub use credentials::{CredentialError, Provenance, ResolvedCredentials};

// Expiry classification
pub use expiry::{CertStatus, ExpiryEvaluator};

// Export
pub use export::{ExportError, ExportResult, Exporter};

// Issuer
pub use issuer::{
    IssueOptions, IssuerError, IssuerGateway, IssuerInvocation, IssuerRunner, Operation,
    ProcessOutput, ProcessRunner,
};

// Orchestration
pub use orchestrator::{
    aggregate_exit_code, Command, EntryOutcome, EntryState, FatalError, Orchestrator,
};

// Reporting
pub use report::{RunReport, EXIT_FATAL};

// Run log
pub use runlog::RunLog;
