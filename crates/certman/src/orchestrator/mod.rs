//! Per-command entry state machine
//!
//! Every entry moves through `Pending → Evaluated → (Skipped | Acted) →
//! Exported → Done`, with each command taking a subset of that path:
//!
//! - `check` evaluates only; in fix mode it also acts and exports
//! - `new` / `renew` always act, recording the pre-action status first
//! - `export` skips evaluation and action
//!
//! Errors that concern a single entry are stored in its [`EntryOutcome`] and
//! never stop the batch. Only [`FatalError`] does.

mod outcome;

pub use outcome::{
    aggregate_exit_code, Action, EntryError, EntryOutcome, EntryState, ErrorKind,
};

use certman_config::{ConfigError, DataLayout, Entry, Environment, GlobalConfig, LoadedConfig};
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::credentials;
use crate::expiry::{CertStatus, ExpiryEvaluator};
use crate::export::Exporter;
use crate::issuer::{
    IssueOptions, IssuerError, IssuerGateway, IssuerInvocation, IssuerRunner, Operation,
};

/// Issuer's live certificate file name
const LIVE_CERT: &str = "cert.pem";

/// Conditions that abort the whole run
#[derive(Debug, Error)]
pub enum FatalError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("issuer binary not found: {0}")]
    IssuerNotFound(String),

    #[error("unknown entry '{0}'")]
    UnknownEntry(String),
}

/// What to do with the selected entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Check { fix: bool, export: bool },
    New { force: bool, export: bool },
    Renew { force: bool, dry_run: bool, export: bool },
    Export,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Check { .. } => "check",
            Self::New { .. } => "new",
            Self::Renew { .. } => "renew",
            Self::Export => "export",
        }
    }
}

/// Corrective operation for a status in fix mode
fn fix_operation(status: CertStatus) -> Option<Operation> {
    match status {
        CertStatus::Ok => None,
        CertStatus::Warning | CertStatus::ForceRenew => Some(Operation::Renew),
        CertStatus::Missing => Some(Operation::New),
    }
}

/// Pick the entries a command applies to: one by name, or all of them.
pub fn select<'a>(entries: &'a [Entry], name: Option<&str>) -> Result<Vec<&'a Entry>, FatalError> {
    match name {
        None => Ok(entries.iter().collect()),
        Some(name) => entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| vec![e])
            .ok_or_else(|| FatalError::UnknownEntry(name.to_string())),
    }
}

/// Drives evaluation, issuance and export for a batch of entries.
pub struct Orchestrator {
    evaluator: ExpiryEvaluator,
    gateway: IssuerGateway,
    exporter: Exporter,
    layout: DataLayout,
    environment: Environment,
    concurrency: usize,
}

impl Orchestrator {
    pub fn new(
        global: &GlobalConfig,
        layout: DataLayout,
        environment: Environment,
        runner: Arc<dyn IssuerRunner>,
    ) -> Self {
        Self {
            evaluator: ExpiryEvaluator::new(global.warn_days, global.force_renew_days),
            gateway: IssuerGateway::new(runner, global, layout.clone()),
            exporter: Exporter::new(layout.clone()),
            layout,
            environment,
            concurrency: global.concurrency.max(1),
        }
    }

    pub fn from_loaded(loaded: &LoadedConfig, runner: Arc<dyn IssuerRunner>) -> Self {
        Self::new(
            &loaded.global,
            loaded.layout.clone(),
            loaded.environment.clone(),
            runner,
        )
    }

    /// Run a command over `entries`, returning outcomes in entry order.
    ///
    /// Up to `concurrency` entries are in flight at once. Evaluation and
    /// export overlap, while issuer runs go through the gateway one by one.
    /// A fatal error drops the remaining work and is returned instead of any
    /// outcome.
    pub async fn run(
        &self,
        command: Command,
        entries: &[&Entry],
    ) -> Result<Vec<EntryOutcome>, FatalError> {
        info!(
            command = command.name(),
            entries = entries.len(),
            concurrency = self.concurrency,
            "Processing entries"
        );

        let outcomes: Vec<EntryOutcome> = stream::iter(entries.iter().copied())
            .map(|entry| self.process(command, entry))
            .buffered(self.concurrency)
            .try_collect()
            .await
            .map_err(|e| {
                error!(command = command.name(), error = %e, "Run aborted");
                e
            })?;

        info!(
            command = command.name(),
            exit_code = aggregate_exit_code(&outcomes),
            "Processing complete"
        );
        Ok(outcomes)
    }

    /// Issuer runs made since the last call, in start order.
    pub fn take_invocations(&mut self) -> Vec<IssuerInvocation> {
        self.gateway.take_invocations()
    }

    async fn process(&self, command: Command, entry: &Entry) -> Result<EntryOutcome, FatalError> {
        let mut outcome = EntryOutcome::new(entry);

        match command {
            Command::Export => self.export(entry, &mut outcome),

            Command::Check { fix, export } => {
                let status = self.evaluate(entry, &mut outcome);
                if fix {
                    match fix_operation(status) {
                        Some(operation) => {
                            let options = IssueOptions {
                                force: true,
                                dry_run: false,
                            };
                            if self.act(entry, operation, options, &mut outcome).await? && export {
                                self.export(entry, &mut outcome);
                            }
                        }
                        None => outcome.enter(EntryState::Skipped),
                    }
                }
            }

            Command::New { force, export } => {
                self.evaluate(entry, &mut outcome);
                let options = IssueOptions {
                    force,
                    dry_run: false,
                };
                if self.act(entry, Operation::New, options, &mut outcome).await? && export {
                    self.export(entry, &mut outcome);
                }
            }

            Command::Renew {
                force,
                dry_run,
                export,
            } => {
                self.evaluate(entry, &mut outcome);
                let options = IssueOptions { force, dry_run };
                // A dry run saves nothing worth publishing
                if self.act(entry, Operation::Renew, options, &mut outcome).await?
                    && export
                    && !dry_run
                {
                    self.export(entry, &mut outcome);
                }
            }
        }

        outcome.enter(EntryState::Done);
        Ok(outcome)
    }

    fn evaluate(&self, entry: &Entry, outcome: &mut EntryOutcome) -> CertStatus {
        let cert = self.layout.live_dir(entry.primary_domain()).join(LIVE_CERT);
        let evaluation = self.evaluator.evaluate(&cert, Utc::now());
        outcome.record(&evaluation);
        if !outcome.reached(EntryState::Evaluated) {
            outcome.enter(EntryState::Evaluated);
        }

        info!(
            entry = %entry.name,
            status = %evaluation.status,
            days_left = ?evaluation.days_left,
            "Certificate status"
        );
        evaluation.status
    }

    /// Resolve credentials and run the issuer.
    ///
    /// Returns whether the issuer succeeded. The status is re-evaluated
    /// whenever the issuer actually ran.
    async fn act(
        &self,
        entry: &Entry,
        operation: Operation,
        options: IssueOptions,
        outcome: &mut EntryOutcome,
    ) -> Result<bool, FatalError> {
        let credentials = match credentials::resolve(entry, &self.environment) {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(entry = %entry.name, error = %e, "Cannot resolve credentials");
                outcome.error = Some(e.into());
                return Ok(false);
            }
        };

        let result = self
            .gateway
            .invoke(entry, &credentials, operation, options)
            .await;

        let succeeded = match result {
            Ok(_) => {
                outcome.action_taken = operation.into();
                outcome.enter(EntryState::Acted);
                true
            }
            Err(IssuerError::NotFound(binary)) => {
                error!(entry = %entry.name, binary = %binary, "Issuer binary not found");
                return Err(FatalError::IssuerNotFound(binary));
            }
            Err(e) => {
                warn!(entry = %entry.name, operation = %operation, error = %e, "Issuer run failed");
                let invoked = e.was_invoked();
                outcome.error = Some(e.into());
                if !invoked {
                    return Ok(false);
                }
                outcome.action_taken = operation.into();
                outcome.enter(EntryState::Acted);
                false
            }
        };

        self.evaluate(entry, outcome);
        Ok(succeeded)
    }

    fn export(&self, entry: &Entry, outcome: &mut EntryOutcome) {
        match self.exporter.export(entry) {
            Ok(result) => {
                outcome.exported = result.exported;
                if result.exported {
                    outcome.enter(EntryState::Exported);
                } else {
                    debug!(entry = %entry.name, "Nothing exported");
                }
            }
            Err(e) => {
                warn!(entry = %entry.name, error = %e, "Export failed");
                outcome.error = Some(e.into());
            }
        }
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("evaluator", &self.evaluator)
            .field("gateway", &self.gateway)
            .field("layout", &self.layout)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}
