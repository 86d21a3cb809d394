//! Per-entry outcomes and exit-code aggregation

use certman_config::{ConfigError, Entry};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::credentials::CredentialError;
use crate::expiry::{CertStatus, Evaluation};
use crate::export::ExportError;
use crate::issuer::{IssuerError, Operation};

/// Lifecycle position of one entry within a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    Evaluated,
    Skipped,
    Acted,
    Exported,
    Done,
}

/// Issuer operation actually run for an entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[default]
    None,
    New,
    Renew,
}

impl From<Operation> for Action {
    fn from(operation: Operation) -> Self {
        match operation {
            Operation::New => Self::New,
            Operation::Renew => Self::Renew,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::New => f.write_str("new"),
            Self::Renew => f.write_str("renew"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Credential,
    Issuer,
    Export,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => f.write_str("config"),
            Self::Credential => f.write_str("credential"),
            Self::Issuer => f.write_str("issuer"),
            Self::Export => f.write_str("export"),
        }
    }
}

/// An error isolated to one entry, flattened for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryError {
    pub kind: ErrorKind,
    pub message: String,
}

impl EntryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<&ConfigError> for EntryError {
    fn from(e: &ConfigError) -> Self {
        Self::new(ErrorKind::Config, e.to_string())
    }
}

impl From<CredentialError> for EntryError {
    fn from(e: CredentialError) -> Self {
        Self::new(ErrorKind::Credential, e.to_string())
    }
}

impl From<IssuerError> for EntryError {
    fn from(e: IssuerError) -> Self {
        Self::new(ErrorKind::Issuer, e.to_string())
    }
}

impl From<ExportError> for EntryError {
    fn from(e: ExportError) -> Self {
        Self::new(ErrorKind::Export, e.to_string())
    }
}

/// Everything one command did to one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryOutcome {
    pub entry_name: String,
    pub primary_domain: String,
    /// Status before any action
    pub initial_status: Option<CertStatus>,
    /// Status after the last action, or `initial_status` when nothing ran
    pub status: Option<CertStatus>,
    pub days_left: Option<i64>,
    pub not_after: Option<DateTime<Utc>>,
    pub action_taken: Action,
    pub exported: bool,
    pub error: Option<EntryError>,
    /// States traversed, in order
    pub states: Vec<EntryState>,
}

impl EntryOutcome {
    pub fn new(entry: &Entry) -> Self {
        Self {
            entry_name: entry.name.clone(),
            primary_domain: entry.primary_domain().to_string(),
            initial_status: None,
            status: None,
            days_left: None,
            not_after: None,
            action_taken: Action::None,
            exported: false,
            error: None,
            states: vec![EntryState::Pending],
        }
    }

    pub fn state(&self) -> EntryState {
        self.states.last().copied().unwrap_or(EntryState::Pending)
    }

    pub(crate) fn enter(&mut self, state: EntryState) {
        self.states.push(state);
    }

    /// Record an evaluation; the first one also becomes the initial status.
    pub(crate) fn record(&mut self, evaluation: &Evaluation) {
        if self.initial_status.is_none() {
            self.initial_status = Some(evaluation.status);
        }
        self.status = Some(evaluation.status);
        self.days_left = evaluation.days_left;
        self.not_after = evaluation.not_after;
    }

    /// Exit-code contribution; entries that were never evaluated count as OK
    pub fn severity(&self) -> u8 {
        self.status.map_or(0, CertStatus::severity)
    }

    pub fn reached(&self, state: EntryState) -> bool {
        self.states.contains(&state)
    }
}

/// Maximum severity over a batch; an empty batch is OK.
pub fn aggregate_exit_code(outcomes: &[EntryOutcome]) -> u8 {
    outcomes
        .iter()
        .map(EntryOutcome::severity)
        .max()
        .unwrap_or(0)
}
