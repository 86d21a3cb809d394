//! Run report
//!
//! The report is the only thing written to stdout: one line per entry in
//! text mode, or a single JSON document with `--json`. Logs go to stderr.

use certman_config::{Entry, Environment, GlobalConfig, RejectedEntry};
use chrono::SecondsFormat;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::credentials::{self, Provenance};
use crate::orchestrator::{aggregate_exit_code, Command, EntryError, EntryOutcome};

/// Exit code for conditions that abort the run
pub const EXIT_FATAL: u8 = 1;

/// An entry file that was excluded while loading
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedReport {
    pub source: PathBuf,
    pub name: Option<String>,
    pub error: EntryError,
}

impl From<&RejectedEntry> for RejectedReport {
    fn from(rejected: &RejectedEntry) -> Self {
        Self {
            source: rejected.source.clone(),
            name: rejected.name.clone(),
            error: EntryError::from(&rejected.error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub command: &'static str,
    pub warn_days: u32,
    pub force_renew_days: u32,
    pub fix: bool,
    pub outcomes: Vec<EntryOutcome>,
    pub rejected: Vec<RejectedReport>,
    pub exit_code: u8,
}

impl RunReport {
    pub fn new(
        command: Command,
        global: &GlobalConfig,
        outcomes: Vec<EntryOutcome>,
        rejected: &[RejectedEntry],
    ) -> Self {
        Self {
            command: command.name(),
            warn_days: global.warn_days,
            force_renew_days: global.force_renew_days,
            fix: matches!(command, Command::Check { fix: true, .. }),
            exit_code: aggregate_exit_code(&outcomes),
            outcomes,
            rejected: rejected.iter().map(RejectedReport::from).collect(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for outcome in &self.outcomes {
            out.push_str(&render_outcome(outcome));
            out.push('\n');
        }
        render_rejected(&mut out, &self.rejected);
        out
    }
}

/// `[<status>] <entry> <primary> days_left=.. not_after=.. action=.. exported=..`
pub fn render_outcome(outcome: &EntryOutcome) -> String {
    let mut line = format!(
        "[{}] {} {} days_left={} not_after={} action={} exported={}",
        outcome.status.map_or("-", |s| s.as_str()),
        outcome.entry_name,
        outcome.primary_domain,
        outcome
            .days_left
            .map_or_else(|| "-".to_string(), |d| d.to_string()),
        outcome.not_after.map_or_else(
            || "-".to_string(),
            |t| t.to_rfc3339_opts(SecondsFormat::Secs, true)
        ),
        outcome.action_taken,
        outcome.exported,
    );
    if let Some(error) = &outcome.error {
        let _ = write!(line, " error={error}");
    }
    line
}

/// One line of the `entries` listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySummary {
    pub name: String,
    pub description: String,
    pub primary_domain: String,
    pub domains: Vec<String>,
    /// Configured credential path, not whether it resolves
    pub credential_source: Option<Provenance>,
}

impl From<&Entry> for EntrySummary {
    fn from(entry: &Entry) -> Self {
        Self {
            name: entry.name.clone(),
            description: entry.description.clone(),
            primary_domain: entry.primary_domain().to_string(),
            domains: entry.all_domains(),
            credential_source: credentials::configured_source(entry),
        }
    }
}

/// Merged entries plus the files that failed to load
#[derive(Debug, Clone, Serialize)]
pub struct EntryListing {
    pub entries: Vec<EntrySummary>,
    pub rejected: Vec<RejectedReport>,
}

impl EntryListing {
    pub fn new(entries: &[Entry], rejected: &[RejectedEntry]) -> Self {
        Self {
            entries: entries.iter().map(EntrySummary::from).collect(),
            rejected: rejected.iter().map(RejectedReport::from).collect(),
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let _ = writeln!(
                out,
                "{} {} domains={} credentials={}",
                entry.name,
                entry.primary_domain,
                entry.domains.join(","),
                entry
                    .credential_source
                    .map_or_else(|| "none".to_string(), |p| p.to_string()),
            );
        }
        render_rejected(&mut out, &self.rejected);
        out
    }
}

/// Credential check for one entry, secrets omitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryCheck {
    pub name: String,
    pub provenance: Option<Provenance>,
    pub error: Option<EntryError>,
}

/// Result of `config-validate`
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub entries: Vec<EntryCheck>,
    pub rejected: Vec<RejectedReport>,
    pub valid: bool,
}

impl ValidationReport {
    /// Resolve credentials for every entry against `environment`.
    pub fn new(entries: &[Entry], rejected: &[RejectedEntry], environment: &Environment) -> Self {
        let entries: Vec<EntryCheck> = entries
            .iter()
            .map(|entry| match credentials::resolve(entry, environment) {
                Ok(resolved) => EntryCheck {
                    name: entry.name.clone(),
                    provenance: Some(resolved.provenance()),
                    error: None,
                },
                Err(e) => EntryCheck {
                    name: entry.name.clone(),
                    provenance: None,
                    error: Some(e.into()),
                },
            })
            .collect();

        let valid = rejected.is_empty() && entries.iter().all(|e| e.error.is_none());
        Self {
            entries,
            rejected: rejected.iter().map(RejectedReport::from).collect(),
            valid,
        }
    }

    pub fn exit_code(&self) -> u8 {
        if self.valid {
            0
        } else {
            EXIT_FATAL
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for check in &self.entries {
            match (&check.provenance, &check.error) {
                (Some(provenance), _) => {
                    let _ = writeln!(out, "[ok] {} credentials={provenance}", check.name);
                }
                (None, Some(error)) => {
                    let _ = writeln!(out, "[invalid] {} error={error}", check.name);
                }
                (None, None) => {}
            }
        }
        render_rejected(&mut out, &self.rejected);
        let _ = writeln!(
            out,
            "configuration is {}",
            if self.valid { "valid" } else { "invalid" }
        );
        out
    }
}

fn render_rejected(out: &mut String, rejected: &[RejectedReport]) {
    for rejected in rejected {
        let _ = writeln!(
            out,
            "[rejected] {} name={} error={}",
            rejected.source.display(),
            rejected.name.as_deref().unwrap_or("-"),
            rejected.error
        );
    }
}
