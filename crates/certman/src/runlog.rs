//! Per-run command log
//!
//! Every `check`, `new`, `renew` and `export` run leaves one JSON document at
//! `log/<YYYYmmdd-HHMMSS>_<command>.log`. It holds the report (or the fatal
//! error) and the full output of each issuer process the run started.
//! Nothing here deletes old logs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::issuer::IssuerInvocation;
use crate::orchestrator::{Command, FatalError};
use crate::report::RunReport;

/// Attempts at a free file name when runs start within the same second
const MAX_NAME_ATTEMPTS: usize = 100;

#[derive(Debug, Serialize)]
pub struct RunLog<'a> {
    pub command: &'static str,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<&'a RunReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
    pub invocations: &'a [IssuerInvocation],
}

impl<'a> RunLog<'a> {
    pub fn completed(
        started_at: DateTime<Utc>,
        report: &'a RunReport,
        invocations: &'a [IssuerInvocation],
    ) -> Self {
        Self {
            command: report.command,
            started_at,
            finished_at: Utc::now(),
            report: Some(report),
            fatal: None,
            invocations,
        }
    }

    pub fn aborted(
        started_at: DateTime<Utc>,
        command: Command,
        error: &FatalError,
        invocations: &'a [IssuerInvocation],
    ) -> Self {
        Self {
            command: command.name(),
            started_at,
            finished_at: Utc::now(),
            report: None,
            fatal: Some(error.to_string()),
            invocations,
        }
    }

    /// Write the log under `log_dir`, returning its path.
    ///
    /// An existing file is never overwritten; a numeric suffix is added
    /// instead.
    pub fn write(&self, log_dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(log_dir)?;
        let stem = format!("{}_{}", self.started_at.format("%Y%m%d-%H%M%S"), self.command);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = match attempt {
                0 => log_dir.join(format!("{stem}.log")),
                n => log_dir.join(format!("{stem}-{n}.log")),
            };
            let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            };
            serde_json::to_writer_pretty(&mut file, self)?;
            file.write_all(b"\n")?;
            return Ok(path);
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free run log name for {stem}"),
        ))
    }
}
