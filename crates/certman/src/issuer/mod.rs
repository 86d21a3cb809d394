//! External issuer gateway
//!
//! Drives the ACME client binary (certbot with the `dns-aliyun` plugin) for
//! one entry at a time.
//!
//! # Invocation Flow
//!
//! 1. The resolved key pair is written to `run/credentials/<entry>.ini`
//!    (mode 0600), replacing whatever was there
//! 2. The issuer is started through an [`IssuerRunner`] with the entry's
//!    domains and the credentials file path
//! 3. Exit status and a bounded tail of stderr become the [`IssuerResult`]
//!
//! Both steps happen inside one call, so a credentials file is never reused
//! across invocations.
//!
//! certbot locks its config, work and logs directories, which every entry
//! shares. The gateway therefore runs one issuer process at a time, whatever
//! the batch concurrency. Each run is kept as an [`IssuerInvocation`] for the
//! run log.

mod error;
mod runner;

pub use error::IssuerError;
pub use runner::{IssuerRunner, ProcessOutput, ProcessRunner};

use certman_config::{AcmeServer, DataLayout, Entry, GlobalConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credentials::ResolvedCredentials;

/// certbot authenticator plugin for Aliyun DNS
const AUTHENTICATOR: &str = "dns-aliyun";

/// Lines of stderr kept in the failure summary
const SUMMARY_LINES: usize = 20;

/// Byte cap for the failure summary
const SUMMARY_BYTES: usize = 2048;

/// Issuer operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    New,
    Renew,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => f.write_str("new"),
            Self::Renew => f.write_str("renew"),
        }
    }
}

/// Per-invocation switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IssueOptions {
    /// Re-issue even when the issuer thinks the certificate is not due
    pub force: bool,
    /// Exercise the renewal flow without saving certificates
    pub dry_run: bool,
}

/// Outcome of a successful issuer run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerResult {
    pub success: bool,
    /// Tail of the issuer's error output, bounded in size
    pub stderr_summary: String,
}

/// One issuer process run, as written to the run log.
///
/// `args` only carry the credentials file path, never the key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuerInvocation {
    pub entry: String,
    pub operation: Operation,
    pub program: String,
    pub args: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// `None` when the process was killed or never started
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Spawn or timeout failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Builds issuer command lines and runs them.
pub struct IssuerGateway {
    runner: Arc<dyn IssuerRunner>,
    binary: String,
    email: Option<String>,
    acme_server: AcmeServer,
    layout: DataLayout,
    /// Serializes issuer runs and records them in start order
    journal: Mutex<Vec<IssuerInvocation>>,
}

impl IssuerGateway {
    pub fn new(runner: Arc<dyn IssuerRunner>, global: &GlobalConfig, layout: DataLayout) -> Self {
        Self {
            runner,
            binary: global.issuer_binary.clone(),
            email: global.email.clone(),
            acme_server: global.acme_server,
            layout,
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Drain the invocations recorded so far.
    pub fn take_invocations(&mut self) -> Vec<IssuerInvocation> {
        std::mem::take(self.journal.get_mut())
    }

    /// Runtime credentials file for an entry
    pub fn credentials_path(&self, entry: &Entry) -> PathBuf {
        self.layout.credentials_file(&entry.name)
    }

    /// Full argument list for one operation.
    pub fn build_args(
        &self,
        entry: &Entry,
        operation: Operation,
        credentials_file: &Path,
        options: IssueOptions,
    ) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        let credentials_file = credentials_file.display().to_string();

        match operation {
            Operation::New => {
                args.extend(
                    [
                        "certonly",
                        "--authenticator",
                        AUTHENTICATOR,
                        "--dns-aliyun-credentials",
                        credentials_file.as_str(),
                        "--agree-tos",
                    ]
                    .map(String::from),
                );
                match &self.email {
                    Some(email) => args.extend(["--email".to_string(), email.clone()]),
                    None => args.push("--register-unsafely-without-email".to_string()),
                }
                if self.acme_server == AcmeServer::Staging {
                    args.push("--test-cert".to_string());
                }
                if options.force {
                    args.push("--force-renewal".to_string());
                }
                args.extend(["--cert-name".to_string(), entry.primary_domain().to_string()]);
                for domain in entry.all_domains() {
                    args.extend(["-d".to_string(), domain]);
                }
            }
            Operation::Renew => {
                args.extend(
                    [
                        "renew",
                        "--cert-name",
                        entry.primary_domain(),
                        "--authenticator",
                        AUTHENTICATOR,
                        "--dns-aliyun-credentials",
                        credentials_file.as_str(),
                    ]
                    .map(String::from),
                );
                if options.force {
                    args.push("--force-renewal".to_string());
                }
                if options.dry_run {
                    args.push("--dry-run".to_string());
                }
            }
        }

        args.extend([
            "--config-dir".to_string(),
            self.layout.issuer_state_dir().display().to_string(),
            "--work-dir".to_string(),
            self.layout.issuer_work_dir().display().to_string(),
            "--logs-dir".to_string(),
            self.layout.log_dir().display().to_string(),
            "--non-interactive".to_string(),
        ]);
        args
    }

    /// Refresh the credentials file and run the issuer for one entry.
    ///
    /// # Errors
    ///
    /// [`IssuerError::NotFound`] when the binary is missing (fatal for the
    /// run); any other variant only concerns this entry.
    pub async fn invoke(
        &self,
        entry: &Entry,
        credentials: &ResolvedCredentials,
        operation: Operation,
        options: IssueOptions,
    ) -> Result<IssuerResult, IssuerError> {
        for dir in [
            self.layout.issuer_state_dir(),
            self.layout.issuer_work_dir(),
            self.layout.log_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|source| IssuerError::Prepare {
                path: dir.clone(),
                source,
            })?;
        }

        // Held until the process exits: the shared certbot dirs take one writer
        let mut journal = self.journal.lock().await;

        let credentials_file = self.credentials_path(entry);
        write_credentials_file(&credentials_file, credentials).map_err(|source| {
            IssuerError::Prepare {
                path: credentials_file.clone(),
                source,
            }
        })?;

        let args = self.build_args(entry, operation, &credentials_file, options);
        info!(
            entry = %entry.name,
            operation = %operation,
            domains = ?entry.all_domains(),
            provenance = %credentials.provenance(),
            "Invoking issuer"
        );

        let started_at = Utc::now();
        let started = Instant::now();
        let result = self.runner.run(&self.binary, &args).await;
        let mut record = IssuerInvocation {
            entry: entry.name.clone(),
            operation,
            program: self.binary.clone(),
            args,
            started_at,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
        };

        let output = match result {
            Ok(output) => {
                record.exit_code = output.exit_code;
                record.stdout = output.stdout.clone();
                record.stderr = output.stderr.clone();
                journal.push(record);
                output
            }
            Err(e) => {
                record.error = Some(e.to_string());
                journal.push(record);
                return Err(match e.kind() {
                    io::ErrorKind::NotFound => IssuerError::NotFound(self.binary.clone()),
                    io::ErrorKind::TimedOut => IssuerError::Timeout(e.to_string()),
                    _ => IssuerError::Spawn(e),
                });
            }
        };
        drop(journal);

        let stderr_summary = summarize(if output.stderr.trim().is_empty() {
            &output.stdout
        } else {
            &output.stderr
        });

        if !output.success() {
            let status = output
                .exit_code
                .map(|code| format!("code {code}"))
                .unwrap_or_else(|| "signal".to_string());
            warn!(entry = %entry.name, operation = %operation, status = %status, "Issuer failed");
            return Err(IssuerError::Failed {
                status,
                summary: stderr_summary,
            });
        }

        debug!(entry = %entry.name, operation = %operation, "Issuer succeeded");
        Ok(IssuerResult {
            success: true,
            stderr_summary,
        })
    }
}

impl fmt::Debug for IssuerGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuerGateway")
            .field("binary", &self.binary)
            .field("acme_server", &self.acme_server)
            .field("layout", &self.layout)
            .finish()
    }
}

/// Write the plugin's INI credentials file, owner-only on Unix.
pub fn write_credentials_file(path: &Path, credentials: &ResolvedCredentials) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "credentials path has no parent"))?;
    fs::create_dir_all(dir)?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }

    let mut file = options.open(path)?;
    // The mode above only applies on creation
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    write!(
        file,
        "dns_aliyun_access_key = {}\ndns_aliyun_access_key_secret = {}\n",
        credentials.access_key_id(),
        credentials.access_key_secret()
    )?;
    file.sync_all()
}

/// Last lines of issuer output, capped at [`SUMMARY_BYTES`].
fn summarize(output: &str) -> String {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = lines[lines.len().saturating_sub(SUMMARY_LINES)..].join("\n");

    if tail.len() <= SUMMARY_BYTES {
        return tail;
    }
    let mut start = tail.len() - SUMMARY_BYTES;
    while !tail.is_char_boundary(start) {
        start += 1;
    }
    tail[start..].to_string()
}
