//! Certman - Main entry point
//!
//! Certificate lifecycle automation for cron: checks expiry, renews through
//! certbot and exports the results. The exit code of `check` is the worst
//! certificate status (0, 10, 20, 30); fatal errors exit with 1.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use certman::logging::{self, LogFormat};
use certman::orchestrator::select;
use certman::report::{EntryListing, ValidationReport};
use certman::{Command, Orchestrator, ProcessRunner, RunLog, RunReport, EXIT_FATAL};
use certman_config::{
    resolve_config_path, DataLayout, GlobalConfig, LoadedConfig, DEFAULT_CONFIG_FILE,
};
use chrono::Utc;

/// Certman - certificate lifecycle automation around certbot
#[derive(Parser, Debug)]
#[command(name = "certman")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Data directory holding conf/, run/, log/ and output/
    #[arg(
        short = 'D',
        long = "data-dir",
        env = "CERTMAN_DATA_DIR",
        default_value = "data",
        global = true
    )]
    data_dir: PathBuf,

    /// Global config file; relative paths are looked up in <data-dir>/conf
    #[arg(
        short = 'c',
        long = "config-file",
        env = "CERTMAN_CONFIG_FILE",
        default_value = DEFAULT_CONFIG_FILE,
        global = true
    )]
    config_file: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log line format on stderr
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    /// Print the report as JSON
    #[arg(long = "json", global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check certificate expiry; exits with the worst status
    Check {
        /// Only this entry
        #[arg(short = 'n', long = "name")]
        name: Option<String>,

        /// Override warn_days
        #[arg(short = 'w', long = "warn-days")]
        warn_days: Option<u32>,

        /// Override force_renew_days
        #[arg(short = 'F', long = "force-renew-days")]
        force_renew_days: Option<u32>,

        /// Issue missing and renew expiring certificates
        #[arg(long = "fix")]
        fix: bool,

        /// Do not export after fixing
        #[arg(long = "no-export")]
        no_export: bool,
    },
    /// Issue a certificate for one entry
    New {
        #[arg(short = 'n', long = "name")]
        name: String,

        /// Re-issue even if a valid certificate exists
        #[arg(short = 'f', long = "force")]
        force: bool,

        #[arg(long = "no-export")]
        no_export: bool,
    },
    /// Renew one entry, or all of them
    Renew {
        #[arg(short = 'n', long = "name")]
        name: Option<String>,

        /// Renew even if the certificate is not due
        #[arg(short = 'f', long = "force")]
        force: bool,

        /// Test renewal without saving anything
        #[arg(long = "dry-run")]
        dry_run: bool,

        #[arg(long = "no-export")]
        no_export: bool,
    },
    /// Copy issued files to output/<entry>/
    Export {
        #[arg(short = 'n', long = "name")]
        name: Option<String>,
    },
    /// List configured entries
    Entries,
    /// Load the configuration and resolve every entry's credentials
    ConfigValidate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose, cli.log_format);

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    let config_path = resolve_config_path(&cli.data_dir, &cli.config_file);
    let loaded = certman_config::load(&cli.data_dir, &config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;

    match cli.command {
        Commands::Check {
            name,
            warn_days,
            force_renew_days,
            fix,
            no_export,
        } => {
            let global = loaded
                .global
                .clone()
                .with_thresholds(warn_days, force_renew_days)?;
            let command = Command::Check {
                fix,
                export: !no_export,
            };
            execute(&loaded, global, command, name.as_deref(), cli.json)
        }
        Commands::New {
            name,
            force,
            no_export,
        } => {
            let command = Command::New {
                force,
                export: !no_export,
            };
            execute(&loaded, loaded.global.clone(), command, Some(name.as_str()), cli.json)
        }
        Commands::Renew {
            name,
            force,
            dry_run,
            no_export,
        } => {
            let command = Command::Renew {
                force,
                dry_run,
                export: !no_export,
            };
            execute(&loaded, loaded.global.clone(), command, name.as_deref(), cli.json)
        }
        Commands::Export { name } => execute(
            &loaded,
            loaded.global.clone(),
            Command::Export,
            name.as_deref(),
            cli.json,
        ),
        Commands::Entries => {
            let listing = EntryListing::new(&loaded.entries, &loaded.rejected);
            emit(&listing, listing.render_text(), cli.json)?;
            Ok(0)
        }
        Commands::ConfigValidate => {
            let report = ValidationReport::new(&loaded.entries, &loaded.rejected, &loaded.environment);
            emit(&report, report.render_text(), cli.json)?;
            Ok(report.exit_code())
        }
    }
}

/// Run a command against the selected entries, print the report and keep a
/// run log.
fn execute(
    loaded: &LoadedConfig,
    global: GlobalConfig,
    command: Command,
    name: Option<&str>,
    json: bool,
) -> Result<u8> {
    let entries = select(&loaded.entries, name)?;

    let runner = ProcessRunner::new()
        .with_timeout(global.issuer_timeout_secs.map(Duration::from_secs));
    let mut orchestrator = Orchestrator::new(
        &global,
        loaded.layout.clone(),
        loaded.environment.clone(),
        Arc::new(runner),
    );
    debug!(orchestrator = ?orchestrator, "Orchestrator ready");

    // Create runtime for the issuer subprocesses
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let started_at = Utc::now();
    let result = runtime.block_on(orchestrator.run(command, &entries));
    let invocations = orchestrator.take_invocations();

    let outcomes = match result {
        Ok(outcomes) => outcomes,
        Err(e) => {
            write_run_log(
                &loaded.layout,
                &RunLog::aborted(started_at, command, &e, &invocations),
            );
            return Err(e.into());
        }
    };

    let report = RunReport::new(command, &global, outcomes, &loaded.rejected);
    emit(&report, report.render_text(), json)?;
    write_run_log(
        &loaded.layout,
        &RunLog::completed(started_at, &report, &invocations),
    );
    Ok(report.exit_code)
}

/// A failed run log never changes the exit code.
fn write_run_log(layout: &DataLayout, log: &RunLog<'_>) {
    match log.write(&layout.log_dir()) {
        Ok(path) => info!(path = %path.display(), "Run log written"),
        Err(e) => warn!(error = %e, "Failed to write run log"),
    }
}

fn emit<T: Serialize>(value: &T, text: String, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("failed to serialize report")?
        );
    } else {
        print!("{text}");
    }
    Ok(())
}
