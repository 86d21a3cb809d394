//! Shared fixtures: a temporary data directory, real PEM certificates and a
//! fake issuer that behaves like certbot on success.

#![allow(dead_code)]

use async_trait::async_trait;
use certman::{IssuerRunner, ProcessOutput};
use certman_config::{ConfigLoader, Environment, LoadedConfig};
use rcgen::{CertificateParams, KeyPair};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

pub const GLOBAL_CONFIG: &str = "warn_days = 30\nforce_renew_days = 7\n";

/// Self-signed certificate and key expiring `days` from now
pub fn certificate(domain: &str, days: i64) -> (String, String) {
    let mut params = CertificateParams::new(vec![domain.to_string()]).unwrap();
    params.not_before = time::OffsetDateTime::now_utc() - time::Duration::days(1);
    params.not_after = time::OffsetDateTime::now_utc() + time::Duration::days(days);
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    (cert.pem(), key.serialize_pem())
}

/// Write a certbot-style live directory under `state_dir`
pub fn write_live(state_dir: &Path, primary: &str, days: i64) {
    let live = state_dir.join("live").join(primary);
    fs::create_dir_all(&live).unwrap();
    let (cert, key) = certificate(primary, days);
    fs::write(live.join("cert.pem"), &cert).unwrap();
    fs::write(live.join("chain.pem"), &cert).unwrap();
    fs::write(live.join("fullchain.pem"), format!("{cert}{cert}")).unwrap();
    fs::write(live.join("privkey.pem"), key).unwrap();
}

pub struct Fixture {
    _tmp: TempDir,
    pub data_dir: PathBuf,
}

impl Fixture {
    pub fn new(global: &str) -> Self {
        let tmp = TempDir::new().expect("create temp dir");
        let data_dir = tmp.path().join("data");
        fs::create_dir_all(data_dir.join("conf")).unwrap();
        fs::write(data_dir.join("conf/config.toml"), global).unwrap();
        Self {
            _tmp: tmp,
            data_dir,
        }
    }

    pub fn conf_dir(&self) -> PathBuf {
        self.data_dir.join("conf")
    }

    pub fn config_path(&self) -> PathBuf {
        self.conf_dir().join("config.toml")
    }

    pub fn write_conf(&self, file: &str, content: &str) {
        fs::write(self.conf_dir().join(file), content).unwrap();
    }

    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("run/letsencrypt")
    }

    pub fn output_dir(&self, entry: &str) -> PathBuf {
        self.data_dir.join("output").join(entry)
    }

    pub fn write_live_cert(&self, primary: &str, days: i64) {
        write_live(&self.state_dir(), primary, days);
    }

    pub fn load(&self, environment: Environment) -> LoadedConfig {
        ConfigLoader::new(&self.data_dir, self.config_path())
            .with_environment(environment)
            .load()
            .expect("load config")
    }
}

/// Fake issuer.
///
/// On success it writes a fresh certificate into `<--config-dir>/live/<--cert-name>/`
/// unless the run is a `--dry-run`. With a `delay` each run sleeps, so runs
/// that are allowed to overlap show up in `max_in_flight`.
pub struct FakeIssuer {
    pub calls: Mutex<Vec<Vec<String>>>,
    pub exit_code: i32,
    pub not_found: bool,
    pub validity_days: i64,
    pub delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeIssuer {
    pub fn succeeding() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            exit_code: 0,
            not_found: false,
            validity_days: 90,
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::succeeding()
        }
    }

    pub fn failing(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::succeeding()
        }
    }

    pub fn missing() -> Self {
        Self {
            not_found: true,
            ..Self::succeeding()
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of runs seen in progress at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

#[async_trait]
impl IssuerRunner for FakeIssuer {
    async fn run(&self, _program: &str, args: &[String]) -> io::Result<ProcessOutput> {
        if self.not_found {
            return Err(io::Error::new(io::ErrorKind::NotFound, "No such file or directory"));
        }
        self.calls.lock().unwrap().push(args.to_vec());

        if let Some(delay) = self.delay {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        if self.exit_code != 0 {
            return Ok(ProcessOutput {
                exit_code: Some(self.exit_code),
                stdout: String::new(),
                stderr: "Some challenges have failed.\n".to_string(),
            });
        }

        let dry_run = args.iter().any(|a| a == "--dry-run");
        if let (false, Some(state_dir), Some(name)) = (
            dry_run,
            flag_value(args, "--config-dir"),
            flag_value(args, "--cert-name"),
        ) {
            write_live(Path::new(state_dir), name, self.validity_days);
        }

        Ok(ProcessOutput {
            exit_code: Some(0),
            stdout: "Successfully received certificate.\n".to_string(),
            stderr: String::new(),
        })
    }
}
