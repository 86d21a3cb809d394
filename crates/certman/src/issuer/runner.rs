//! Subprocess seam for the issuer
//!
//! [`IssuerRunner`] is the only place a process is spawned, so tests can
//! swap in a fake issuer.

use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

/// Captured result of one issuer run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs the issuer binary.
///
/// A missing binary must surface as an [`io::ErrorKind::NotFound`] error and
/// an exceeded timeout as [`io::ErrorKind::TimedOut`].
#[async_trait]
pub trait IssuerRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> io::Result<ProcessOutput>;
}

/// Spawns the issuer with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the issuer if it runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl IssuerRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> io::Result<ProcessOutput> {
        trace!(program = %program, args = ?args, "Spawning issuer");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match self.timeout {
            // Dropping the pending future drops the child, which kills it
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("issuer did not finish within {limit:?}"),
                    )
                })??,
            None => child.wait_with_output().await?,
        };

        debug!(program = %program, status = %output.status, "Issuer finished");

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_found() {
        let err = ProcessRunner::new()
            .run("/nonexistent/certbot-binary", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_captures_exit_code_and_stderr() {
        let output = ProcessRunner::new()
            .run("sh", &args(&["-c", "echo out; echo boom >&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "boom");
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = ProcessRunner::new()
            .with_timeout(Some(Duration::from_millis(100)))
            .run("sleep", &args(&["5"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
