//! Certificate expiry classification
//!
//! Reads `notAfter` from the issuer's live certificate and sorts it into one
//! of four [`CertStatus`] buckets using the warning and forced-renewal
//! thresholds.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

const SECONDS_PER_DAY: i64 = 86_400;

/// Expiry state of one certificate.
///
/// Ordered by severity; the discriminant is the `check` exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CertStatus {
    Ok = 0,
    Warning = 10,
    ForceRenew = 20,
    Missing = 30,
}

impl CertStatus {
    /// Exit-code severity
    pub fn severity(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::ForceRenew => "force-renew",
            Self::Missing => "missing",
        }
    }
}

impl fmt::Display for CertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the issuer's on-disk state says about a certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRecord {
    pub path: PathBuf,
    pub not_after: DateTime<Utc>,
}

/// Whole days left, rounded towards negative infinity.
pub fn days_left(not_after: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (not_after - now).num_seconds().div_euclid(SECONDS_PER_DAY)
}

/// Classify a certificate.
///
/// Priority: absent → `Missing`; expired or within `force_days` →
/// `ForceRenew`; within `warn_days` → `Warning`; otherwise `Ok`. Both
/// thresholds are inclusive.
pub fn classify(
    not_after: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    warn_days: u32,
    force_days: u32,
) -> CertStatus {
    let Some(not_after) = not_after else {
        return CertStatus::Missing;
    };

    if not_after <= now {
        return CertStatus::ForceRenew;
    }

    let days = days_left(not_after, now);
    if days <= i64::from(force_days) {
        CertStatus::ForceRenew
    } else if days <= i64::from(warn_days) {
        CertStatus::Warning
    } else {
        CertStatus::Ok
    }
}

/// Parse `notAfter` from the first PEM block of a certificate file.
pub fn parse_not_after(pem_bytes: &[u8]) -> Result<DateTime<Utc>, String> {
    let block = pem::parse(pem_bytes).map_err(|e| format!("invalid PEM: {e}"))?;
    let (_, cert) = x509_parser::parse_x509_certificate(block.contents())
        .map_err(|e| format!("invalid X509 certificate: {e}"))?;

    let timestamp = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| format!("notAfter out of range: {timestamp}"))
}

/// Read the record for a certificate file.
///
/// Absent and unreadable files both yield `None`.
pub fn read_record(path: &Path) -> Option<CertificateRecord> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            trace!(path = %path.display(), "No certificate found");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read certificate");
            return None;
        }
    };

    match parse_not_after(&bytes) {
        Ok(not_after) => Some(CertificateRecord {
            path: path.to_path_buf(),
            not_after,
        }),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable certificate");
            None
        }
    }
}

/// Result of evaluating one certificate at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub status: CertStatus,
    pub not_after: Option<DateTime<Utc>>,
    pub days_left: Option<i64>,
}

/// Applies the configured thresholds to certificate files.
#[derive(Debug, Clone, Copy)]
pub struct ExpiryEvaluator {
    warn_days: u32,
    force_days: u32,
}

impl ExpiryEvaluator {
    pub fn new(warn_days: u32, force_days: u32) -> Self {
        Self {
            warn_days,
            force_days,
        }
    }

    pub fn evaluate(&self, cert_path: &Path, now: DateTime<Utc>) -> Evaluation {
        let record = read_record(cert_path);
        let not_after = record.map(|r| r.not_after);
        let status = classify(not_after, now, self.warn_days, self.force_days);
        let days_left = not_after.map(|n| days_left(n, now));

        debug!(
            path = %cert_path.display(),
            status = %status,
            days_left = ?days_left,
            "Evaluated certificate"
        );

        Evaluation {
            status,
            not_after,
            days_left,
        }
    }
}
