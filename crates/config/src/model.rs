//! Typed configuration model.
//!
//! [`GlobalConfig`] carries run-wide settings and thresholds, [`Entry`]
//! describes one certificate. Neither type has behavior beyond validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use validator::Validate;

use crate::error::ConfigError;

/// Default pattern for entry files next to the global config
pub const DEFAULT_SCAN_ITEMS_GLOB: &str = "item_*.toml";

/// Default warning threshold in days
pub const DEFAULT_WARN_DAYS: u32 = 30;

/// Default forced-renewal threshold in days
pub const DEFAULT_FORCE_RENEW_DAYS: u32 = 7;

/// Default issuer binary looked up on `PATH`
pub const DEFAULT_ISSUER_BINARY: &str = "certbot";

/// Upper bound for concurrently processed entries
pub const MAX_CONCURRENCY: usize = 64;

// ============================================================================
// Global configuration
// ============================================================================

/// ACME directory the issuer talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcmeServer {
    /// Let's Encrypt staging (untrusted certificates, generous rate limits)
    #[default]
    Staging,
    /// Production directory
    #[serde(alias = "prod")]
    Production,
}

/// Run-wide settings read from the global config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Root data directory; falls back to the directory given on the command line
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Glob for entry files, relative to the config directory
    #[serde(default = "default_scan_items_glob")]
    #[validate(length(min = 1))]
    pub scan_items_glob: String,

    /// Certificates expiring within this many days are reported as warnings
    #[serde(default = "default_warn_days")]
    #[validate(range(min = 1))]
    pub warn_days: u32,

    /// Certificates expiring within this many days must be renewed
    #[serde(default = "default_force_renew_days")]
    pub force_renew_days: u32,

    /// Optional `KEY=value` secrets overlay (relative to the config directory)
    #[serde(default)]
    pub env_file_path: Option<PathBuf>,

    /// ACME account contact
    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub acme_server: AcmeServer,

    /// Issuer executable, either a bare name resolved via `PATH` or a path
    #[serde(default = "default_issuer_binary")]
    #[validate(length(min = 1))]
    pub issuer_binary: String,

    /// Kill the issuer after this many seconds
    #[serde(default)]
    #[validate(range(min = 1))]
    pub issuer_timeout_secs: Option<u64>,

    /// Number of entries processed at the same time
    #[serde(default = "default_concurrency")]
    #[validate(range(min = 1, max = MAX_CONCURRENCY))]
    pub concurrency: usize,
}

fn default_scan_items_glob() -> String {
    DEFAULT_SCAN_ITEMS_GLOB.to_string()
}

fn default_warn_days() -> u32 {
    DEFAULT_WARN_DAYS
}

fn default_force_renew_days() -> u32 {
    DEFAULT_FORCE_RENEW_DAYS
}

fn default_issuer_binary() -> String {
    DEFAULT_ISSUER_BINARY.to_string()
}

fn default_concurrency() -> usize {
    1
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            scan_items_glob: default_scan_items_glob(),
            warn_days: DEFAULT_WARN_DAYS,
            force_renew_days: DEFAULT_FORCE_RENEW_DAYS,
            env_file_path: None,
            email: None,
            acme_server: AcmeServer::default(),
            issuer_binary: default_issuer_binary(),
            issuer_timeout_secs: None,
            concurrency: default_concurrency(),
        }
    }
}

impl GlobalConfig {
    /// Validate field constraints and the threshold invariant.
    pub fn check(&self, source: &Path) -> Result<(), ConfigError> {
        self.validate().map_err(|e| ConfigError::Invalid {
            path: source.to_path_buf(),
            reason: e.to_string(),
        })?;
        self.check_thresholds()
    }

    /// `0 <= force_renew_days < warn_days` and `warn_days > 0`.
    pub fn check_thresholds(&self) -> Result<(), ConfigError> {
        if self.warn_days == 0 || self.force_renew_days >= self.warn_days {
            return Err(ConfigError::Thresholds {
                warn_days: self.warn_days,
                force_renew_days: self.force_renew_days,
            });
        }
        Ok(())
    }

    /// Apply command-line threshold overrides and re-check the invariant.
    pub fn with_thresholds(
        mut self,
        warn_days: Option<u32>,
        force_renew_days: Option<u32>,
    ) -> Result<Self, ConfigError> {
        if let Some(days) = warn_days {
            self.warn_days = days;
        }
        if let Some(days) = force_renew_days {
            self.force_renew_days = days;
        }
        self.check_thresholds()?;
        Ok(self)
    }
}

// ============================================================================
// Entries
// ============================================================================

/// Inline DNS-provider credentials.
///
/// Each value is either a literal or a `${ENV_VAR}` reference resolved at
/// evaluation time.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub access_key_secret: Option<String>,
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("access_key_id", &redact(self.access_key_id.as_deref()))
            .field("access_key_secret", &redact(self.access_key_secret.as_deref()))
            .finish()
    }
}

/// Env references are safe to show, literals are not
fn redact(value: Option<&str>) -> Option<&str> {
    value.map(|v| {
        let v = v.trim();
        if v.starts_with("${") && v.ends_with('}') {
            v
        } else {
            "<redacted>"
        }
    })
}

/// One certificate to manage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Entry {
    /// Unique name; used as export directory and credentials file basename
    #[validate(length(min = 1, max = 128))]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Hostnames covered by the certificate; the first one is the primary
    #[validate(length(min = 1))]
    pub domains: Vec<String>,

    /// Also request `*.<primary>`
    #[serde(default)]
    pub wildcard: bool,

    /// Account whose credentials live in `CERTMAN_ALIYUN_<account_id>_*`
    #[serde(default)]
    pub account_id: Option<String>,

    #[serde(default)]
    pub credentials: Option<CredentialsConfig>,
}

impl Entry {
    /// The domain naming the issuer's certificate lineage.
    pub fn primary_domain(&self) -> &str {
        self.domains.first().map(String::as_str).unwrap_or("")
    }

    /// Domains passed to the issuer, wildcard included, without duplicates.
    pub fn all_domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = Vec::with_capacity(self.domains.len() + 1);
        let wildcard = self
            .wildcard
            .then(|| format!("*.{}", self.primary_domain()));

        for domain in self.domains.iter().cloned().chain(wildcard) {
            if !domains.contains(&domain) {
                domains.push(domain);
            }
        }
        domains
    }

    /// Validate field constraints and the invariants serde cannot express.
    pub fn check(&self, source: &Path) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            path: source.to_path_buf(),
            reason,
        };

        self.validate().map_err(|e| invalid(e.to_string()))?;

        if !is_safe_component(&self.name) {
            return Err(invalid(format!(
                "entry name '{}' must be a plain file name (letters, digits, '.', '_', '-')",
                self.name
            )));
        }

        for domain in &self.domains {
            if !is_hostname(domain) {
                return Err(invalid(format!(
                    "entry '{}' has an invalid domain '{}'",
                    self.name, domain
                )));
            }
        }

        if let Some(account) = &self.account_id {
            let valid = !account.is_empty()
                && account
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                return Err(invalid(format!(
                    "entry '{}' has an invalid account_id '{}'",
                    self.name, account
                )));
            }
        }

        Ok(())
    }
}

fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn is_hostname(domain: &str) -> bool {
    let host = domain.strip_prefix("*.").unwrap_or(domain);
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, domains: &[&str]) -> Entry {
        Entry {
            name: name.to_string(),
            description: String::new(),
            domains: domains.iter().map(|d| d.to_string()).collect(),
            wildcard: false,
            account_id: None,
            credentials: None,
        }
    }

    #[test]
    fn test_default_thresholds_are_valid() {
        let config = GlobalConfig::default();
        assert_eq!(config.warn_days, 30);
        assert_eq!(config.force_renew_days, 7);
        assert!(config.check(Path::new("config.toml")).is_ok());
    }

    #[test]
    fn test_thresholds_must_be_ordered() {
        let config = GlobalConfig {
            warn_days: 7,
            force_renew_days: 7,
            ..Default::default()
        };
        assert!(matches!(
            config.check_thresholds(),
            Err(ConfigError::Thresholds { .. })
        ));

        let config = GlobalConfig {
            warn_days: 0,
            force_renew_days: 0,
            ..Default::default()
        };
        assert!(config.check(Path::new("config.toml")).is_err());
    }

    #[test]
    fn test_concurrency_bounds() {
        let source = Path::new("config.toml");
        let cases = [
            (0, false),
            (1, true),
            (MAX_CONCURRENCY, true),
            (MAX_CONCURRENCY + 1, false),
        ];
        for (concurrency, valid) in cases {
            let config = GlobalConfig {
                concurrency,
                ..Default::default()
            };
            assert_eq!(config.check(source).is_ok(), valid, "concurrency = {concurrency}");
        }
    }

    #[test]
    fn test_threshold_overrides_are_rechecked() {
        let config = GlobalConfig::default();
        let overridden = config.clone().with_thresholds(Some(14), Some(3)).unwrap();
        assert_eq!(overridden.warn_days, 14);
        assert_eq!(overridden.force_renew_days, 3);

        assert!(config.with_thresholds(Some(5), None).is_err());
    }

    #[test]
    fn test_all_domains_adds_wildcard_once() {
        let mut e = entry("site", &["example.com", "www.example.com", "*.example.com"]);
        assert_eq!(e.all_domains().len(), 3);

        e.domains.pop();
        e.wildcard = true;
        assert_eq!(
            e.all_domains(),
            vec!["example.com", "www.example.com", "*.example.com"]
        );
    }

    #[test]
    fn test_entry_check_rejects_unsafe_names_and_domains() {
        let path = Path::new("item_x.toml");
        assert!(entry("acme-co", &["example.com"]).check(path).is_ok());
        assert!(entry("../etc", &["example.com"]).check(path).is_err());
        assert!(entry("acme-co", &[]).check(path).is_err());
        assert!(entry("acme-co", &["bad domain.com"]).check(path).is_err());
        assert!(entry("acme-co", &["example..com"]).check(path).is_err());

        let mut e = entry("acme-co", &["example.com"]);
        e.account_id = Some("has space".to_string());
        assert!(e.check(path).is_err());
    }

    #[test]
    fn test_credentials_debug_hides_literals() {
        let creds = CredentialsConfig {
            access_key_id: Some("${ALIYUN_AK}".to_string()),
            access_key_secret: Some("super-secret".to_string()),
        };
        let shown = format!("{:?}", creds);
        assert!(shown.contains("${ALIYUN_AK}"));
        assert!(!shown.contains("super-secret"));
    }
}
