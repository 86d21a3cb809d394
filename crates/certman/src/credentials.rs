//! DNS-provider credential resolution
//!
//! Precedence, first match wins:
//!
//! 1. Inline `credentials.access_key_id` + `credentials.access_key_secret`,
//!    each a literal or a `${ENV_VAR}` reference.
//! 2. `account_id`, looked up as `CERTMAN_ALIYUN_<account_id>_ACCESS_KEY_ID`
//!    and `CERTMAN_ALIYUN_<account_id>_ACCESS_KEY_SECRET`.
//!
//! Anything else is a [`CredentialError`]. Resolution only reads the
//! [`Environment`] snapshot it is given.

use certman_config::{Entry, Environment};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Which precedence path produced the credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Inline,
    AccountEnv,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => f.write_str("inline"),
            Self::AccountEnv => f.write_str("account_env"),
        }
    }
}

/// Concrete key pair, ready to be written for the issuer.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedCredentials {
    access_key_id: String,
    access_key_secret: String,
    provenance: Provenance,
}

impl ResolvedCredentials {
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn access_key_secret(&self) -> &str {
        &self.access_key_secret
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }
}

impl fmt::Debug for ResolvedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCredentials")
            .field("access_key_id", &"<redacted>")
            .field("access_key_secret", &"<redacted>")
            .field("provenance", &self.provenance)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("entry '{entry}': {field} references ${{{var}}} which is not set")]
    UnsetReference {
        entry: String,
        field: &'static str,
        var: String,
    },

    #[error("entry '{entry}': {var} is not set for account '{account}'")]
    MissingAccountVar {
        entry: String,
        account: String,
        var: String,
    },

    #[error("entry '{entry}': inline credentials are missing {missing} and no account_id is set")]
    IncompleteInline { entry: String, missing: &'static str },

    #[error("entry '{entry}' has no credential source (set credentials or account_id)")]
    NoSource { entry: String },
}

/// A configured credential value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Template<'a> {
    Literal(&'a str),
    Reference(&'a str),
}

impl<'a> Template<'a> {
    /// Only a value that is exactly `${NAME}` is a reference.
    fn parse(value: &'a str) -> Self {
        let trimmed = value.trim();
        match trimmed
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
            .map(str::trim)
        {
            Some(name) if !name.is_empty() => Self::Reference(name),
            _ => Self::Literal(trimmed),
        }
    }
}

/// Expand a `${NAME}` reference against the snapshot.
///
/// Returns the name of the variable when it is unset or empty.
pub fn expand(value: &str, env: &Environment) -> Result<String, String> {
    match Template::parse(value) {
        Template::Literal(literal) => Ok(literal.to_string()),
        Template::Reference(name) => env
            .get(name)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| name.to_string()),
    }
}

/// Environment variable names for an account: `(key id, key secret)`
pub fn account_env_keys(account_id: &str) -> (String, String) {
    (
        format!("CERTMAN_ALIYUN_{account_id}_ACCESS_KEY_ID"),
        format!("CERTMAN_ALIYUN_{account_id}_ACCESS_KEY_SECRET"),
    )
}

/// The path an entry is configured to use, without consulting the environment.
pub fn configured_source(entry: &Entry) -> Option<Provenance> {
    let (id, secret) = inline_pair(entry);
    if id.is_some() && secret.is_some() {
        Some(Provenance::Inline)
    } else if entry.account_id.is_some() {
        Some(Provenance::AccountEnv)
    } else {
        None
    }
}

/// Resolve credentials for an entry.
pub fn resolve(entry: &Entry, env: &Environment) -> Result<ResolvedCredentials, CredentialError> {
    let unset = |field: &'static str| {
        move |var: String| CredentialError::UnsetReference {
            entry: entry.name.clone(),
            field,
            var,
        }
    };

    match (inline_pair(entry), entry.account_id.as_deref()) {
        ((Some(id), Some(secret)), _) => Ok(ResolvedCredentials {
            access_key_id: expand(id, env).map_err(unset("access_key_id"))?,
            access_key_secret: expand(secret, env).map_err(unset("access_key_secret"))?,
            provenance: Provenance::Inline,
        }),
        (_, Some(account)) => {
            let (id_key, secret_key) = account_env_keys(account);
            let lookup = |key: String| {
                env.get(&key)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| CredentialError::MissingAccountVar {
                        entry: entry.name.clone(),
                        account: account.to_string(),
                        var: key,
                    })
            };
            Ok(ResolvedCredentials {
                access_key_id: lookup(id_key)?,
                access_key_secret: lookup(secret_key)?,
                provenance: Provenance::AccountEnv,
            })
        }
        ((Some(_), None), None) => Err(CredentialError::IncompleteInline {
            entry: entry.name.clone(),
            missing: "access_key_secret",
        }),
        ((None, Some(_)), None) => Err(CredentialError::IncompleteInline {
            entry: entry.name.clone(),
            missing: "access_key_id",
        }),
        ((None, None), None) => Err(CredentialError::NoSource {
            entry: entry.name.clone(),
        }),
    }
}

/// Inline values that are present and non-blank
fn inline_pair(entry: &Entry) -> (Option<&str>, Option<&str>) {
    fn present(v: &Option<String>) -> Option<&str> {
        v.as_deref().filter(|s| !s.trim().is_empty())
    }

    match &entry.credentials {
        Some(creds) => (present(&creds.access_key_id), present(&creds.access_key_secret)),
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certman_config::CredentialsConfig;

    fn entry(credentials: Option<(&str, &str)>, account_id: Option<&str>) -> Entry {
        Entry {
            name: "acme-co".to_string(),
            description: String::new(),
            domains: vec!["acme.example".to_string()],
            wildcard: false,
            account_id: account_id.map(str::to_string),
            credentials: credentials.map(|(id, secret)| CredentialsConfig {
                access_key_id: Some(id.to_string()),
                access_key_secret: Some(secret.to_string()),
            }),
        }
    }

    fn account_env() -> Environment {
        Environment::new()
            .with_var("CERTMAN_ALIYUN_main_ACCESS_KEY_ID", "env-ak")
            .with_var("CERTMAN_ALIYUN_main_ACCESS_KEY_SECRET", "env-sk")
    }

    #[test]
    fn test_inline_literals() {
        let creds = resolve(&entry(Some(("ak", "sk")), None), &Environment::new()).unwrap();
        assert_eq!(creds.access_key_id(), "ak");
        assert_eq!(creds.access_key_secret(), "sk");
        assert_eq!(creds.provenance(), Provenance::Inline);
    }

    #[test]
    fn test_inline_dominates_account() {
        let creds = resolve(&entry(Some(("ak", "sk")), Some("main")), &account_env()).unwrap();
        assert_eq!(creds.provenance(), Provenance::Inline);
        assert_eq!(creds.access_key_id(), "ak");
    }

    #[test]
    fn test_env_reference_expansion() {
        let env = Environment::new()
            .with_var("ALIYUN_AK", "X")
            .with_var("ALIYUN_SK", "Y");
        let creds = resolve(&entry(Some(("${ALIYUN_AK}", "${ALIYUN_SK}")), None), &env).unwrap();
        assert_eq!(creds.access_key_id(), "X");
        assert_eq!(creds.access_key_secret(), "Y");
    }

    #[test]
    fn test_unset_reference_fails_even_with_account() {
        let err = resolve(
            &entry(Some(("${ALIYUN_AK}", "sk")), Some("main")),
            &account_env(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            CredentialError::UnsetReference {
                entry: "acme-co".to_string(),
                field: "access_key_id",
                var: "ALIYUN_AK".to_string(),
            }
        );
    }

    #[test]
    fn test_empty_reference_is_unset() {
        let env = Environment::new().with_var("ALIYUN_AK", "");
        assert_eq!(expand("${ALIYUN_AK}", &env), Err("ALIYUN_AK".to_string()));
    }

    #[test]
    fn test_non_reference_values_are_literal() {
        let env = Environment::new().with_var("A", "x");
        assert_eq!(expand("$A", &env).unwrap(), "$A");
        assert_eq!(expand("prefix-${A}", &env).unwrap(), "prefix-${A}");
        assert_eq!(expand("${}", &env).unwrap(), "${}");
        assert_eq!(expand(" ${A} ", &env).unwrap(), "x");
    }

    #[test]
    fn test_account_path() {
        let creds = resolve(&entry(None, Some("main")), &account_env()).unwrap();
        assert_eq!(creds.provenance(), Provenance::AccountEnv);
        assert_eq!(creds.access_key_id(), "env-ak");
        assert_eq!(creds.access_key_secret(), "env-sk");
    }

    #[test]
    fn test_account_requires_both_vars() {
        let env = Environment::new().with_var("CERTMAN_ALIYUN_main_ACCESS_KEY_ID", "env-ak");
        let err = resolve(&entry(None, Some("main")), &env).unwrap_err();
        assert!(matches!(
            err,
            CredentialError::MissingAccountVar { ref var, .. }
                if var == "CERTMAN_ALIYUN_main_ACCESS_KEY_SECRET"
        ));
    }

    #[test]
    fn test_no_source() {
        let err = resolve(&entry(None, None), &account_env()).unwrap_err();
        assert_eq!(
            err,
            CredentialError::NoSource {
                entry: "acme-co".to_string()
            }
        );
        assert!(err.to_string().contains("acme-co"));
    }

    #[test]
    fn test_partial_inline_falls_back_to_account() {
        let mut e = entry(Some(("ak", "")), Some("main"));
        let creds = resolve(&e, &account_env()).unwrap();
        assert_eq!(creds.provenance(), Provenance::AccountEnv);

        e.account_id = None;
        assert!(matches!(
            resolve(&e, &account_env()),
            Err(CredentialError::IncompleteInline {
                missing: "access_key_secret",
                ..
            })
        ));
    }

    #[test]
    fn test_blank_inline_pair_is_not_inline() {
        let e = entry(Some(("  ", "\t")), Some("main"));
        assert_eq!(inline_pair(&e), (None, None));
        let creds = resolve(&e, &account_env()).unwrap();
        assert_eq!(creds.provenance(), Provenance::AccountEnv);

        let e = entry(Some(("ak", "sk")), None);
        assert_eq!(inline_pair(&e), (Some("ak"), Some("sk")));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let e = entry(Some(("${ALIYUN_AK}", "sk")), None);
        let env = Environment::new().with_var("ALIYUN_AK", "X");
        assert_eq!(resolve(&e, &env), resolve(&e, &env));
    }

    #[test]
    fn test_debug_is_redacted() {
        let creds = resolve(&entry(Some(("ak-value", "sk-value")), None), &Environment::new())
            .unwrap();
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("ak-value"));
        assert!(!shown.contains("sk-value"));
    }
}
