//! Environment snapshot used for credential templating.
//!
//! Lookups go through an explicit [`Environment`] value instead of the
//! process environment, so resolution is a pure function of its inputs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, trace};

use crate::error::ConfigError;

/// Immutable `name -> value` snapshot.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

// Values may be secrets; only names are shown.
impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("vars", &self.vars.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Environment {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current process environment.
    ///
    /// Variables that are not valid UTF-8 are skipped.
    pub fn from_process() -> Self {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    /// Add or replace a variable.
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Fill in variables that are not already set.
    ///
    /// Existing values win, mirroring how a dotenv file never overrides
    /// variables exported by the caller.
    pub fn overlay<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            self.vars.entry(name).or_insert(value);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Read a `KEY=value` secrets file.
///
/// A missing file yields no variables; a malformed one is an error.
pub fn read_secrets_file(path: &Path) -> Result<Vec<(String, String)>, ConfigError> {
    if !path.exists() {
        trace!(path = %path.display(), "No secrets file found");
        return Ok(Vec::new());
    }

    let secrets_error = |e: dotenvy::Error| ConfigError::Secrets {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let vars = dotenvy::from_path_iter(path)
        .map_err(secrets_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(secrets_error)?;

    // Values are secrets; only the count is logged
    debug!(path = %path.display(), count = vars.len(), "Loaded secrets file");
    Ok(vars)
}
