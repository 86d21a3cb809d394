//! Global + per-entry configuration loader.
//!
//! The global file is loaded first; any problem with it is fatal. Entry
//! files matching `scan_items_glob` next to it are then parsed one by one.
//! A broken entry file only rejects that file, the rest of the batch loads.

use glob::glob;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::env::{read_secrets_file, Environment};
use crate::error::ConfigError;
use crate::layout::DataLayout;
use crate::model::{Entry, GlobalConfig};

/// Default global config file name under `<data_dir>/conf`
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Default secrets file name under `<data_dir>/conf`
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Filename prefix stripped when an entry name is derived from its file
const ITEM_PREFIX: &str = "item_";

/// An entry (or whole entry file) excluded from the batch.
#[derive(Debug)]
pub struct RejectedEntry {
    /// File the entry came from
    pub source: PathBuf,
    /// Entry name when it could be determined
    pub name: Option<String>,
    pub error: ConfigError,
}

/// Result of a successful load.
#[derive(Debug)]
pub struct LoadedConfig {
    pub global: GlobalConfig,
    pub layout: DataLayout,
    /// Valid entries in discovery order
    pub entries: Vec<Entry>,
    pub rejected: Vec<RejectedEntry>,
    /// Process environment with the secrets file overlaid
    pub environment: Environment,
}

impl LoadedConfig {
    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// Resolve the `--config-file` argument: relative paths live under
/// `<data_dir>/conf`.
pub fn resolve_config_path(data_dir: &Path, config_file: &Path) -> PathBuf {
    if config_file.is_absolute() {
        config_file.to_path_buf()
    } else {
        data_dir.join("conf").join(config_file)
    }
}

/// Load the global config and every entry file, using the process environment.
pub fn load(data_dir: &Path, global_config_path: &Path) -> Result<LoadedConfig, ConfigError> {
    ConfigLoader::new(data_dir, global_config_path).load()
}

/// Configuration loader
///
/// # Example
///
/// ```ignore
/// let loaded = ConfigLoader::new("data", "data/conf/config.toml")
///     .with_environment(Environment::new().with_var("ALIYUN_AK", "..."))
///     .load()?;
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    data_dir: PathBuf,
    global_path: PathBuf,
    /// Base environment; the process environment when unset
    environment: Option<Environment>,
}

impl ConfigLoader {
    pub fn new(data_dir: impl Into<PathBuf>, global_config_path: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            global_path: global_config_path.into(),
            environment: None,
        }
    }

    /// Use a fixed base environment instead of the process environment.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        info!(path = %self.global_path.display(), "Loading configuration");

        let mut document = read_document(&self.global_path)?;
        let inline_entries = document.remove("entries");

        let global: GlobalConfig =
            serde_json::from_value(Value::Object(document)).map_err(|e| ConfigError::Invalid {
                path: self.global_path.clone(),
                reason: e.to_string(),
            })?;
        global.check(&self.global_path)?;

        let conf_dir = self
            .global_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.data_dir.join("conf"));
        let root = global.data_dir.clone().unwrap_or_else(|| self.data_dir.clone());
        let layout = DataLayout::new(root, conf_dir);

        let env_file = layout.resolve_conf_path(
            global
                .env_file_path
                .as_deref()
                .unwrap_or_else(|| Path::new(DEFAULT_ENV_FILE)),
        );
        let base = self
            .environment
            .clone()
            .unwrap_or_else(Environment::from_process);
        let environment = base.overlay(read_secrets_file(&env_file)?);

        let mut batch = EntryBatch::default();

        if let Some(inline) = inline_entries {
            let Value::Array(items) = inline else {
                return Err(ConfigError::Invalid {
                    path: self.global_path.clone(),
                    reason: "'entries' must be an array of tables".to_string(),
                });
            };
            for item in items {
                batch.add(&self.global_path, parse_entry(&self.global_path, item, None));
            }
        }

        for path in self.discover_entry_files(&layout, &global.scan_items_glob)? {
            match read_document(&path) {
                Ok(document) => {
                    for parsed in parse_entry_document(&path, document) {
                        batch.add(&path, parsed);
                    }
                }
                Err(error) => batch.reject(&path, None, error),
            }
        }

        info!(
            entries = batch.entries.len(),
            rejected = batch.rejected.len(),
            data_dir = %layout.root().display(),
            "Configuration loaded"
        );

        Ok(LoadedConfig {
            global,
            layout,
            entries: batch.entries,
            rejected: batch.rejected,
            environment,
        })
    }

    /// Entry files in lexicographic order, minus the global file and templates.
    fn discover_entry_files(
        &self,
        layout: &DataLayout,
        pattern: &str,
    ) -> Result<Vec<PathBuf>, ConfigError> {
        let full_pattern = layout.conf_dir().join(pattern);
        let pattern_error = |reason: String| ConfigError::Pattern {
            pattern: pattern.to_string(),
            reason,
        };
        let pattern_str = full_pattern
            .to_str()
            .ok_or_else(|| pattern_error("path is not valid UTF-8".to_string()))?;

        let global_name = self.global_path.file_name();
        let mut files = Vec::new();

        for matched in glob(pattern_str).map_err(|e| pattern_error(e.to_string()))? {
            let path = match matched {
                Ok(path) => path,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry file");
                    continue;
                }
            };

            if !path.is_file() || path.file_name() == global_name || is_template(&path) {
                debug!(path = %path.display(), "Skipping non-entry file");
                continue;
            }
            files.push(path);
        }

        files.sort();
        debug!(count = files.len(), pattern = %pattern, "Discovered entry files");
        Ok(files)
    }
}

/// Accumulates entries, rejecting duplicates by name.
#[derive(Default)]
struct EntryBatch {
    entries: Vec<Entry>,
    rejected: Vec<RejectedEntry>,
    seen: HashMap<String, PathBuf>,
}

impl EntryBatch {
    fn add(&mut self, source: &Path, parsed: Result<Entry, (Option<String>, ConfigError)>) {
        match parsed {
            Ok(entry) => {
                if let Some(first) = self.seen.get(&entry.name) {
                    let error = ConfigError::DuplicateEntry {
                        name: entry.name.clone(),
                        first: first.clone(),
                    };
                    self.reject(source, Some(entry.name), error);
                    return;
                }
                debug!(entry = %entry.name, source = %source.display(), "Loaded entry");
                self.seen.insert(entry.name.clone(), source.to_path_buf());
                self.entries.push(entry);
            }
            Err((name, error)) => self.reject(source, name, error),
        }
    }

    fn reject(&mut self, source: &Path, name: Option<String>, error: ConfigError) {
        warn!(
            source = %source.display(),
            entry = name.as_deref().unwrap_or("-"),
            error = %error,
            "Rejected entry configuration"
        );
        self.rejected.push(RejectedEntry {
            source: source.to_path_buf(),
            name,
            error,
        });
    }
}

/// A file holds either an `entries` array or one entry at the top level.
fn parse_entry_document(
    path: &Path,
    mut document: Map<String, Value>,
) -> Vec<Result<Entry, (Option<String>, ConfigError)>> {
    match document.remove("entries") {
        Some(Value::Array(items)) if document.is_empty() => items
            .into_iter()
            .map(|item| parse_entry(path, item, None))
            .collect(),
        Some(_) => vec![Err((
            None,
            ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: "'entries' must be the only key and an array of tables".to_string(),
            },
        ))],
        None => vec![parse_entry(
            path,
            Value::Object(document),
            default_entry_name(path),
        )],
    }
}

fn parse_entry(
    path: &Path,
    mut value: Value,
    default_name: Option<String>,
) -> Result<Entry, (Option<String>, ConfigError)> {
    if let (Value::Object(map), Some(name)) = (&mut value, default_name) {
        map.entry("name").or_insert(Value::String(name));
    }

    let name = value
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string);

    let entry: Entry = serde_json::from_value(value).map_err(|e| {
        (
            name.clone(),
            ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
        )
    })?;
    entry.check(path).map_err(|e| (name, e))?;
    Ok(entry)
}

/// `item_<name>.toml` -> `<name>`
fn default_entry_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    Some(stem.strip_prefix(ITEM_PREFIX).unwrap_or(stem).to_string())
}

fn is_template(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.contains(".example."))
        .unwrap_or(false)
}

/// Read a TOML or YAML document whose root must be a table.
fn read_document(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    let text = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    let parse_error = |reason: String| ConfigError::Parse {
        path: path.to_path_buf(),
        reason,
    };

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let value: Value = match extension.as_deref() {
        Some("toml") => toml::from_str(&text).map_err(|e| parse_error(e.to_string()))?,
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&text).map_err(|e| parse_error(e.to_string()))?
        }
        _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    };

    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(parse_error("document root must be a table".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AcmeServer;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        data: PathBuf,
    }

    impl Fixture {
        fn new(global: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let data = dir.path().join("data");
            fs::create_dir_all(data.join("conf")).unwrap();
            fs::write(data.join("conf/config.toml"), global).unwrap();
            Self { _dir: dir, data }
        }

        fn write(&self, name: &str, content: &str) {
            fs::write(self.data.join("conf").join(name), content).unwrap();
        }

        fn load(&self) -> Result<LoadedConfig, ConfigError> {
            ConfigLoader::new(&self.data, self.data.join("conf/config.toml"))
                .with_environment(Environment::new().with_var("EXISTING", "process"))
                .load()
        }
    }

    #[test]
    fn test_missing_global_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let result = load(dir.path(), &dir.path().join("conf/config.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_defaults_applied() {
        let fixture = Fixture::new("");
        let loaded = fixture.load().unwrap();

        assert_eq!(loaded.global.warn_days, 30);
        assert_eq!(loaded.global.force_renew_days, 7);
        assert_eq!(loaded.global.scan_items_glob, "item_*.toml");
        assert_eq!(loaded.global.acme_server, AcmeServer::Staging);
        assert_eq!(loaded.layout.root(), fixture.data.as_path());
        assert!(loaded.entries.is_empty());
    }

    #[test]
    fn test_threshold_violation_is_fatal() {
        let fixture = Fixture::new("warn_days = 5\nforce_renew_days = 10\n");
        assert!(matches!(
            fixture.load(),
            Err(ConfigError::Thresholds { .. })
        ));
    }

    #[test]
    fn test_unknown_global_key_is_fatal() {
        let fixture = Fixture::new("warn_dayz = 5\n");
        assert!(matches!(fixture.load(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_entries_sorted_and_named_from_file() {
        let fixture = Fixture::new("");
        fixture.write("item_zeta.toml", "domains = [\"zeta.example\"]\n");
        fixture.write("item_alpha.toml", "domains = [\"alpha.example\"]\n");
        fixture.write(
            "item_multi.toml",
            "[[entries]]\nname = \"m1\"\ndomains = [\"m1.example\"]\n\n[[entries]]\nname = \"m2\"\ndomains = [\"m2.example\"]\n",
        );

        let loaded = fixture.load().unwrap();
        let names: Vec<_> = loaded.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "m1", "m2", "zeta"]);
        assert!(loaded.rejected.is_empty());
    }

    #[test]
    fn test_invalid_entry_file_is_isolated() {
        let fixture = Fixture::new("");
        fixture.write("item_good.toml", "domains = [\"good.example\"]\n");
        fixture.write("item_broken.toml", "domains = [\n");
        fixture.write("item_empty.toml", "domains = []\n");

        let loaded = fixture.load().unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].name, "good");
        assert_eq!(loaded.rejected.len(), 2);
        assert!(matches!(loaded.rejected[0].error, ConfigError::Parse { .. }));
        assert_eq!(loaded.rejected[1].name.as_deref(), Some("empty"));
    }

    #[test]
    fn test_templates_and_duplicates() {
        let fixture = Fixture::new(
            "[[entries]]\nname = \"dup\"\ndomains = [\"inline.example\"]\n",
        );
        fixture.write("item_dup.toml", "domains = [\"file.example\"]\n");
        fixture.write("item_sample.example.toml", "domains = [\"x.example\"]\n");

        let loaded = fixture.load().unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].domains, vec!["inline.example"]);
        assert!(matches!(
            loaded.rejected[0].error,
            ConfigError::DuplicateEntry { .. }
        ));
    }

    #[test]
    fn test_yaml_entries_with_custom_glob() {
        let fixture = Fixture::new("scan_items_glob = \"site-*.yaml\"\n");
        fixture.write(
            "site-blog.yaml",
            "name: blog\ndomains:\n  - blog.example\naccount_id: main\n",
        );

        let loaded = fixture.load().unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].account_id.as_deref(), Some("main"));
    }

    #[test]
    fn test_secrets_file_overlays_environment() {
        let fixture = Fixture::new("env_file_path = \"secrets.env\"\n");
        fixture.write("secrets.env", "EXISTING=file\nFROM_FILE=yes\n");

        let loaded = fixture.load().unwrap();
        assert_eq!(loaded.environment.get("EXISTING"), Some("process"));
        assert_eq!(loaded.environment.get("FROM_FILE"), Some("yes"));
    }

    #[test]
    fn test_resolve_config_path() {
        let data = Path::new("data");
        assert_eq!(
            resolve_config_path(data, Path::new("config.toml")),
            PathBuf::from("data/conf/config.toml")
        );
        assert_eq!(
            resolve_config_path(data, Path::new("sites/prod.toml")),
            PathBuf::from("data/conf/sites/prod.toml")
        );
        assert_eq!(
            resolve_config_path(data, Path::new("/etc/certman.toml")),
            PathBuf::from("/etc/certman.toml")
        );
    }
}
