//! Data directory layout
//!
//! ```text
//! data/
//! ├── conf/                      # config.toml, item_*.toml, .env
//! ├── run/
//! │   ├── credentials/<entry>.ini
//! │   ├── letsencrypt/live/<primary>/cert.pem ...
//! │   └── work/
//! ├── log/                       # issuer logs
//! └── output/<entry>/            # exported artifacts
//! ```

use std::path::{Path, PathBuf};

/// Resolved paths for one data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
    conf_dir: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>, conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            conf_dir: conf_dir.into(),
        }
    }

    /// Layout with the conventional `<root>/conf` config directory
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let conf_dir = root.join("conf");
        Self { root, conf_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn conf_dir(&self) -> &Path {
        &self.conf_dir
    }

    pub fn run_dir(&self) -> PathBuf {
        self.root.join("run")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    /// Issuer `--config-dir`
    pub fn issuer_state_dir(&self) -> PathBuf {
        self.run_dir().join("letsencrypt")
    }

    /// Issuer `--work-dir`
    pub fn issuer_work_dir(&self) -> PathBuf {
        self.run_dir().join("work")
    }

    pub fn credentials_dir(&self) -> PathBuf {
        self.run_dir().join("credentials")
    }

    /// Runtime credentials file for an entry
    pub fn credentials_file(&self, entry_name: &str) -> PathBuf {
        self.credentials_dir().join(format!("{entry_name}.ini"))
    }

    /// Live artifacts the issuer maintains for a certificate lineage
    pub fn live_dir(&self, primary_domain: &str) -> PathBuf {
        self.issuer_state_dir().join("live").join(primary_domain)
    }

    /// Export destination for an entry
    pub fn output_entry_dir(&self, entry_name: &str) -> PathBuf {
        self.output_dir().join(entry_name)
    }

    /// Resolve a path configured relative to the config directory.
    pub fn resolve_conf_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.conf_dir.join(path)
        }
    }
}
