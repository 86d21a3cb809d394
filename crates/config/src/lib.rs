//! Configuration for certman
//!
//! Loads the global settings file, merges per-entry files discovered by glob,
//! and builds the environment snapshot used for credential templating.
//!
//! # Example
//!
//! ```toml
//! # data/conf/config.toml
//! warn_days = 30
//! force_renew_days = 7
//! email = "ops@example.com"
//! acme_server = "production"
//!
//! # data/conf/item_acme-co.toml
//! domains = ["acme.example", "www.acme.example"]
//! account_id = "main"
//! ```

pub mod env;
pub mod error;
pub mod layout;
pub mod loader;
pub mod model;

pub use env::Environment;
pub use error::ConfigError;
pub use layout::DataLayout;
pub use loader::{
    load, resolve_config_path, ConfigLoader, LoadedConfig, RejectedEntry, DEFAULT_CONFIG_FILE,
};
pub use model::{AcmeServer, CredentialsConfig, Entry, GlobalConfig};
