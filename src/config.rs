//! Application configuration.
//!
//! Precedence: CLI > environment > config files > defaults. Config files are searched
//! in order: `--config`, `$QUERYLAB_CONFIG`, `<config dir>/querylab.toml`,
//! `./querylab.toml`; earlier files win.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::errors::ConfigError;
use crate::query::DEFAULT_COLLECTION;

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_DATABASE: &str = "library_clean";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub default_collection: Option<String>,
    pub mongodb_uri: Option<String>,
    pub mongodb_username: Option<String>,
    pub mongodb_password: Option<String>,
    pub mongodb_location: Option<String>,
    /// Serve from the in-memory store instead of MongoDB.
    pub memory: Option<bool>,
    /// JSON seed file for the in-memory store.
    pub seed: Option<PathBuf>,
    pub log_config: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Where the gateway's store comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    Mongo { uri: String, database: String },
    Memory { seed: Option<PathBuf> },
    /// No store will be connected; the reason is logged at startup.
    Disabled { reason: String },
}

impl AppConfig {
    /// Fills every unset field from `other`.
    pub fn merge_missing(&mut self, other: Self) {
        macro_rules! fill {
            ($($field:ident),*) => {
                $( if self.$field.is_none() { self.$field = other.$field; } )*
            };
        }
        fill!(
            bind, port, database, default_collection, mongodb_uri, mongodb_username,
            mongodb_password, mongodb_location, memory, seed, log_config, log_dir, log_level
        );
    }

    /// Reads unset fields from environment variables through `env`.
    pub fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) {
        let from_env = Self {
            bind: env("QUERYLAB_BIND"),
            port: env("QUERYLAB_PORT").and_then(|s| s.trim().parse().ok()),
            database: env("QUERYLAB_DATABASE"),
            default_collection: env("QUERYLAB_DEFAULT_COLLECTION"),
            mongodb_uri: env("MONGODB_URI"),
            mongodb_username: env("MONGODB_USERNAME"),
            mongodb_password: env("MONGODB_PASSWORD"),
            mongodb_location: env("MONGODB_LOCATION"),
            memory: env("QUERYLAB_MEMORY").map(|s| matches!(s.trim(), "1" | "true" | "yes")),
            seed: env("QUERYLAB_SEED").map(PathBuf::from),
            log_config: env("QUERYLAB_LOG_CONFIG").map(PathBuf::from),
            log_dir: env("QUERYLAB_LOG_DIR").map(PathBuf::from),
            log_level: env("QUERYLAB_LOG_LEVEL"),
        };
        self.merge_missing(from_env);
    }

    #[must_use]
    pub fn bind(&self) -> &str {
        self.bind.as_deref().unwrap_or(DEFAULT_BIND)
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    #[must_use]
    pub fn database(&self) -> &str {
        self.database.as_deref().unwrap_or(DEFAULT_DATABASE)
    }

    #[must_use]
    pub fn default_collection(&self) -> &str {
        self.default_collection.as_deref().unwrap_or(DEFAULT_COLLECTION)
    }

    /// Connection string built from the credentials, unless `mongodb_uri` overrides it.
    #[must_use]
    pub fn connection_uri(&self) -> Option<String> {
        if let Some(uri) = self.mongodb_uri.as_deref().filter(|u| !u.is_empty()) {
            return Some(uri.to_string());
        }
        let user = self.mongodb_username.as_deref().filter(|s| !s.is_empty())?;
        let pass = self.mongodb_password.as_deref().filter(|s| !s.is_empty())?;
        let location = self.mongodb_location.as_deref().unwrap_or_default();
        Some(format!("mongodb+srv://{user}:{pass}@{location}"))
    }

    #[must_use]
    pub fn store_target(&self) -> StoreTarget {
        if self.memory.unwrap_or(false) || self.seed.is_some() {
            return StoreTarget::Memory { seed: self.seed.clone() };
        }
        match self.connection_uri() {
            Some(uri) => StoreTarget::Mongo { uri, database: self.database().to_string() },
            None => StoreTarget::Disabled {
                reason: "MONGODB_USERNAME, MONGODB_PASSWORD, and MONGODB_LOCATION must be set"
                    .to_string(),
            },
        }
    }
}

/// Candidate config files, highest precedence first.
pub fn find_config_paths(
    cli_cfg: Option<&Path>,
    env: &impl Fn(&str) -> Option<String>,
) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = vec![];
    if let Some(p) = cli_cfg {
        paths.push(p.to_path_buf());
    }
    if let Some(p) = env("QUERYLAB_CONFIG") {
        paths.push(PathBuf::from(p));
    }
    if let Some(dir) = dirs_next::config_dir() {
        paths.push(dir.join("querylab.toml"));
    }
    if let Ok(cur) = std::env::current_dir() {
        paths.push(cur.join("querylab.toml"));
    }
    paths
}

/// Configuration together with the warnings raised while loading it.
///
/// Loading happens before logging is configured, so the caller reports `warnings`
/// once its logger is up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub warnings: Vec<String>,
}

/// Parses one config file, collecting a warning for each secret stored in it.
///
/// # Errors
/// Returns an error if the file cannot be read or is not valid TOML.
pub fn read_config_file(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let value = toml::Value::Table(toml::from_str::<toml::Table>(&text)?);
    let warnings = scan_toml_for_secret_keys(&value)
        .into_iter()
        .map(|key| {
            format!(
                "config file {} stores secret-looking key '{key}'; prefer environment variables",
                path.display()
            )
        })
        .collect();
    Ok(LoadedConfig { config: value.try_into()?, warnings })
}

/// Loads configuration from the process environment and config files.
#[must_use]
pub fn load_config(cli_cfg: Option<&Path>) -> LoadedConfig {
    load_config_with(cli_cfg, &|k| std::env::var(k).ok())
}

/// Loads configuration with an injectable environment lookup.
#[must_use]
pub fn load_config_with(
    cli_cfg: Option<&Path>,
    env: &impl Fn(&str) -> Option<String>,
) -> LoadedConfig {
    let mut loaded = LoadedConfig::default();
    loaded.config.apply_env(env);
    for p in find_config_paths(cli_cfg, env) {
        if !p.exists() {
            continue;
        }
        match read_config_file(&p) {
            Ok(file) => {
                loaded.config.merge_missing(file.config);
                loaded.warnings.extend(file.warnings);
            }
            Err(e) => loaded.warnings.push(format!("ignoring config file {}: {e}", p.display())),
        }
    }
    loaded
}

fn is_secret_key(key: &str) -> bool {
    let k = key.to_ascii_lowercase();
    k.contains("password")
        || k.contains("passwd")
        || k.contains("secret")
        || k.contains("token")
        || k.contains("apikey")
        || k.contains("api_key")
}

fn scan_toml_for_secret_keys(val: &toml::Value) -> Vec<String> {
    let mut secrets = Vec::new();
    let mut q = VecDeque::new();
    q.push_back((String::new(), val));
    while let Some((prefix, v)) = q.pop_front() {
        match v {
            toml::Value::Table(map) => {
                for (k, vv) in map {
                    let full = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
                    if is_secret_key(k) {
                        secrets.push(full.clone());
                    }
                    q.push_back((full, vv));
                }
            }
            toml::Value::Array(arr) => {
                for (i, vv) in arr.iter().enumerate() {
                    q.push_back((format!("{prefix}[{i}]"), vv));
                }
            }
            _ => {}
        }
    }
    secrets
}
