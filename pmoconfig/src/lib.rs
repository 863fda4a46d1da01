//! # PMOSSDP Configuration Module
//!
//! Configuration management for the SSDP announcement engine:
//! - Embedded default configuration (`pmossdp.yaml`)
//! - Merge with an external `config.yaml`
//! - Environment variable overrides (`PMOSSDP_CONFIG__SSDP__MAX_AGE=900`)
//! - Typed getters with defaults, setters that persist to disk
//! - Shared singleton access via [`get_config`]
//!
//! Crates add their own keys through an extension trait over [`Config`]
//! (see `pmossdp::SsdpConfigExt`).
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! let config = get_config();
//! let max_age: u32 = config.get_or(&["ssdp", "max_age"], 1800);
//! config.set_value(&["ssdp", "max_age"], serde_yaml::Value::Number(max_age.into()))?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Context, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{info, warn};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmossdp.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load PMOSSDP configuration"));
}

const ENV_CONFIG_DIR: &str = "PMOSSDP_CONFIG";
const ENV_PREFIX: &str = "PMOSSDP_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmossdp";
const CONFIG_FILE_NAME: &str = "config.yaml";

const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Configuration manager
///
/// Holds the merged YAML tree behind a mutex; every setter writes the whole
/// tree back to `config.yaml`.
#[derive(Debug)]
pub struct Config {
    config_dir: PathBuf,
    path: PathBuf,
    data: Mutex<Value>,
}

impl Config {
    /// Loads the configuration from `directory`, or from the default
    /// location when `directory` is empty.
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PMOSSDP_CONFIG` environment variable
    /// 3. `.pmossdp` in the current directory
    /// 4. `.pmossdp` in the user's home directory
    ///
    /// The embedded defaults are merged with `config.yaml` (if present),
    /// `PMOSSDP_CONFIG__*` overrides are applied, then the result is saved.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = find_config_dir(directory);
        prepare_config_dir(&config_dir)?;
        info!(config_dir=%config_dir.display(), "Using config directory");

        let path = config_dir.join(CONFIG_FILE_NAME);
        let external = match fs::read_to_string(&path) {
            Ok(text) => {
                info!(config_file=%path.display(), "Loaded config file");
                Some(text)
            }
            Err(_) => {
                info!(config_file=%path.display(), "Config file not found, using embedded defaults");
                None
            }
        };

        let data = build_tree(external.as_deref(), env::vars())?;
        let config = Config {
            config_dir,
            path,
            data: Mutex::new(data),
        };
        config.save()?;
        Ok(config)
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Writes the current tree to `config.yaml`
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.lock())?;
        fs::write(&self.path, yaml)
            .with_context(|| format!("Cannot write {}", self.path.display()))?;
        Ok(())
    }

    /// Gets the raw value at `path` (e.g. `&["ssdp", "max_age"]`)
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        lookup(&self.lock(), path).cloned()
    }

    /// Gets the value at `path` converted to `T`, or `default` when the key
    /// is missing or has the wrong type.
    pub fn get_or<T: DeserializeOwned>(&self, path: &[&str], default: T) -> T {
        match self.get_value(path) {
            Ok(value) => match serde_yaml::from_value(value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(key=%path.join("."), "Invalid configuration value ({}), using default", e);
                    default
                }
            },
            Err(_) => default,
        }
    }

    /// Sets the value at `path`, creating intermediate maps, then saves
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        insert(&mut self.lock(), path, value)?;
        self.save()
    }

    /// Récupère le niveau de log minimum depuis la configuration
    pub fn get_log_min_level(&self) -> String {
        self.get_or(
            &["host", "logger", "min_level"],
            DEFAULT_LOG_MIN_LEVEL.to_string(),
        )
    }

    /// Définit le niveau de log minimum dans la configuration
    pub fn set_log_min_level(&self, level: &str) -> Result<()> {
        self.set_value(&["host", "logger", "min_level"], Value::String(level.to_string()))
    }

    pub fn get_log_enable_console(&self) -> bool {
        self.get_or(&["host", "logger", "enable_console"], DEFAULT_LOG_ENABLE_CONSOLE)
    }

    fn lock(&self) -> MutexGuard<'_, Value> {
        // Un panic pendant une écriture ne laisse pas l'arbre incohérent
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Returns the global configuration instance, loaded on first access
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

fn find_config_dir(directory: &str) -> PathBuf {
    if !directory.is_empty() {
        return PathBuf::from(directory);
    }

    if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
        info!(env_var = ENV_CONFIG_DIR, path=%env_path, "Trying to load config from env");
        return PathBuf::from(env_path);
    }

    let local = PathBuf::from(CONFIG_DIR_NAME);
    if local.exists() {
        return local;
    }

    if let Some(home) = home_dir() {
        let home_config = home.join(CONFIG_DIR_NAME);
        if home_config.exists() {
            return home_config;
        }
    }

    local
}

fn prepare_config_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Cannot create config directory {}", path.display()))?;
    }
    if !path.is_dir() {
        return Err(anyhow!("{} is not a directory", path.display()));
    }
    Ok(())
}

/// Builds the effective tree: defaults, then `external`, then env overrides
fn build_tree<I>(external: Option<&str>, vars: I) -> Result<Value>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut tree = lower_keys(serde_yaml::from_str(DEFAULT_CONFIG)?);

    if let Some(text) = external {
        let external: Value = serde_yaml::from_str(text).context("Invalid config.yaml")?;
        merge_yaml(&mut tree, lower_keys(external));
    }

    for (key, raw) in vars {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<String> = rest.split("__").map(str::to_lowercase).collect();
        let path: Vec<&str> = path.iter().map(String::as_str).collect();
        let value = serde_yaml::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
        if let Err(e) = insert(&mut tree, &path, value) {
            warn!(env_var=%key, "Ignoring environment override: {}", e);
        }
    }

    Ok(tree)
}

fn lookup<'a>(tree: &'a Value, path: &[&str]) -> Result<&'a Value> {
    let mut current = tree;
    for (i, key) in path.iter().enumerate() {
        current = current
            .as_mapping()
            .and_then(|map| map.get(key.to_lowercase().as_str()))
            .ok_or_else(|| anyhow!("Path {} does not exist", path[..=i].join(".")))?;
    }
    Ok(current)
}

fn insert(tree: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        *tree = value;
        return Ok(());
    };

    let mut current = tree;
    for key in parents {
        let map = current
            .as_mapping_mut()
            .ok_or_else(|| anyhow!("Cannot descend into non-map at '{}'", key))?;
        current = map
            .entry(Value::String(key.to_lowercase()))
            .or_insert(Value::Mapping(Mapping::new()));
    }

    let map = current
        .as_mapping_mut()
        .ok_or_else(|| anyhow!("Cannot set '{}' on a non-map node", last))?;
    map.insert(Value::String(last.to_lowercase()), value);
    Ok(())
}

fn lower_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| {
                    let k = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    (k, lower_keys(v))
                })
                .collect(),
        ),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys).collect()),
        other => other,
    }
}

/// Merges `external` into `default`: maps are merged key by key, scalars
/// and sequences are replaced.
fn merge_yaml(default: &mut Value, external: Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(&k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k, v);
                    }
                }
            }
        }
        (d, e) => *d = e,
    }
}
