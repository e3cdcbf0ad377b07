//! # IPTVCast Configuration Module
//!
//! This module provides configuration management for IPTVCast, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters and setters for configuration values
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use castconfig::get_config;
//!
//! let config = get_config();
//! let interval = config.get_probe_interval_ms()?;
//! config.set_proxy_http_port(9000)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Result, anyhow};
use castutils::guess_local_ip;
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{info, warn};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("castconfig.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> = Arc::new(match Config::load_config("") {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load IPTVCast configuration, using embedded defaults");
            Config::embedded()
        }
    });
}

const ENV_CONFIG_DIR: &str = "IPTVCAST_CONFIG";
const ENV_PREFIX: &str = "IPTVCAST_CONFIG__";
const CONFIG_DIR_NAME: &str = ".iptvcast";

// Default values for configuration
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

const DEFAULT_PROBE_INTERVAL_MS: u64 = 5000;
const DEFAULT_EXPIRY_FACTOR: u64 = 3;
const DEFAULT_MX: u64 = 2;
const DEFAULT_DESCRIPTION_TIMEOUT_MS: u64 = 3000;
const DEFAULT_SUBNET_SWEEP: bool = true;
const DEFAULT_SWEEP_PORT: u16 = 9197;
const DEFAULT_SWEEP_PATH: &str = "/dmr";
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;
const DEFAULT_SWEEP_CONCURRENCY: usize = 32;
const DEFAULT_SWEEP_TIMEOUT_MS: u64 = 1000;
const DEFAULT_SEARCH_TARGETS: &[&str] = &[
    "urn:schemas-upnp-org:device:MediaRenderer:1",
    "urn:schemas-upnp-org:service:AVTransport:1",
];

const DEFAULT_PROXY_BIND_ADDRESS: &str = "0.0.0.0";
const DEFAULT_PROXY_HTTP_PORT: u16 = 0;
const DEFAULT_UPSTREAM_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CHUNK_SIZE: usize = 65_536;
const DEFAULT_BANDWIDTH_LIMIT_KBPS: u64 = 0;
const DEFAULT_DRAIN_GRACE_MS: u64 = 2000;

const DEFAULT_CALL_TIMEOUT_MS: u64 = 5000;
const DEFAULT_QUERY_RETRIES: usize = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;
const DEFAULT_MAX_ACTION_ATTEMPTS: usize = 3;
const DEFAULT_STOP_BEFORE_SET_SOURCE: bool = true;

const DEFAULT_SUBSCRIPTION_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RENEWAL_MARGIN_SECS: u64 = 30;
const DEFAULT_RENEWAL_ATTEMPTS: usize = 3;

const DEFAULT_PLAYING_CONFIRMATION_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_SWITCH_DRAIN_TIMEOUT_MS: u64 = 5000;
const DEFAULT_INFERENCE_GRACE_MS: u64 = 3000;

const DEFAULT_SYNC_POLL_INTERVAL_MS: u64 = 1500;
const DEFAULT_SYNC_TOLERANCE_MS: u64 = 2000;
const DEFAULT_SYNC_SETTLE_POLLS: usize = 2;

/// Macro to generate getter/setter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<usize> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => Ok(n.as_u64().map(|v| v as usize).unwrap_or($default)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, size: usize) -> Result<()> {
            let n = Number::from(size);
            self.set_value($path, Value::Number(n))
        }
    };
}

/// Macro to generate getter/setter for u64 values with default
///
/// Accepte aussi les chaînes numériques (overrides d'environnement entre
/// guillemets).
macro_rules! impl_u64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<u64> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => Ok(n.as_u64().unwrap_or($default)),
                Ok(Value::String(s)) => Ok(s.trim().parse().unwrap_or($default)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: u64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<bool> {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => Ok(b),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Macro to generate getter/setter for string values with default
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<String> {
            match self.get_value($path) {
                Ok(Value::String(s)) => Ok(s),
                _ => Ok($default.to_string()),
            }
        }

        pub fn $setter(&self, value: String) -> Result<()> {
            self.set_value($path, Value::String(value))
        }
    };
}

/// Configuration manager for IPTVCast
///
/// This structure manages the application configuration, including:
/// - Loading configuration from YAML files
/// - Merging with default configuration
/// - Handling environment variable overrides
/// - Providing typed getters/setters for configuration values
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: Option<String>,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = match self.data.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        // 1. Try provided directory
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        // 3. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        // Default fallback
        CONFIG_DIR_NAME.to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!(
                "Le chemin spécifié n'est pas un répertoire: {}",
                path.display()
            ));
        }

        // Test write permission
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `IPTVCAST_CONFIG` environment variable
    /// 3. `.iptvcast` in the current directory
    /// 4. `.iptvcast` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for read/write permissions.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "Loaded config file");
            let external_value: Value = serde_yaml::from_slice(&data)?;
            // Un config.yaml vide se lit comme Null : on garde les défauts
            if !external_value.is_null() {
                merge_yaml(&mut default_value, &Self::lower_keys_value(external_value));
            }
        } else {
            info!(config_file = %path, "Config file not found, using default embedded config");
        }

        let mut config_value = Self::lower_keys_value(default_value);
        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path: Some(path),
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Configuration built from the embedded defaults only, never written to disk.
    pub fn embedded() -> Self {
        let value = serde_yaml::from_str(DEFAULT_CONFIG).unwrap_or(Value::Mapping(Mapping::new()));
        Config {
            config_dir: String::new(),
            path: None,
            data: Mutex::new(Self::lower_keys_value(value)),
        }
    }

    /// Répertoire de configuration effectivement utilisé
    pub fn dir(&self) -> &str {
        &self.config_dir
    }

    fn data(&self) -> Result<MutexGuard<'_, Value>> {
        self.data
            .lock()
            .map_err(|_| anyhow!("configuration lock poisoned"))
    }

    /// Saves the current configuration to the config.yaml file
    ///
    /// No-op for an [`embedded`](Self::embedded) configuration.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let yaml = serde_yaml::to_string(&*self.data()?)?;
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["proxy", "http_port"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.data()?;
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data()?;
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                match map.get(Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides(config: &mut Value) {
        Self::apply_overrides(config, env::vars());
    }

    fn apply_overrides(config: &mut Value, vars: impl Iterator<Item = (String, String)>) {
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                if let Err(err) = Self::set_value_internal(config, &key_path, yaml_value) {
                    warn!(variable = %key, error = %err, "Ignoring configuration override");
                }
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    let new_key = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    new_map.insert(new_key, Self::lower_keys_value(v));
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    // ---- host ------------------------------------------------------------

    impl_string_config!(
        get_log_min_level,
        set_log_min_level,
        &["host", "logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    // ---- discovery -------------------------------------------------------

    impl_u64_config!(
        get_probe_interval_ms,
        set_probe_interval_ms,
        &["discovery", "probe_interval_ms"],
        DEFAULT_PROBE_INTERVAL_MS
    );

    impl_u64_config!(
        get_expiry_factor,
        set_expiry_factor,
        &["discovery", "expiry_factor"],
        DEFAULT_EXPIRY_FACTOR
    );

    impl_u64_config!(get_discovery_mx, set_discovery_mx, &["discovery", "mx"], DEFAULT_MX);

    impl_u64_config!(
        get_description_timeout_ms,
        set_description_timeout_ms,
        &["discovery", "description_timeout_ms"],
        DEFAULT_DESCRIPTION_TIMEOUT_MS
    );

    /// Search targets (ST) envoyés dans les M-SEARCH
    pub fn get_search_targets(&self) -> Result<Vec<String>> {
        let defaults = || DEFAULT_SEARCH_TARGETS.iter().map(|s| s.to_string()).collect();
        match self.get_value(&["discovery", "search_targets"]) {
            Ok(Value::Sequence(seq)) => {
                let targets: Vec<String> = seq
                    .into_iter()
                    .filter_map(|v| match v {
                        Value::String(s) if !s.trim().is_empty() => Some(s),
                        _ => None,
                    })
                    .collect();
                if targets.is_empty() {
                    Ok(defaults())
                } else {
                    Ok(targets)
                }
            }
            Ok(Value::String(s)) if !s.trim().is_empty() => {
                Ok(s.split(',').map(|t| t.trim().to_string()).collect())
            }
            _ => Ok(defaults()),
        }
    }

    pub fn set_search_targets(&self, targets: Vec<String>) -> Result<()> {
        let seq = targets.into_iter().map(Value::String).collect();
        self.set_value(&["discovery", "search_targets"], Value::Sequence(seq))
    }

    impl_bool_config!(
        get_subnet_sweep,
        set_subnet_sweep,
        &["discovery", "subnet_sweep"],
        DEFAULT_SUBNET_SWEEP
    );

    /// Port des descriptions interrogées par le balayage du sous-réseau
    pub fn get_sweep_port(&self) -> u16 {
        match self.get_value(&["discovery", "sweep_port"]) {
            Ok(Value::Number(n)) => n
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .filter(|p| *p != 0)
                .unwrap_or(DEFAULT_SWEEP_PORT),
            _ => DEFAULT_SWEEP_PORT,
        }
    }

    pub fn set_sweep_port(&self, port: u16) -> Result<()> {
        self.set_value(&["discovery", "sweep_port"], Value::Number(Number::from(port)))
    }

    impl_string_config!(
        get_sweep_path,
        set_sweep_path,
        &["discovery", "sweep_path"],
        DEFAULT_SWEEP_PATH
    );

    impl_u64_config!(
        get_sweep_interval_ms,
        set_sweep_interval_ms,
        &["discovery", "sweep_interval_ms"],
        DEFAULT_SWEEP_INTERVAL_MS
    );

    impl_usize_config!(
        get_sweep_concurrency,
        set_sweep_concurrency,
        &["discovery", "sweep_concurrency"],
        DEFAULT_SWEEP_CONCURRENCY
    );

    impl_u64_config!(
        get_sweep_timeout_ms,
        set_sweep_timeout_ms,
        &["discovery", "sweep_timeout_ms"],
        DEFAULT_SWEEP_TIMEOUT_MS
    );

    // ---- proxy -----------------------------------------------------------

    impl_string_config!(
        get_proxy_bind_address,
        set_proxy_bind_address,
        &["proxy", "bind_address"],
        DEFAULT_PROXY_BIND_ADDRESS
    );

    /// Gets the proxy HTTP port (0 = ephemeral)
    pub fn get_proxy_http_port(&self) -> u16 {
        match self.get_value(&["proxy", "http_port"]) {
            Ok(Value::Number(n)) => n
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or_else(|| {
                    warn!(
                        "Invalid proxy port '{}', using default {}",
                        n, DEFAULT_PROXY_HTTP_PORT
                    );
                    DEFAULT_PROXY_HTTP_PORT
                }),
            Ok(Value::String(s)) => match s.trim().parse::<u16>() {
                Ok(port) => port,
                Err(_) => {
                    warn!(
                        "Invalid proxy port '{}', using default {}",
                        s, DEFAULT_PROXY_HTTP_PORT
                    );
                    DEFAULT_PROXY_HTTP_PORT
                }
            },
            _ => DEFAULT_PROXY_HTTP_PORT,
        }
    }

    pub fn set_proxy_http_port(&self, port: u16) -> Result<()> {
        self.set_value(&["proxy", "http_port"], Value::Number(Number::from(port)))
    }

    /// Hôte annoncé aux renderers dans les URLs de route.
    ///
    /// Retourne l'hôte configuré, ou l'IP locale devinée s'il est vide.
    pub fn get_proxy_advertised_host(&self) -> String {
        match self.get_value(&["proxy", "advertised_host"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => guess_local_ip(),
        }
    }

    impl_string_config!(
        get_proxy_advertised_host_raw,
        set_proxy_advertised_host,
        &["proxy", "advertised_host"],
        ""
    );

    impl_u64_config!(
        get_upstream_connect_timeout_ms,
        set_upstream_connect_timeout_ms,
        &["proxy", "upstream_connect_timeout_ms"],
        DEFAULT_UPSTREAM_CONNECT_TIMEOUT_MS
    );

    impl_usize_config!(
        get_proxy_chunk_size,
        set_proxy_chunk_size,
        &["proxy", "chunk_size"],
        DEFAULT_CHUNK_SIZE
    );

    impl_u64_config!(
        get_bandwidth_limit_kbps,
        set_bandwidth_limit_kbps,
        &["proxy", "bandwidth_limit_kbps"],
        DEFAULT_BANDWIDTH_LIMIT_KBPS
    );

    impl_u64_config!(
        get_drain_grace_ms,
        set_drain_grace_ms,
        &["proxy", "drain_grace_ms"],
        DEFAULT_DRAIN_GRACE_MS
    );

    // ---- control ---------------------------------------------------------

    impl_u64_config!(
        get_call_timeout_ms,
        set_call_timeout_ms,
        &["control", "call_timeout_ms"],
        DEFAULT_CALL_TIMEOUT_MS
    );

    impl_usize_config!(
        get_query_retries,
        set_query_retries,
        &["control", "query_retries"],
        DEFAULT_QUERY_RETRIES
    );

    impl_u64_config!(
        get_retry_backoff_ms,
        set_retry_backoff_ms,
        &["control", "retry_backoff_ms"],
        DEFAULT_RETRY_BACKOFF_MS
    );

    impl_usize_config!(
        get_max_action_attempts,
        set_max_action_attempts,
        &["control", "max_action_attempts"],
        DEFAULT_MAX_ACTION_ATTEMPTS
    );

    impl_bool_config!(
        get_stop_before_set_source,
        set_stop_before_set_source,
        &["control", "stop_before_set_source"],
        DEFAULT_STOP_BEFORE_SET_SOURCE
    );

    // ---- events ----------------------------------------------------------

    impl_u64_config!(
        get_subscription_timeout_secs,
        set_subscription_timeout_secs,
        &["events", "subscription_timeout_secs"],
        DEFAULT_SUBSCRIPTION_TIMEOUT_SECS
    );

    impl_u64_config!(
        get_renewal_margin_secs,
        set_renewal_margin_secs,
        &["events", "renewal_margin_secs"],
        DEFAULT_RENEWAL_MARGIN_SECS
    );

    impl_usize_config!(
        get_renewal_attempts,
        set_renewal_attempts,
        &["events", "renewal_attempts"],
        DEFAULT_RENEWAL_ATTEMPTS
    );

    // ---- session ---------------------------------------------------------

    impl_u64_config!(
        get_playing_confirmation_timeout_ms,
        set_playing_confirmation_timeout_ms,
        &["session", "playing_confirmation_timeout_ms"],
        DEFAULT_PLAYING_CONFIRMATION_TIMEOUT_MS
    );

    impl_u64_config!(
        get_switch_drain_timeout_ms,
        set_switch_drain_timeout_ms,
        &["session", "switch_drain_timeout_ms"],
        DEFAULT_SWITCH_DRAIN_TIMEOUT_MS
    );

    impl_u64_config!(
        get_inference_grace_ms,
        set_inference_grace_ms,
        &["session", "inference_grace_ms"],
        DEFAULT_INFERENCE_GRACE_MS
    );

    // ---- sync ------------------------------------------------------------

    impl_u64_config!(
        get_sync_poll_interval_ms,
        set_sync_poll_interval_ms,
        &["sync", "poll_interval_ms"],
        DEFAULT_SYNC_POLL_INTERVAL_MS
    );

    impl_u64_config!(
        get_sync_tolerance_ms,
        set_sync_tolerance_ms,
        &["sync", "tolerance_ms"],
        DEFAULT_SYNC_TOLERANCE_MS
    );

    impl_usize_config!(
        get_sync_settle_polls,
        set_sync_settle_polls,
        &["sync", "settle_polls"],
        DEFAULT_SYNC_SETTLE_POLLS
    );
}

/// Returns the global configuration instance
///
/// This function provides access to the singleton configuration instance,
/// which is lazily loaded on first access.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merges external YAML configuration into default configuration
///
/// - For mappings, it merges keys from external into default
/// - For scalars and sequences, external values replace default values
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}
