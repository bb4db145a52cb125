//! Configuration loading and setting resolution
//!
//! Every setting resolves through the same priority order:
//! 1. Environment variable (first non-empty alias wins)
//! 2. TOML config file (dotted key path, e.g. `store.url`)
//! 3. Compiled default supplied by the caller
//!
//! The config file itself is located via:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. `~/.config/dqa/<file>` then `/etc/dqa/<file>`
//!
//! A missing or malformed config file is never fatal: it logs a warning
//! and resolution continues with environment variables and defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Logging section of the TOML config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Locate the TOML config file for a module
///
/// Returns `None` when no candidate exists; callers then run on
/// environment variables and compiled defaults alone.
pub fn resolve_config_path(
    cli_arg: Option<&str>,
    env_var_name: &str,
    file_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config locations
    let user_config = dirs::config_dir().map(|d| d.join("dqa").join(file_name));
    let system_config = PathBuf::from("/etc/dqa").join(file_name);

    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }
    if system_config.exists() {
        return Some(system_config);
    }
    None
}

/// Read and parse a TOML file into a table
pub fn load_toml_table(path: &Path) -> Result<toml::Table> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    toml::from_str::<toml::Table>(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Environment → TOML → default resolver
#[derive(Debug, Clone, Default)]
pub struct SettingsResolver {
    table: Option<toml::Table>,
}

impl SettingsResolver {
    /// Resolver backed by environment variables only
    pub fn env_only() -> Self {
        Self { table: None }
    }

    /// Resolver backed by an already-parsed TOML table
    pub fn with_table(table: toml::Table) -> Self {
        Self { table: Some(table) }
    }

    /// Load the TOML file at `path` if given, degrading to env-only on failure
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            info!("No config file found, using environment and defaults");
            return Self::env_only();
        };

        match load_toml_table(path) {
            Ok(table) => {
                info!("Loaded config file: {}", path.display());
                Self::with_table(table)
            }
            Err(e) => {
                warn!("{}, using environment and defaults", e);
                Self::env_only()
            }
        }
    }

    /// Look up a dotted key path in the TOML table
    fn toml_value(&self, dotted: &str) -> Option<&toml::Value> {
        let table = self.table.as_ref()?;
        let mut parts = dotted.split('.');
        let mut current = table.get(parts.next()?)?;
        for part in parts {
            current = current.as_table()?.get(part)?;
        }
        Some(current)
    }

    /// Resolve a string setting
    pub fn string(&self, env_keys: &[&str], toml_key: &str) -> Option<String> {
        for key in env_keys {
            if let Ok(value) = std::env::var(key) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }

        match self.toml_value(toml_key)? {
            toml::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            toml::Value::String(_) => None,
            toml::Value::Integer(i) => Some(i.to_string()),
            toml::Value::Float(f) => Some(f.to_string()),
            toml::Value::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Resolve a string setting with a compiled default
    pub fn string_or(&self, env_keys: &[&str], toml_key: &str, default: &str) -> String {
        self.string(env_keys, toml_key)
            .unwrap_or_else(|| default.to_string())
    }

    /// Resolve and parse a setting, falling back to `default` when it is
    /// missing or does not parse
    pub fn parsed_or<T>(&self, env_keys: &[&str], toml_key: &str, default: T) -> T
    where
        T: FromStr + std::fmt::Display,
    {
        match self.string(env_keys, toml_key) {
            Some(raw) => match raw.parse::<T>() {
                Ok(value) => value,
                Err(_) => {
                    warn!("{}: invalid value {:?}, using default ({})", toml_key, raw, default);
                    default
                }
            },
            None => default,
        }
    }

    /// Logging section, defaulted when absent
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.string_or(&["DQA_LOG_LEVEL"], "logging.level", "info"),
        }
    }
}
