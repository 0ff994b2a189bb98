//! Configuration file handling.
//!
//! This module provides loading and saving of envscan configuration
//! from a TOML file.
//!
//! # Configuration Location
//!
//! The configuration file is stored at:
//! - Linux: `~/.config/envscan/config.toml`
//! - macOS: `~/Library/Application Support/envscan/config.toml`
//! - Windows: `%APPDATA%\envscan\config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! resolve_timeout_ms = 5000
//! cache = true
//! watch = true
//! watch_debounce_ms = 500
//! pyenv_root = "/home/me/.pyenv"
//! venv_roots = ["/home/me/projects"]
//! default_kinds = ["pyenv", "venv"]
//! default_format = "table"
//!
//! [ignore]
//! executables = ["/usr/bin/python2*"]
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::PythonEnvKind;
use crate::pattern::glob_match;

/// Application configuration.
///
/// Loaded from a TOML file or created with default values.
///
/// # Example
///
/// ```no_run
/// use envscan::Config;
///
/// // Load from file (or use defaults if file doesn't exist)
/// let config = Config::load().unwrap();
///
/// println!("Resolve timeout: {} ms", config.resolve_timeout_ms);
/// println!("Watching: {}", config.watch);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long one locator may take to resolve a path, in milliseconds.
    ///
    /// Default: 5000
    pub resolve_timeout_ms: u64,

    /// Whether to keep a snapshot of the last full listing.
    ///
    /// Default: true
    pub cache: bool,

    /// Whether locators attach filesystem watchers.
    ///
    /// Default: true
    pub watch: bool,

    /// How long a watched path must stay quiet before its change is
    /// reported, in milliseconds.
    ///
    /// Default: 500
    pub watch_debounce_ms: u64,

    /// pyenv root directory. Falls back to `PYENV_ROOT`, then `~/.pyenv`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pyenv_root: Option<PathBuf>,

    /// Project directories searched for virtual environments.
    pub venv_roots: Vec<PathBuf>,

    /// Kinds listed when no `--kind` flag is given. Empty means all.
    pub default_kinds: Vec<PythonEnvKind>,

    /// Default output format when no `--format` flag is provided.
    ///
    /// Valid values: "table", "json"
    /// Default: "table"
    pub default_format: String,

    /// Executables hidden from listings.
    #[serde(default)]
    pub ignore: IgnoreConfig,
}

/// Executables to leave out of listings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// Executable paths to hide.
    /// Supports glob patterns (e.g., "/usr/bin/python2*", "*/.tox/*").
    pub executables: Vec<String>,
}

impl IgnoreConfig {
    /// Check if an executable should be hidden.
    pub fn should_ignore_executable(&self, executable: &str) -> bool {
        self.executables.iter().any(|pattern| {
            if pattern.contains('*') {
                glob_match(pattern, executable)
            } else {
                pattern == executable
            }
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resolve_timeout_ms: 5000,
            cache: true,
            watch: true,
            watch_debounce_ms: 500,
            pyenv_root: None,
            venv_roots: Vec::new(),
            default_kinds: Vec::new(),
            default_format: "table".to_string(),
            ignore: IgnoreConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the config file.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Saves the configuration to the config file.
    ///
    /// Creates the parent directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Returns the path to the configuration file.
    ///
    /// # Example
    ///
    /// ```
    /// use envscan::Config;
    ///
    /// let path = Config::config_path();
    /// assert!(path.ends_with("envscan/config.toml"));
    /// ```
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("envscan")
            .join("config.toml")
    }

    /// Generates a string containing the default configuration.
    pub fn generate_default_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}
