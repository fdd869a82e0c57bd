//! Configuration types for the ZeroToHire client.
//!
//! Settings are read from `zth.json` in the working directory. Every field is
//! optional; missing fields take the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ZthError};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "zth.json";

/// Template shown when a problem does not provide its own.
pub const DEFAULT_TEMPLATE: &str = "# Write your solution here\ndef solution():\n    pass";

fn default_api_base_url() -> String {
    "http://127.0.0.1:5000/api".to_string()
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:5000/ws".to_string()
}

fn default_data_dir() -> String {
    ".zth".to_string()
}

fn default_cache_prefix() -> String {
    zth_store::DEFAULT_PREFIX.to_string()
}

/// Delay before reconnecting a dropped connection.
const fn default_reconnect_delay_ms() -> u64 {
    2000
}

/// Interval between background saves of the code buffer.
const fn default_autosave_interval_secs() -> u64 {
    30
}

/// Tutor replies can be slow, so requests get a generous timeout.
const fn default_request_timeout_secs() -> u64 {
    30
}

fn default_language() -> String {
    "python".to_string()
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

const fn default_true() -> bool {
    true
}

/// Main configuration for the tutor client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL of the backend's HTTP API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// URL of the streaming connection endpoint.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Directory holding the code cache and credentials.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Prefix for code cache keys.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Milliseconds to wait before reconnecting.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Seconds between background saves of the code buffer.
    #[serde(default = "default_autosave_interval_secs")]
    pub autosave_interval_secs: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Language tag sent with saved and evaluated code.
    #[serde(default = "default_language")]
    pub language: String,

    /// Code used when a problem provides no template.
    #[serde(default = "default_template")]
    pub default_template: String,

    /// Whether to use the streaming connection at all.
    #[serde(default = "default_true")]
    pub streaming: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            ws_url: default_ws_url(),
            data_dir: default_data_dir(),
            cache_prefix: default_cache_prefix(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            autosave_interval_secs: default_autosave_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            language: default_language(),
            default_template: default_template(),
            streaming: default_true(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Returns the defaults when no `zth.json` exists there.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            ZthError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `zth.json` in a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `ZthError::ConfigParseError` if the file cannot be read or
    /// parsed, and `ZthError::ConfigValidationError` if a value is invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(ZthError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ZthError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ZthError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            return Err(ZthError::config_validation(
                format!("apiBaseUrl '{}' is not an http(s) URL", self.api_base_url),
                "Set apiBaseUrl to something like http://127.0.0.1:5000/api in your zth.json",
            ));
        }

        if self.streaming && !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://"))
        {
            return Err(ZthError::config_validation(
                format!("wsUrl '{}' is not a ws(s) URL", self.ws_url),
                "Set wsUrl to something like ws://127.0.0.1:5000/ws, or set streaming to false",
            ));
        }

        if self.reconnect_delay_ms == 0 {
            return Err(ZthError::config_validation(
                "reconnectDelayMs must be greater than 0",
                "Set reconnectDelayMs to at least 1 in your zth.json",
            ));
        }

        if self.autosave_interval_secs == 0 {
            return Err(ZthError::config_validation(
                "autosaveIntervalSecs must be greater than 0",
                "Set autosaveIntervalSecs to at least 1 in your zth.json",
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(ZthError::config_validation(
                "requestTimeoutSecs must be greater than 0",
                "Set requestTimeoutSecs to at least 1 in your zth.json",
            ));
        }

        if self.data_dir.trim().is_empty() {
            return Err(ZthError::config_validation(
                "dataDir must not be empty",
                "Provide a directory for local data in your zth.json (default: .zth)",
            ));
        }

        if self.cache_prefix.trim().is_empty() {
            return Err(ZthError::config_validation(
                "cachePrefix must not be empty",
                "Provide a cache key prefix in your zth.json (default: code)",
            ));
        }

        if self.cache_prefix == zth_store::FLAG_PREFIX {
            return Err(ZthError::config_validation(
                format!("cachePrefix '{}' is reserved for preferences", self.cache_prefix),
                "Choose another cache key prefix in your zth.json (default: code)",
            ));
        }

        if self.language.trim().is_empty() {
            return Err(ZthError::config_validation(
                "language must not be empty",
                "Provide the language tag for saved code in your zth.json (default: python)",
            ));
        }

        Ok(())
    }

    /// Delay before a dropped connection is retried.
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Interval of the background code save.
    #[must_use]
    pub const fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs)
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Path of the code cache file.
    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("cache.json")
    }

    /// Path of the credentials file.
    #[must_use]
    pub fn credentials_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("credentials.json")
    }
}
