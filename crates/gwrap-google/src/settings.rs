//! Workspace settings.
//!
//! All settings live in a single `config.toml` at `~/.config/gwrap/config.toml`
//! by default. Every field is optional:
//!
//! ```toml
//! client_secret_path = "/home/me/.config/gwrap/client_secret.json"
//! credential_store_path = "/home/me/.local/share/gwrap/credentials.json"
//! timeout_secs = 30
//! open_browser = false
//! loopback_port_range = [8080, 8090]
//! max_pages = 500
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use gwrap_core::{ApiError, ApiResult, PageCollector};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Settings shared by the credential manager and the service connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Cloud Console client secret file, required before any authorization flow.
    pub client_secret_path: PathBuf,

    /// Where authorized credentials are persisted.
    pub credential_store_path: PathBuf,

    /// Request timeout for every HTTP call, in seconds.
    pub timeout_secs: u64,

    /// Open the consent page in a browser; when false the URL is only printed.
    pub open_browser: bool,

    /// Ports tried, in order, for the OAuth loopback redirect.
    pub loopback_port_range: (u16, u16),

    /// Upper bound on pages fetched by one list operation. Unbounded if unset.
    pub max_pages: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            client_secret_path: Self::default_config_dir().join("client_secret.json"),
            credential_store_path: Self::default_data_dir().join("credentials.json"),
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
            open_browser: true,
            loopback_port_range: (8080, 8090),
            max_pages: None,
        }
    }
}

impl Settings {
    /// Default timeout in seconds.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Loads settings from the default path, falling back to defaults when
    /// the file does not exist.
    pub fn load() -> ApiResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            debug!("no settings file at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Loads settings from a specific path.
    pub fn load_from(path: &Path) -> ApiResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ApiError::configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        let settings: Self = toml::from_str(&content).map_err(|e| {
            ApiError::configuration(format!("failed to parse {}: {}", path.display(), e))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Returns the default settings file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gwrap")
    }

    /// Returns the default data directory.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gwrap")
    }

    /// Sets the client secret file.
    pub fn with_client_secret_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_secret_path = path.into();
        self
    }

    /// Sets the credential store file.
    pub fn with_credential_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credential_store_path = path.into();
        self
    }

    /// Sets the page cap for list operations.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Returns the request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns the page collector configured by these settings.
    pub fn page_collector(&self) -> PageCollector {
        match self.max_pages {
            Some(max) => PageCollector::new().with_max_pages(max),
            None => PageCollector::new(),
        }
    }

    /// Validates the settings.
    pub fn validate(&self) -> ApiResult<()> {
        if self.timeout_secs == 0 {
            return Err(ApiError::configuration("timeout_secs must be positive"));
        }
        if self.loopback_port_range.0 > self.loopback_port_range.1 {
            return Err(ApiError::configuration("invalid loopback port range"));
        }
        if self.max_pages == Some(0) {
            return Err(ApiError::configuration("max_pages must be at least 1"));
        }
        Ok(())
    }
}
