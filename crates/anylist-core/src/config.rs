use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{AnylistError, Result};

/// Port the supervised server binary is told to listen on.
pub const DEFAULT_BINARY_PORT: u16 = 28597;

/// File name for the session state the server binary writes.
pub const CREDENTIALS_FILE_NAME: &str = ".anylist_credentials";

const DEFAULT_REFRESH_INTERVAL_MINUTES: u64 = 30;

fn default_port() -> u16 {
    DEFAULT_BINARY_PORT
}

fn default_refresh_interval_minutes() -> u64 {
    DEFAULT_REFRESH_INTERVAL_MINUTES
}

fn default_credentials_file() -> PathBuf {
    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("anylist").join(CREDENTIALS_FILE_NAME);
    }
    PathBuf::from(CREDENTIALS_FILE_NAME)
}

/// Immutable bridge configuration, constructed once at setup. Changing any
/// of it means tearing the runtime down and setting it up again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Explicit remote server URL (e.g. an add-on instance). Wins over the
    /// supervised binary when both could serve.
    #[serde(default)]
    pub server_address: Option<String>,
    /// Path to a local server binary to spawn and supervise.
    #[serde(default)]
    pub server_binary: Option<PathBuf>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Where the supervised binary persists its session state. The bridge
    /// only passes this path through; the child owns the file.
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
    #[serde(default = "default_port")]
    pub port: u16,
    /// List used when callers don't name one. Empty means the server picks.
    #[serde(default)]
    pub default_list: String,
    #[serde(default = "default_refresh_interval_minutes")]
    pub refresh_interval_minutes: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_address: None,
            server_binary: None,
            email: None,
            password: None,
            credentials_file: default_credentials_file(),
            port: default_port(),
            default_list: String::new(),
            refresh_interval_minutes: default_refresh_interval_minutes(),
        }
    }
}

impl BridgeConfig {
    /// Convenience constructor for the remote-only deployment.
    pub fn remote(server_address: impl Into<String>) -> Self {
        Self {
            server_address: Some(server_address.into()),
            ..Self::default()
        }
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref()).await?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Enforces the configuration invariants: at least one server source,
    /// and credentials whenever a local binary is configured.
    pub fn validate(&self) -> Result<()> {
        if self.server_address.is_none() && self.server_binary.is_none() {
            return Err(AnylistError::InvalidConfig(
                "either server_address or server_binary must be set".to_string(),
            ));
        }
        if self.server_binary.is_some() && (self.email.is_none() || self.password.is_none()) {
            return Err(AnylistError::InvalidConfig(
                "server_binary requires email and password".to_string(),
            ));
        }
        Ok(())
    }

    /// An explicitly passed list name wins; otherwise the configured
    /// default; otherwise empty, which lets the server decide.
    pub fn resolved_list_name(&self, explicit: Option<&str>) -> String {
        match explicit {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.default_list.clone(),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_minutes.max(1) * 60)
    }
}
