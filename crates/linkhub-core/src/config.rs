//! Configuration types for linkhub.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Server configuration loaded from YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Server settings
    pub server: ServerSettings,
    /// Storage locations
    pub storage: StorageSettings,
    /// Session lifecycle timing
    pub lifecycle: LifecycleSettings,
    /// Outbound messaging settings
    pub messaging: MessagingSettings,
    /// Protocol engine bridge
    pub engine: EngineSettings,
}

impl ServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ServerConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Recognized variables: `MAX_SESSIONS`, `SESSION_DIR`, `DATA_DIR`,
    /// `COUNTRY_CODE_PHONE`, `ENGINE_COMMAND`. The result is validated again.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(max) = lookup("MAX_SESSIONS") {
            self.server.max_sessions = max
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("MAX_SESSIONS is not a number: {max:?}")))?;
        }
        if let Some(dir) = lookup("SESSION_DIR") {
            self.storage.sessions_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(code) = lookup("COUNTRY_CODE_PHONE") {
            self.messaging.country_code = code.trim().to_string();
        }
        if let Some(command) = lookup("ENGINE_COMMAND") {
            self.engine.command = command;
        }
        self.validate()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_sessions == 0 {
            return Err(Error::Config("server.max_sessions must be > 0".to_string()));
        }

        if self.lifecycle.reconnect_delay_ms == 0 {
            return Err(Error::Config(
                "lifecycle.reconnect_delay_ms must be > 0".to_string(),
            ));
        }

        let code = &self.messaging.country_code;
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::Config(format!(
                "messaging.country_code must be digits, got {code:?}"
            )));
        }

        if self.engine.command.trim().is_empty() {
            return Err(Error::Config(
                "engine.command must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Maximum number of sessions that may exist at once
    pub max_sessions: usize,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            log_level: "info".to_string(),
        }
    }
}

/// Storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Root of the per-session auth directories
    pub sessions_dir: PathBuf,
    /// Directory holding `sessions.json`
    pub data_dir: PathBuf,
}

impl StorageSettings {
    /// Path of the metadata file.
    pub fn metadata_file(&self) -> PathBuf {
        self.data_dir.join("sessions.json")
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from("sessions"),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Session lifecycle timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Fixed delay before reconnecting after a recoverable close
    pub reconnect_delay_ms: u64,
    /// Delay between engine creation and the pairing-code request
    pub pairing_code_delay_ms: u64,
    /// Consecutive reconnects allowed without an open in between (None = unlimited)
    pub max_reconnect_attempts: Option<u32>,
}

impl LifecycleSettings {
    /// Reconnect delay as a duration.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Pairing-code delay as a duration.
    pub fn pairing_code_delay(&self) -> Duration {
        Duration::from_millis(self.pairing_code_delay_ms)
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 3000,
            pairing_code_delay_ms: 3000,
            max_reconnect_attempts: None,
        }
    }
}

/// Outbound messaging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingSettings {
    /// Calling code substituted for a leading trunk `0`
    pub country_code: String,
    /// Pause between messages of a bulk send
    pub bulk_delay_ms: u64,
}

impl MessagingSettings {
    /// Bulk delay as a duration.
    pub fn bulk_delay(&self) -> Duration {
        Duration::from_millis(self.bulk_delay_ms)
    }
}

impl Default for MessagingSettings {
    fn default() -> Self {
        Self {
            country_code: "62".to_string(),
            bulk_delay_ms: 500,
        }
    }
}

/// Protocol engine bridge process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Bridge executable, spawned once per session
    pub command: String,
    /// Bridge arguments
    pub args: Vec<String>,
    /// Extra environment for the bridge
    pub env: BTreeMap<String, String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            command: "node".to_string(),
            args: vec!["bridge.js".to_string()],
            env: BTreeMap::new(),
        }
    }
}
