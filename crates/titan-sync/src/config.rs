//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TITAN_DEVICE_ID=abc-123                                            │
//! │     TITAN_HUB_URL=ws://hub.local:8765/sync                             │
//! │     TITAN_SYNC_BATCH_SIZE=25                                           │
//! │     TITAN_CONFLICT_STRATEGY=server_wins                                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/titan-pos/sync.toml (Linux)                              │
//! │     ~/Library/Application Support/com.titan.pos/sync.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     latest_wins, 50 items/batch, 3 attempts                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Register 1"
//!
//! [sync]
//! hub_url = "ws://192.168.1.100:8765/sync"
//! batch_size = 50
//! max_attempts = 3
//! conflict_strategy = "latest_wins"
//! drain_interval_secs = 30
//!
//! [retry]
//! max_attempts = 3
//! initial_delay_ms = 1000
//! max_delay_ms = 10000
//! backoff_multiplier = 2.0
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use titan_core::validation::validate_max_attempts;
use titan_core::{ConflictStrategy, DEFAULT_BATCH_SIZE, DEFAULT_MAX_ATTEMPTS};

use crate::engine::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::retry::{RetryConfig, DEFAULT_RETRYABLE_PATTERNS};
use crate::transport::TransportConfig;

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name (e.g., "Register 1", "Back Office").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "POS Terminal".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync engine behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// WebSocket URL of the sync hub. Without one the terminal stays
    /// offline and keeps queueing.
    #[serde(default)]
    pub hub_url: Option<String>,

    /// Items drained per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Attempt ceiling stamped on new queue items.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,

    /// Interval between scheduled drains (seconds).
    #[serde(default = "default_drain_interval")]
    pub drain_interval_secs: u64,

    /// How long a push waits for the hub's answer (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Initial backoff duration (milliseconds) for reconnection.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration (seconds) for reconnection.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_drain_interval() -> u64 {
    30
}
fn default_request_timeout() -> u64 {
    10
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    60
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            hub_url: None,
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            conflict_strategy: ConflictStrategy::default(),
            drain_interval_secs: default_drain_interval(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Per-push retry policy as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_patterns")]
    pub retryable_patterns: Vec<String>,
}

fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    10_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_patterns() -> Vec<String> {
    DEFAULT_RETRYABLE_PATTERNS
        .iter()
        .map(|p| (*p).to_string())
        .collect()
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_multiplier(),
            retryable_patterns: default_patterns(),
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        RetryConfig {
            max_attempts: settings.max_attempts,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
            retryable_patterns: settings.retryable_patterns.clone(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Device-specific configuration.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Sync behavior settings.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Retry policy for a single push.
    #[serde(default)]
    pub retry: RetrySettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        // Try to load from config file
        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        // Override with environment variables
        config.apply_overrides(|key| std::env::var(key).ok());

        // Validate the configuration
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        // Device ID must be valid
        if self.device.id.trim().is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        // If hub_url is set, validate it
        if let Some(ref raw) = self.sync.hub_url {
            let url = url::Url::parse(raw)?;
            if url.scheme() != "ws" && url.scheme() != "wss" {
                return Err(SyncError::InvalidUrl(format!(
                    "Hub URL must start with ws:// or wss://, got: {}",
                    raw
                )));
            }
        }

        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }
        if self.sync.drain_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "drain_interval_secs must be greater than 0".into(),
            ));
        }

        validate_max_attempts(self.sync.max_attempts)?;
        validate_max_attempts(self.retry.max_attempts)?;

        if self.retry.backoff_multiplier < 1.0 {
            return Err(SyncError::InvalidConfig(
                "backoff_multiplier must be at least 1.0".into(),
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(SyncError::InvalidConfig(
                "initial_delay_ms must not exceed max_delay_ms".into(),
            ));
        }

        Ok(())
    }

    /// Applies overrides from a variable lookup (the process environment
    /// in production).
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Device ID
        if let Some(id) = lookup("TITAN_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        // Device name
        if let Some(name) = lookup("TITAN_DEVICE_NAME") {
            self.device.name = name;
        }

        // Hub URL
        if let Some(url) = lookup("TITAN_HUB_URL") {
            debug!(url = %url, "Overriding hub URL from environment");
            self.sync.hub_url = Some(url);
        }

        // Batch size
        if let Some(size) = lookup("TITAN_SYNC_BATCH_SIZE") {
            match size.parse::<usize>() {
                Ok(n) => self.sync.batch_size = n,
                Err(_) => warn!(value = %size, "Ignoring invalid TITAN_SYNC_BATCH_SIZE"),
            }
        }

        // Conflict strategy
        if let Some(strategy) = lookup("TITAN_CONFLICT_STRATEGY") {
            match strategy.parse::<ConflictStrategy>() {
                Ok(parsed) => {
                    debug!(strategy = %parsed, "Overriding conflict strategy from environment");
                    self.sync.conflict_strategy = parsed;
                }
                Err(e) => warn!(error = %e, "Ignoring invalid TITAN_CONFLICT_STRATEGY"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "titan", "pos").map(|dirs| {
            let config_dir = dirs.config_dir();
            config_dir.join("sync.toml")
        })
    }

    // =========================================================================
    // Derived Configurations
    // =========================================================================

    /// Settings for the sync engine.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            device_id: self.device.id.clone(),
            batch_size: self.sync.batch_size,
            max_attempts: self.sync.max_attempts,
            conflict_strategy: self.sync.conflict_strategy,
            drain_interval: Duration::from_secs(self.sync.drain_interval_secs),
            retry: RetryConfig::from(&self.retry),
        }
    }

    /// Transport settings, if a hub is configured.
    pub fn transport_config(&self) -> Option<TransportConfig> {
        self.sync.hub_url.as_ref().map(|url| TransportConfig {
            url: url.clone(),
            device_id: self.device.id.clone(),
            device_name: self.device.name.clone(),
            connect_timeout: Duration::from_secs(self.sync.connect_timeout_secs),
            initial_backoff: Duration::from_millis(self.sync.initial_backoff_ms),
            max_backoff: Duration::from_secs(self.sync.max_backoff_secs),
            ..Default::default()
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.request_timeout_secs)
    }

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Returns the hub URL if configured.
    pub fn hub_url(&self) -> Option<&str> {
        self.sync.hub_url.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(!config.device.id.is_empty()); // Auto-generated
        assert_eq!(config.sync.batch_size, 50);
        assert_eq!(config.sync.max_attempts, 3);
        assert_eq!(config.sync.conflict_strategy, ConflictStrategy::LatestWins);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        // Empty device ID should fail
        config.device.id = String::new();
        assert!(matches!(config.validate(), Err(SyncError::MissingDeviceId)));

        // Invalid URL should fail
        config.device.id = "test".to_string();
        config.sync.hub_url = Some("http://invalid".to_string());
        assert!(config.validate().unwrap_err().is_config_error());

        // Valid WebSocket URL should pass
        config.sync.hub_url = Some("ws://localhost:8080/sync".to_string());
        assert!(config.validate().is_ok());

        config.sync.max_attempts = 0;
        assert!(matches!(config.validate(), Err(SyncError::InvalidItem(_))));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [device]
            id = "register-1"

            [sync]
            conflict_strategy = "manual"

            [retry]
            initial_delay_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.device.name, "POS Terminal");
        assert_eq!(config.sync.conflict_strategy, ConflictStrategy::Manual);
        assert_eq!(config.sync.drain_interval_secs, 30);

        let retry = RetryConfig::from(&config.retry);
        assert_eq!(retry.initial_delay, Duration::from_millis(250));
        assert_eq!(retry.max_delay, Duration::from_millis(10_000));
        assert!(retry.is_retryable_message("connection reset"));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TITAN_DEVICE_ID", "register-9"),
            ("TITAN_HUB_URL", "wss://hub.example/sync"),
            ("TITAN_SYNC_BATCH_SIZE", "not-a-number"),
            ("TITAN_CONFLICT_STRATEGY", "SERVER_WINS"),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.device_id(), "register-9");
        assert_eq!(config.hub_url(), Some("wss://hub.example/sync"));
        assert_eq!(config.sync.batch_size, 50);
        assert_eq!(config.sync.conflict_strategy, ConflictStrategy::ServerWins);

        let transport = config.transport_config().unwrap();
        assert_eq!(transport.device_id, "register-9");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");

        let mut config = SyncConfig::default();
        config.device.id = "register-2".into();
        config.sync.batch_size = 10;
        config.save(Some(path.clone())).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let reloaded: SyncConfig = toml::from_str(&text).unwrap();
        assert_eq!(reloaded.device.id, "register-2");
        assert_eq!(reloaded.sync.batch_size, 10);
    }
}
