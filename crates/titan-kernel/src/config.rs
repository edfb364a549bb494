//! # Kernel Configuration
//!
//! Same three layers as the sync configuration: defaults, then
//! `kernel.toml`, then environment variables.
//!
//! ## Configuration File Format
//! ```toml
//! # kernel.toml
//! version = "1.0.0"
//! environment = "production"
//! safe_mode_enabled = true
//! auto_recovery_enabled = true
//! health_check_interval_ms = 30000
//! health_latency_threshold_ms = 5000
//! max_boot_time_ms = 60000
//! max_recovery_attempts = 3
//! max_incidents = 100
//! safe_mode_disabled = ["pricing", "tax", "compliance", "sync"]
//! ```
//!
//! ## Environment Overrides
//! - `TITAN_ENVIRONMENT` - development / staging / production
//! - `TITAN_SAFE_MODE` - true / false
//! - `TITAN_MAX_RECOVERY_ATTEMPTS` - integer

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::component::ComponentKind;
use crate::error::{KernelError, KernelResult};

/// Shortest allowed health check interval.
pub const MIN_HEALTH_CHECK_INTERVAL_MS: u64 = 5_000;

/// Shortest allowed boot deadline.
pub const MIN_BOOT_TIME_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(KernelError::InvalidConfig(format!(
                "unknown environment: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub environment: Environment,

    /// Tolerate failures of `safe_mode_disabled` components during boot and
    /// fall back to safe mode once recovery is exhausted.
    #[serde(default = "default_true")]
    pub safe_mode_enabled: bool,

    #[serde(default = "default_true")]
    pub auto_recovery_enabled: bool,

    #[serde(default = "default_health_interval")]
    pub health_check_interval_ms: u64,

    /// A component answering slower than this is marked degraded.
    #[serde(default = "default_latency_threshold")]
    pub health_latency_threshold_ms: u64,

    #[serde(default = "default_max_boot_time")]
    pub max_boot_time_ms: u64,

    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    /// Capacity of the incident log.
    #[serde(default = "default_max_incidents")]
    pub max_incidents: usize,

    /// Components shut down in safe mode.
    #[serde(default = "default_safe_mode_disabled")]
    pub safe_mode_disabled: Vec<ComponentKind>,
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_true() -> bool {
    true
}
fn default_health_interval() -> u64 {
    30_000
}
fn default_latency_threshold() -> u64 {
    5_000
}
fn default_max_boot_time() -> u64 {
    60_000
}
fn default_max_recovery_attempts() -> u32 {
    3
}
fn default_max_incidents() -> usize {
    100
}
fn default_safe_mode_disabled() -> Vec<ComponentKind> {
    vec![
        ComponentKind::Pricing,
        ComponentKind::Tax,
        ComponentKind::Compliance,
        ComponentKind::Sync,
    ]
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            version: default_version(),
            environment: Environment::default(),
            safe_mode_enabled: true,
            auto_recovery_enabled: true,
            health_check_interval_ms: default_health_interval(),
            health_latency_threshold_ms: default_latency_threshold(),
            max_boot_time_ms: default_max_boot_time(),
            max_recovery_attempts: default_max_recovery_attempts(),
            max_incidents: default_max_incidents(),
            safe_mode_disabled: default_safe_mode_disabled(),
        }
    }
}

impl KernelConfig {
    /// Loads configuration from file and environment, then validates it.
    pub fn load(config_path: Option<PathBuf>) -> KernelResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading kernel config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Kernel config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load kernel config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn save(&self, config_path: Option<PathBuf>) -> KernelResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| KernelError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KernelError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| KernelError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Kernel config saved");
        Ok(())
    }

    pub fn validate(&self) -> KernelResult<()> {
        if self.version.trim().is_empty() {
            return Err(KernelError::InvalidConfig("version is required".into()));
        }
        if self.health_check_interval_ms < MIN_HEALTH_CHECK_INTERVAL_MS {
            return Err(KernelError::InvalidConfig(format!(
                "health_check_interval_ms must be at least {MIN_HEALTH_CHECK_INTERVAL_MS}"
            )));
        }
        if self.health_latency_threshold_ms == 0 {
            return Err(KernelError::InvalidConfig(
                "health_latency_threshold_ms must be greater than 0".into(),
            ));
        }
        if self.max_boot_time_ms < MIN_BOOT_TIME_MS {
            return Err(KernelError::InvalidConfig(format!(
                "max_boot_time_ms must be at least {MIN_BOOT_TIME_MS}"
            )));
        }
        if self.max_incidents == 0 {
            return Err(KernelError::InvalidConfig(
                "max_incidents must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(env) = lookup("TITAN_ENVIRONMENT") {
            match env.parse::<Environment>() {
                Ok(parsed) => self.environment = parsed,
                Err(e) => warn!(error = %e, "Ignoring invalid TITAN_ENVIRONMENT"),
            }
        }

        if let Some(flag) = lookup("TITAN_SAFE_MODE") {
            match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.safe_mode_enabled = true,
                "0" | "false" | "no" | "off" => self.safe_mode_enabled = false,
                _ => warn!(value = %flag, "Ignoring invalid TITAN_SAFE_MODE"),
            }
        }

        if let Some(attempts) = lookup("TITAN_MAX_RECOVERY_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(n) => self.max_recovery_attempts = n,
                Err(_) => warn!(value = %attempts, "Ignoring invalid TITAN_MAX_RECOVERY_ATTEMPTS"),
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "titan", "pos")
            .map(|dirs| dirs.config_dir().join("kernel.toml"))
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn health_latency_threshold(&self) -> Duration {
        Duration::from_millis(self.health_latency_threshold_ms)
    }

    pub fn max_boot_time(&self) -> Duration {
        Duration::from_millis(self.max_boot_time_ms)
    }

    pub fn is_disabled_in_safe_mode(&self, kind: ComponentKind) -> bool {
        self.safe_mode_disabled.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = KernelConfig::default();
        assert!(config.safe_mode_enabled);
        assert_eq!(config.max_recovery_attempts, 3);
        assert_eq!(config.health_check_interval(), Duration::from_secs(30));
        assert!(config.is_disabled_in_safe_mode(ComponentKind::Sync));
        assert!(!config.is_disabled_in_safe_mode(ComponentKind::Catalog));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_limits() {
        let mut config = KernelConfig {
            health_check_interval_ms: 1_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.health_check_interval_ms = 30_000;
        config.max_boot_time_ms = 500;
        assert!(config.validate().is_err());

        config.max_boot_time_ms = 60_000;
        config.version = " ".into();
        assert!(matches!(config.validate(), Err(KernelError::InvalidConfig(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TITAN_ENVIRONMENT", "prod"),
            ("TITAN_SAFE_MODE", "off"),
            ("TITAN_MAX_RECOVERY_ATTEMPTS", "two"),
        ]
        .into_iter()
        .collect();

        let mut config = KernelConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.environment, Environment::Production);
        assert!(!config.safe_mode_enabled);
        // Unparseable values are ignored.
        assert_eq!(config.max_recovery_attempts, 3);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: KernelConfig = toml::from_str(
            r#"
            environment = "staging"
            safe_mode_disabled = ["sync"]
            "#,
        )
        .unwrap();

        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.safe_mode_disabled, vec![ComponentKind::Sync]);
        assert_eq!(config.max_boot_time_ms, 60_000);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("kernel.toml");

        let config = KernelConfig {
            max_recovery_attempts: 5,
            ..Default::default()
        };
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let reloaded: KernelConfig = toml::from_str(&contents).unwrap();
        assert_eq!(reloaded, config);
    }
}
