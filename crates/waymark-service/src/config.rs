//! Service configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use waymark_core::TrackingSettings;
use waymark_types::PerformanceMode;

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Acquisition settings.
    pub tracking: TrackingConfig,
    /// Delivery settings.
    pub sync: SyncConfig,
    /// Positioning source settings.
    pub positioning: PositioningConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// ```
    /// use waymark_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.tracking.validate());
        errors.extend(self.sync.validate());
        errors.extend(self.positioning.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8480").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8480".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
            return errors;
        }

        match self.bind.rsplit_once(':') {
            None => errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            )),
            Some((_, port)) => match port.parse::<u16>() {
                Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                Err(_) => errors.push(ValidationError::new(
                    "server.bind",
                    format!("invalid port '{}': must be a number 1-65535", port),
                )),
                Ok(_) => {}
            },
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Queue database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: waymark_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }
        errors
    }
}

/// Acquisition configuration.
///
/// The runtime-mutable thresholds sit directly in the `[tracking]` table
/// next to the startup-only keys:
///
/// ```toml
/// [tracking]
/// mode = "normal"
/// timeline_logging = true
/// autostart = false
/// time_threshold_minutes = 5.0
/// distance_threshold_m = 15.0
///
/// [tracking.duty_cycle]
/// wake_lead_secs = 100.0
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Performance mode at startup.
    pub mode: PerformanceMode,
    /// Whether accepted fixes are written to the queue at startup.
    pub timeline_logging: bool,
    /// Activate, confirm permission and start as soon as the service is up.
    pub autostart: bool,
    /// Initial runtime-mutable settings.
    #[serde(flatten)]
    pub settings: TrackingSettings,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            mode: PerformanceMode::Normal,
            timeline_logging: true,
            autostart: false,
            settings: TrackingSettings::default(),
        }
    }
}

impl TrackingConfig {
    /// Validate tracking configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        self.settings
            .problems()
            .into_iter()
            .map(|(field, message)| ValidationError {
                field: format!("tracking.{}", field),
                message,
            })
            .collect()
    }
}

/// Minimum request timeout in seconds.
pub const MIN_SYNC_TIMEOUT: u64 = 1;
/// Maximum request timeout in seconds.
pub const MAX_SYNC_TIMEOUT: u64 = 300;

/// Delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Whether the sync engine runs at all.
    pub enabled: bool,
    /// Remote endpoint receiving one JSON payload per row.
    pub endpoint: Option<String>,
    /// Bearer token sent with every submission.
    pub token: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
            token: None,
            timeout_secs: 30,
        }
    }
}

impl SyncConfig {
    /// Endpoint to deliver to, if delivery is enabled and configured.
    pub fn active_endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref().filter(|_| self.enabled)
    }

    /// Validate sync configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(endpoint) = &self.endpoint
            && !endpoint.starts_with("http://")
            && !endpoint.starts_with("https://")
        {
            errors.push(ValidationError::new(
                "sync.endpoint",
                format!(
                    "invalid endpoint '{}': must start with http:// or https://",
                    endpoint
                ),
            ));
        }

        if let Some(token) = &self.token
            && token.is_empty()
        {
            errors.push(ValidationError::new(
                "sync.token",
                "token cannot be empty string (omit it instead)",
            ));
        }

        if !(MIN_SYNC_TIMEOUT..=MAX_SYNC_TIMEOUT).contains(&self.timeout_secs) {
            errors.push(ValidationError::new(
                "sync.timeout_secs",
                format!(
                    "timeout {} is out of range ({}-{} seconds)",
                    self.timeout_secs, MIN_SYNC_TIMEOUT, MAX_SYNC_TIMEOUT
                ),
            ));
        }

        errors
    }
}

/// Positioning source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PositioningConfig {
    /// JSON-lines file of fixes to replay. Without one the tracker receives no fixes.
    pub replay: Option<PathBuf>,
    /// Start over at the first fix once the file is exhausted.
    pub replay_loop: bool,
    /// Accuracy multiplier applied to fixes replayed in low-power posture.
    pub low_power_accuracy_factor: f64,
}

impl Default for PositioningConfig {
    fn default() -> Self {
        Self {
            replay: None,
            replay_loop: true,
            low_power_accuracy_factor: 4.0,
        }
    }
}

impl PositioningConfig {
    /// Validate positioning configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(path) = &self.replay
            && path.as_os_str().is_empty()
        {
            errors.push(ValidationError::new(
                "positioning.replay",
                "replay path cannot be empty (omit it instead)",
            ));
        }

        if !(self.low_power_accuracy_factor.is_finite() && self.low_power_accuracy_factor >= 1.0)
        {
            errors.push(ValidationError::new(
                "positioning.low_power_accuracy_factor",
                "must be a number of at least 1.0",
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `tracking.duty_cycle.wake_lead_secs`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("waymark")
        .join("service.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(err: ConfigError) -> Vec<String> {
        match err {
            ConfigError::Validation(errors) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1:8480");
        assert_eq!(config.storage.path, waymark_store::default_db_path());
        assert_eq!(config.tracking.mode, PerformanceMode::Normal);
        assert!(config.tracking.timeline_logging);
        assert!(!config.tracking.autostart);
        assert!(config.sync.endpoint.is_none());
        assert!(config.positioning.replay.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_tracking_table_carries_settings() {
        let toml = r#"
            [tracking]
            mode = "power_saver"
            timeline_logging = false
            time_threshold_minutes = 2.5
            distance_threshold_m = 40

            [tracking.duty_cycle]
            wake_lead_secs = 60.0
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.tracking.mode, PerformanceMode::PowerSaver);
        assert!(!config.tracking.timeline_logging);
        assert_eq!(config.tracking.settings.time_threshold_minutes, 2.5);
        assert_eq!(config.tracking.settings.distance_threshold_m, 40.0);
        assert_eq!(config.tracking.settings.duty_cycle.wake_lead_secs, 60.0);
        // Untouched keys keep their defaults
        assert_eq!(config.tracking.settings.accuracy_ceiling_m, 50.0);
        assert_eq!(config.tracking.settings.duty_cycle.deep_sleep_lead_secs, 200.0);
    }

    #[test]
    fn test_sync_active_endpoint() {
        let mut sync = SyncConfig {
            endpoint: Some("https://example.com/locations".to_string()),
            ..Default::default()
        };
        assert_eq!(sync.active_endpoint(), Some("https://example.com/locations"));

        sync.enabled = false;
        assert_eq!(sync.active_endpoint(), None);
    }

    #[test]
    fn test_validation_reports_field_paths() {
        let mut config = Config::default();
        config.server.bind = "localhost".to_string();
        config.tracking.settings.accuracy_ceiling_m = 0.0;
        config.tracking.settings.duty_cycle.wake_lead_secs = -1.0;
        config.sync.endpoint = Some("ftp://example.com".to_string());
        config.sync.timeout_secs = 0;
        config.positioning.low_power_accuracy_factor = 0.5;

        assert_eq!(
            fields(config.validate().unwrap_err()),
            vec![
                "server.bind",
                "tracking.accuracy_ceiling_m",
                "tracking.duty_cycle.wake_lead_secs",
                "sync.endpoint",
                "sync.timeout_secs",
                "positioning.low_power_accuracy_factor",
            ]
        );
    }

    #[test]
    fn test_validation_rejects_port_zero() {
        let config = ServerConfig {
            bind: "0.0.0.0:0".to_string(),
        };
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "port cannot be 0");
    }

    #[test]
    fn test_validation_error_display() {
        let mut config = Config::default();
        config.storage.path = PathBuf::new();
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("  - storage.path: database path cannot be empty"));
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("service.toml");

        let mut config = Config::default();
        config.server.bind = "0.0.0.0:9090".to_string();
        config.storage.path = PathBuf::from("/tmp/queue.db");
        config.tracking.mode = PerformanceMode::High;
        config.tracking.settings.time_threshold_minutes = 10.0;
        config.sync.endpoint = Some("https://example.com/api".to_string());
        config.positioning.replay = Some(PathBuf::from("/tmp/route.jsonl"));

        config.save(&config_path).unwrap();
        let loaded = Config::load_validated(&config_path).unwrap();

        assert_eq!(loaded.server.bind, "0.0.0.0:9090");
        assert_eq!(loaded.storage.path, PathBuf::from("/tmp/queue.db"));
        assert_eq!(loaded.tracking.mode, PerformanceMode::High);
        assert_eq!(loaded.tracking.settings, config.tracking.settings);
        assert_eq!(loaded.sync.endpoint.as_deref(), Some("https://example.com/api"));
        assert_eq!(
            loaded.positioning.replay,
            Some(PathBuf::from("/tmp/route.jsonl"))
        );
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/waymark/service.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("service.toml");
        std::fs::write(&path, "[server\nbind = ").unwrap();
        assert!(matches!(
            Config::load(&path).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("waymark/service.toml"));
    }
}
