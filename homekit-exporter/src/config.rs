//! Configuration for the HomeKit exporter.
//!
//! The file is decoded in two steps: a raw layer where every field is
//! optional, then [`ExporterConfig::resolve`] which substitutes defaults and
//! records each documented field that was missing. Missing fields are never
//! fatal; they are reported through [`ExporterConfig::warn_defaulted`] once
//! logging is up.

use std::fmt;
use std::path::Path;

use homekit_common::{LoggingConfig, TemperatureUnit};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] homekit_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// A documented field that was absent from the file and got its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingField {
    /// Dotted path of the field (e.g., `connection.host`).
    pub field: &'static str,
    /// The default that was substituted, rendered for logs.
    pub default: String,
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\" does not exist, using default: {}",
            self.field, self.default
        )
    }
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ExporterConfig {
    /// Bridge connection settings.
    pub connection: ConnectionConfig,

    /// Polling behaviour.
    pub settings: SettingsConfig,

    /// Extra poll targets (room or accessory names) on top of the rooms
    /// discovered from the bridge.
    pub devices: Vec<String>,

    /// Exposition endpoint settings.
    pub exporter: HttpConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Documented fields that fell back to their defaults.
    #[serde(skip)]
    pub defaulted: Vec<MissingField>,
}

/// Bridge connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionConfig {
    /// Bridge host name or address (default: "localhost").
    pub host: String,

    /// Bridge HTTP port (default: 8423).
    pub port: u16,

    /// Per-request timeout in seconds (default: 10).
    pub timeout_secs: u64,
}

impl ConnectionConfig {
    /// Base URL of the bridge API.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Polling behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsConfig {
    /// Seconds between poll cycles (default: 30).
    pub poll_secs: u64,

    /// Unit for temperature characteristics (default: F).
    pub temperature: TemperatureUnit,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            poll_secs: default_poll(),
            temperature: TemperatureUnit::default(),
        }
    }
}

/// Exposition endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "0.0.0.0:8000").
    pub listen: String,

    /// Path for the metrics endpoint (default: "/").
    pub path: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8423
}

fn default_timeout() -> u64 {
    10
}

fn default_poll() -> u64 {
    30
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

// Raw file layout; every field optional.

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    connection: Option<RawConnection>,
    #[serde(default)]
    settings: Option<RawSettings>,
    #[serde(default)]
    devices: Option<Vec<String>>,
    #[serde(default)]
    exporter: Option<RawHttp>,
    #[serde(default)]
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct RawConnection {
    host: Option<String>,
    port: Option<u16>,
    timeout: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    poll: Option<u64>,
    temperature: Option<TemperatureUnit>,
}

#[derive(Debug, Default, Deserialize)]
struct RawHttp {
    listen: Option<String>,
    path: Option<String>,
}

/// Take `value`, or record `field` as missing and fall back to `default`.
fn or_default<T: fmt::Display>(
    value: Option<T>,
    field: &'static str,
    default: T,
    defaulted: &mut Vec<MissingField>,
) -> T {
    value.unwrap_or_else(|| {
        defaulted.push(MissingField {
            field,
            default: default.to_string(),
        });
        default
    })
}

impl ExporterConfig {
    /// Load configuration from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw: RawConfig = homekit_common::load_config(path)?;
        let config = Self::resolve(raw);
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = homekit_common::parse_config(content)?;
        let config = Self::resolve(raw);
        config.validate()?;
        Ok(config)
    }

    /// Substitute defaults for every absent field.
    fn resolve(raw: RawConfig) -> Self {
        let mut defaulted = Vec::new();

        let connection = raw.connection.unwrap_or_default();
        let settings = raw.settings.unwrap_or_default();
        let exporter = raw.exporter.unwrap_or_default();

        let connection = ConnectionConfig {
            host: or_default(
                connection.host,
                "connection.host",
                default_host(),
                &mut defaulted,
            ),
            port: or_default(
                connection.port,
                "connection.port",
                default_port(),
                &mut defaulted,
            ),
            timeout_secs: connection.timeout.unwrap_or_else(default_timeout),
        };

        let settings = SettingsConfig {
            poll_secs: or_default(settings.poll, "settings.poll", default_poll(), &mut defaulted),
            temperature: or_default(
                settings.temperature,
                "settings.temperature",
                TemperatureUnit::default(),
                &mut defaulted,
            ),
        };

        Self {
            connection,
            settings,
            devices: raw.devices.unwrap_or_default(),
            exporter: HttpConfig {
                listen: exporter.listen.unwrap_or_else(default_listen),
                path: exporter.path.unwrap_or_else(default_path),
            },
            logging: raw.logging.unwrap_or_default(),
            defaulted,
        }
    }

    /// Log a warning for every documented field that fell back to its default.
    pub fn warn_defaulted(&self) {
        for missing in &self.defaulted {
            warn!(field = missing.field, default = %missing.default, "{}", missing);
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "connection.host must not be empty".to_string(),
            ));
        }

        if self.connection.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "connection.timeout must be > 0".to_string(),
            ));
        }

        if self.settings.poll_secs == 0 {
            return Err(ConfigError::Validation(
                "settings.poll must be > 0".to_string(),
            ));
        }

        // Validate listen address format
        if self
            .exporter
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.exporter.listen
            )));
        }

        // Validate path starts with /
        if !self.exporter.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if matches!(self.exporter.path.as_str(), "/health" | "/ready") {
            return Err(ConfigError::Validation(format!(
                "Metrics path {} is reserved for probes",
                self.exporter.path
            )));
        }

        Ok(())
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            settings: SettingsConfig::default(),
            devices: Vec::new(),
            exporter: HttpConfig::default(),
            logging: LoggingConfig::default(),
            defaulted: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homekit_common::LogFormat;

    #[test]
    fn test_parse_minimal_config() {
        let config = ExporterConfig::parse("{}").unwrap();

        assert_eq!(config.connection.host, "localhost");
        assert_eq!(config.connection.port, 8423);
        assert_eq!(config.connection.timeout_secs, 10);
        assert_eq!(config.settings.poll_secs, 30);
        assert_eq!(config.settings.temperature, TemperatureUnit::Fahrenheit);
        assert!(config.devices.is_empty());
        assert_eq!(config.exporter.listen, "0.0.0.0:8000");
        assert_eq!(config.exporter.path, "/");
    }

    #[test]
    fn test_missing_documented_fields_are_recorded() {
        let config = ExporterConfig::parse("{}").unwrap();
        let fields: Vec<&str> = config.defaulted.iter().map(|m| m.field).collect();

        assert_eq!(
            fields,
            vec![
                "connection.host",
                "connection.port",
                "settings.poll",
                "settings.temperature"
            ]
        );
        assert_eq!(config.defaulted[1].default, "8423");
        assert_eq!(config.defaulted[3].default, "F");
    }

    #[test]
    fn test_partial_section_only_defaults_missing_keys() {
        let yaml = r#"
connection:
  host: bridge.local
settings:
  temperature: C
"#;
        let config = ExporterConfig::parse(yaml).unwrap();
        let fields: Vec<&str> = config.defaulted.iter().map(|m| m.field).collect();

        assert_eq!(config.connection.host, "bridge.local");
        assert_eq!(config.settings.temperature, TemperatureUnit::Celsius);
        assert_eq!(fields, vec!["connection.port", "settings.poll"]);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
connection:
  host: 10.0.0.5
  port: 51826
  timeout: 5
settings:
  poll: 15
  temperature: c
devices:
  - kitchen-light
  - Living Room
exporter:
  listen: 127.0.0.1:9101
  path: /metrics
logging:
  level: debug
  format: json
"#;

        let config = ExporterConfig::parse(yaml).unwrap();

        assert!(config.defaulted.is_empty());
        assert_eq!(config.connection.base_url(), "http://10.0.0.5:51826");
        assert_eq!(config.connection.timeout_secs, 5);
        assert_eq!(config.settings.poll_secs, 15);
        assert_eq!(config.settings.temperature, TemperatureUnit::Celsius);
        assert_eq!(config.devices, vec!["kitchen-light", "Living Room"]);
        assert_eq!(config.exporter.listen, "127.0.0.1:9101");
        assert_eq!(config.exporter.path, "/metrics");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_temperature_unit() {
        let yaml = "settings:\n  temperature: K\n";
        assert!(ExporterConfig::parse(yaml).is_err());
    }

    #[test]
    fn test_validate_invalid_listen() {
        let yaml = "exporter:\n  listen: not-an-address\n";

        let result = ExporterConfig::parse(yaml);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_validate_invalid_path() {
        let yaml = "exporter:\n  path: no-leading-slash\n";

        let result = ExporterConfig::parse(yaml);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must start with /")
        );
    }

    #[test]
    fn test_validate_reserved_path() {
        let yaml = "exporter:\n  path: /health\n";
        let err = ExporterConfig::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_validate_zero_poll() {
        let yaml = "settings:\n  poll: 0\n";
        assert!(ExporterConfig::parse(yaml).is_err());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let yaml = "connection:\n  timeout: 0\n";
        assert!(ExporterConfig::parse(yaml).is_err());
    }

    #[test]
    fn test_load_from_file_records_defaults() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "connection:\n  host: bridge.lan\nsettings:\n  temperature: c").unwrap();

        let config = ExporterConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.connection.host, "bridge.lan");
        assert_eq!(config.settings.temperature, TemperatureUnit::Celsius);

        let fields: Vec<&str> = config.defaulted.iter().map(|m| m.field).collect();
        assert_eq!(fields, vec!["connection.port", "settings.poll"]);
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = ExporterConfig::load_from_file("/nonexistent/homekit_exporter.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn test_missing_field_display() {
        let missing = MissingField {
            field: "connection.port",
            default: "8423".to_string(),
        };
        assert_eq!(
            missing.to_string(),
            "\"connection.port\" does not exist, using default: 8423"
        );
    }
}
