//! Configuration using Figment
//!
//! Configuration is layered from:
//! 1. Built-in defaults (the constants the board firmware assumes)
//! 2. `config/telemetry.toml` (optional)
//! 3. Environment variables prefixed with `TELEMETRY_`, nested with `__`
//!
//! # Example
//! ```no_run
//! use telemetry_link::config::TelemetryConfig;
//!
//! let config = TelemetryConfig::load()?;
//! println!("Throttle: {:?}", config.parser.throttle_interval());
//! # Ok::<(), telemetry_link::error::TelemetryError>(())
//! ```

use crate::error::{AppResult, TelemetryError};
use crate::logging::OutputFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/telemetry.toml";

/// Name prefix the board advertises over Bluetooth LE.
pub const DEFAULT_NAME_PREFIX: &str = "BBC micro:bit";

/// Upper bound for every millisecond interval setting (one day).
pub const MAX_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

/// Nordic UART service exposed by the board.
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// UART characteristic the board notifies on.
pub const UART_TX_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Record parser and throttle
    pub parser: ParserSettings,
    /// Rolling history windows
    pub history: HistorySettings,
    /// Shared transport lifecycle settings
    pub transport: TransportSettings,
    /// Bluetooth LE transport
    pub radio: RadioSettings,
    /// USB serial transport
    pub serial: SerialSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "telemetry-link".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Compact,
        }
    }
}

/// Record parser knobs. The defaults assume the board transmits about once a second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserSettings {
    /// Minimum spacing between delivered readings
    pub throttle_interval_ms: u64,
    /// Buffer length (characters) that triggers truncation
    pub buffer_ceiling: usize,
    /// Characters kept after truncation
    pub buffer_keep: usize,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            throttle_interval_ms: 1000,
            buffer_ceiling: 4096,
            buffer_keep: 512,
        }
    }
}

impl ParserSettings {
    /// Throttle interval as a [`Duration`].
    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }
}

/// History window sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Samples kept per metric (300 = five minutes at 1 Hz)
    pub capacity: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self { capacity: 300 }
    }
}

/// Settings shared by both connection managers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Period of the packets-per-second sampler
    pub rate_sample_interval_ms: u64,
    /// Capacity of the transport to parser mailbox
    pub mailbox_capacity: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            rate_sample_interval_ms: 1000,
            mailbox_capacity: 64,
        }
    }
}

impl TransportSettings {
    /// Rate sampler period as a [`Duration`].
    pub fn rate_sample_interval(&self) -> Duration {
        Duration::from_millis(self.rate_sample_interval_ms)
    }
}

/// Bluetooth LE transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioSettings {
    /// Only devices whose advertised name starts with this are offered
    pub name_prefix: String,
    /// Service that must be present on the peer
    pub service_uuid: Uuid,
    /// Notification characteristic carrying the text stream
    pub characteristic_uuid: Uuid,
    /// How long device selection waits for a match before it counts as dismissed
    pub selection_window_ms: u64,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            service_uuid: UART_SERVICE_UUID,
            characteristic_uuid: UART_TX_CHARACTERISTIC_UUID,
            selection_window_ms: 10_000,
        }
    }
}

impl RadioSettings {
    /// Selection window as a [`Duration`].
    pub fn selection_window(&self) -> Duration {
        Duration::from_millis(self.selection_window_ms)
    }
}

/// USB serial transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Explicit port path; when absent the first USB serial port is selected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Link speed (8-N-1, no flow control)
    pub baud_rate: u32,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from `config/telemetry.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `TELEMETRY_`.
    /// Example: `TELEMETRY_PARSER__THROTTLE_INTERVAL_MS=500`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path. A missing file leaves the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(TelemetryConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("TELEMETRY_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(TelemetryError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.parser.throttle_interval_ms == 0
            || self.parser.throttle_interval_ms > MAX_INTERVAL_MS
        {
            return Err(TelemetryError::Configuration(format!(
                "parser.throttle_interval_ms must be between 1 and {MAX_INTERVAL_MS}"
            )));
        }

        if self.parser.buffer_keep > self.parser.buffer_ceiling {
            return Err(TelemetryError::Configuration(format!(
                "parser.buffer_keep ({}) must not exceed parser.buffer_ceiling ({})",
                self.parser.buffer_keep, self.parser.buffer_ceiling
            )));
        }

        if self.history.capacity == 0 {
            return Err(TelemetryError::Configuration(
                "history.capacity must be greater than 0".into(),
            ));
        }

        if self.transport.rate_sample_interval_ms == 0
            || self.transport.rate_sample_interval_ms > MAX_INTERVAL_MS
        {
            return Err(TelemetryError::Configuration(format!(
                "transport.rate_sample_interval_ms must be between 1 and {MAX_INTERVAL_MS}"
            )));
        }

        if self.radio.selection_window_ms > MAX_INTERVAL_MS {
            return Err(TelemetryError::Configuration(format!(
                "radio.selection_window_ms must not exceed {MAX_INTERVAL_MS}"
            )));
        }

        if self.transport.mailbox_capacity == 0 {
            return Err(TelemetryError::Configuration(
                "transport.mailbox_capacity must be greater than 0".into(),
            ));
        }

        if self.radio.name_prefix.is_empty() {
            return Err(TelemetryError::Configuration(
                "radio.name_prefix must not be empty".into(),
            ));
        }

        if self.serial.baud_rate == 0 {
            return Err(TelemetryError::Configuration(
                "serial.baud_rate must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| TelemetryError::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn defaults_match_firmware_constants() {
        let config = TelemetryConfig::default();
        assert_eq!(config.parser.throttle_interval(), Duration::from_millis(1000));
        assert_eq!(config.parser.buffer_ceiling, 4096);
        assert_eq!(config.parser.buffer_keep, 512);
        assert_eq!(config.history.capacity, 300);
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.radio.name_prefix, "BBC micro:bit");
        assert_eq!(
            config.radio.service_uuid.to_string(),
            "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(
            config.radio.characteristic_uuid.to_string(),
            "6e400003-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn missing_file_yields_defaults() {
        let config = TelemetryConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config, TelemetryConfig::default());
    }

    #[test]
    #[serial]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [parser]
            throttle_interval_ms = 250

            [serial]
            port = "/dev/ttyACM0"
            "#
        )
        .unwrap();

        let config = TelemetryConfig::load_from(file.path()).unwrap();
        assert_eq!(config.parser.throttle_interval_ms, 250);
        assert_eq!(config.parser.buffer_ceiling, 4096);
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.serial.baud_rate, 115_200);
    }

    #[test]
    #[serial]
    fn environment_overrides_file() {
        std::env::set_var("TELEMETRY_HISTORY__CAPACITY", "60");
        let config = TelemetryConfig::load_from("does/not/exist.toml");
        std::env::remove_var("TELEMETRY_HISTORY__CAPACITY");
        assert_eq!(config.unwrap().history.capacity, 60);
    }

    #[test]
    fn invalid_log_level() {
        let mut config = TelemetryConfig::default();
        config.application.log_level = "chatty".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn keep_must_fit_under_ceiling() {
        let mut config = TelemetryConfig::default();
        config.parser.buffer_keep = 8192;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_values_rejected() {
        let mut config = TelemetryConfig::default();
        config.parser.throttle_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.history.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.serial.baud_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_intervals_rejected() {
        let mut config = TelemetryConfig::default();
        config.parser.throttle_interval_ms = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.transport.rate_sample_interval_ms = MAX_INTERVAL_MS + 1;
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.radio.selection_window_ms = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.transport.rate_sample_interval_ms = MAX_INTERVAL_MS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn renders_as_toml() {
        let rendered = TelemetryConfig::default().to_toml().unwrap();
        assert!(rendered.contains("throttle_interval_ms = 1000"));
        assert!(rendered.contains("6e400001-b5a3-f393-e0a9-e50e24dcca9e"));
    }
}
