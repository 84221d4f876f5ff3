//! TOML config file loading and validation.
//!
//! Every field has a usable default, so a config file only needs to override
//! what differs. In practice at least `access_token` must be set.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::control::Thresholds;

// ---------------------------------------------------------------------------
// Config structure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial device path (ignored when built with the simulator).
    pub serial_device: String,
    pub baud: u32,
    /// Bounded serial read timeout; keeps the reader responsive to shutdown.
    pub serial_timeout_ms: u64,

    pub mqtt_host: String,
    pub mqtt_port: u16,
    /// ThingsBoard device access token, sent as the MQTT username.
    pub access_token: String,

    /// Hose turns ON in auto mode at this soil level or drier.
    pub dry_on_level: i64,
    /// Hose turns OFF in auto mode at this soil level or wetter.
    pub wet_off_level: i64,
    /// Auto mode flag at startup.
    pub auto_enabled_default: bool,

    /// Pacing delay after each telemetry publish.
    pub publish_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial_device: "/dev/ttyACM0".to_string(),
            baud: 9600,
            serial_timeout_ms: 1000,
            mqtt_host: "mqtt.thingsboard.cloud".to_string(),
            mqtt_port: 1883,
            access_token: String::new(),
            dry_on_level: 4,
            wet_off_level: 1,
            auto_enabled_default: true,
            publish_interval_ms: 200,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all fields. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.serial_device.trim().is_empty() {
            errors.push("serial_device is empty".to_string());
        }
        if self.baud == 0 {
            errors.push("baud must be positive".to_string());
        }
        if self.serial_timeout_ms == 0 {
            errors.push("serial_timeout_ms must be positive".to_string());
        }

        if self.mqtt_host.trim().is_empty() {
            errors.push("mqtt_host is empty".to_string());
        }
        if self.access_token.trim().is_empty() {
            errors.push("access_token is empty — set the device token".to_string());
        }

        // The hysteresis band collapses (or inverts) unless dry-on sits
        // strictly above wet-off, which would make the hose oscillate.
        if self.dry_on_level <= self.wet_off_level {
            errors.push(format!(
                "dry_on_level ({}) must be greater than wet_off_level ({})",
                self.dry_on_level, self.wet_off_level
            ));
        }

        if self.publish_interval_ms == 0 {
            errors.push("publish_interval_ms must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            dry_on_level: self.dry_on_level,
            wet_off_level: self.wet_off_level,
        }
    }

    pub fn serial_timeout(&self) -> Duration {
        Duration::from_millis(self.serial_timeout_ms)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            access_token: "abc123".to_string(),
            ..Config::default()
        }
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
serial_device = "/dev/ttyUSB0"
baud = 115200
serial_timeout_ms = 500
mqtt_host = "broker.example.com"
mqtt_port = 8883
access_token = "tok"
dry_on_level = 5
wet_off_level = 2
auto_enabled_default = false
publish_interval_ms = 1000
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.serial_device, "/dev/ttyUSB0");
        assert_eq!(cfg.baud, 115200);
        assert_eq!(cfg.mqtt_port, 8883);
        assert_eq!(cfg.dry_on_level, 5);
        assert!(!cfg.auto_enabled_default);
    }

    #[test]
    fn parse_partial_config_fills_defaults() {
        let cfg: Config = toml::from_str(r#"access_token = "tok""#).unwrap();
        assert_eq!(cfg.serial_device, "/dev/ttyACM0");
        assert_eq!(cfg.baud, 9600);
        assert_eq!(cfg.dry_on_level, 4);
        assert_eq!(cfg.wet_off_level, 1);
        assert!(cfg.auto_enabled_default);
        assert_eq!(cfg.publish_interval_ms, 200);
    }

    // -- Validation --------------------------------------------------------

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn default_config_needs_a_token() {
        assert_validation_err(&Config::default(), "access_token is empty");
    }

    #[test]
    fn empty_serial_device_rejected() {
        let mut cfg = valid_config();
        cfg.serial_device = "  ".to_string();
        assert_validation_err(&cfg, "serial_device is empty");
    }

    #[test]
    fn zero_baud_rejected() {
        let mut cfg = valid_config();
        cfg.baud = 0;
        assert_validation_err(&cfg, "baud must be positive");
    }

    #[test]
    fn zero_serial_timeout_rejected() {
        let mut cfg = valid_config();
        cfg.serial_timeout_ms = 0;
        assert_validation_err(&cfg, "serial_timeout_ms must be positive");
    }

    #[test]
    fn empty_mqtt_host_rejected() {
        let mut cfg = valid_config();
        cfg.mqtt_host = String::new();
        assert_validation_err(&cfg, "mqtt_host is empty");
    }

    #[test]
    fn inverted_hysteresis_band_rejected() {
        let mut cfg = valid_config();
        cfg.dry_on_level = 1;
        cfg.wet_off_level = 4;
        assert_validation_err(
            &cfg,
            "dry_on_level (1) must be greater than wet_off_level (4)",
        );
    }

    #[test]
    fn collapsed_hysteresis_band_rejected() {
        let mut cfg = valid_config();
        cfg.dry_on_level = 3;
        cfg.wet_off_level = 3;
        assert_validation_err(&cfg, "must be greater than wet_off_level");
    }

    #[test]
    fn zero_publish_interval_rejected() {
        let mut cfg = valid_config();
        cfg.publish_interval_ms = 0;
        assert_validation_err(&cfg, "publish_interval_ms must be positive");
    }

    #[test]
    fn multiple_errors_collected() {
        let cfg = Config {
            serial_device: String::new(),
            baud: 0,
            dry_on_level: 0,
            wet_off_level: 0,
            ..Config::default()
        };
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("serial_device is empty"), "got: {msg}");
        assert!(msg.contains("baud must be positive"), "got: {msg}");
        assert!(msg.contains("wet_off_level"), "got: {msg}");
        assert!(msg.contains("access_token"), "got: {msg}");
    }

    // -- Derived values ----------------------------------------------------

    #[test]
    fn duration_accessors() {
        let cfg = valid_config();
        assert_eq!(cfg.serial_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.publish_interval(), Duration::from_millis(200));
    }

    #[test]
    fn thresholds_accessor() {
        let t = valid_config().thresholds();
        assert_eq!(t.dry_on_level, 4);
        assert_eq!(t.wet_off_level, 1);
    }
}
