//! Link configuration and its loader
//!
//! Loading happens in three tiers:
//! 1. TOML file (explicit path, else `DEVICE_LINK_CONFIG`, else built-in defaults)
//! 2. Environment variable overrides
//! 3. Validation

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{self, connect, monitor, receiver, writer};
use crate::errors::LinkError;

/// Environment variable naming a TOML config file
pub const CONFIG_PATH_ENV: &str = "DEVICE_LINK_CONFIG";

#[cfg(windows)]
const DEFAULT_PORT: &str = "COM3";
#[cfg(not(windows))]
const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Settings for one device link. The link copies it on construction, so it
/// is effectively immutable once a link exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial port name (`/dev/ttyUSB0`, `COM3`)
    pub port: String,
    /// Must match the firmware's `Serial.begin()` rate
    pub baud_rate: u32,
    /// Open attempts per `connect()` call
    pub max_retries: u32,
    /// Pause between open attempts
    pub retry_delay_ms: u64,
    /// How long a queued command may wait for the port before it is dropped
    pub command_timeout_ms: u64,
    /// Let the health monitor revive a dropped connection
    pub auto_reconnect: bool,
    /// Backoff after a failed reconnect
    pub reconnect_interval_ms: u64,
    /// Health monitor poll period
    pub monitor_interval_ms: u64,
    /// Writer retry granularity while the port is unavailable
    pub send_poll_interval_ms: u64,
    /// Receiver sleep when no bytes are pending
    pub read_idle_ms: u64,
    /// Receiver sleep after a read error
    pub error_backoff_ms: u64,
    /// Writer's bounded wait on an empty queue
    pub queue_poll_ms: u64,
    pub command_queue_capacity: usize,
    pub event_capacity: usize,
    /// Longest accepted inbound line, terminator included
    pub max_frame_len: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: connect::BAUD_RATE,
            max_retries: connect::MAX_RETRIES,
            retry_delay_ms: connect::RETRY_DELAY_MS,
            command_timeout_ms: writer::COMMAND_TIMEOUT_MS,
            auto_reconnect: true,
            reconnect_interval_ms: monitor::RECONNECT_INTERVAL_MS,
            monitor_interval_ms: monitor::INTERVAL_MS,
            send_poll_interval_ms: writer::SEND_POLL_INTERVAL_MS,
            read_idle_ms: receiver::READ_IDLE_MS,
            error_backoff_ms: receiver::ERROR_BACKOFF_MS,
            queue_poll_ms: writer::QUEUE_POLL_MS,
            command_queue_capacity: writer::QUEUE_CAPACITY,
            event_capacity: constants::EVENT_CAPACITY,
            max_frame_len: receiver::MAX_FRAME_LEN,
        }
    }
}

impl LinkConfig {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Self::default()
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn send_poll_interval(&self) -> Duration {
        Duration::from_millis(self.send_poll_interval_ms)
    }

    pub fn read_idle(&self) -> Duration {
        Duration::from_millis(self.read_idle_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn queue_poll(&self) -> Duration {
        Duration::from_millis(self.queue_poll_ms)
    }

    /// Reject settings that would make a loop spin or never make progress.
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.port.trim().is_empty() {
            return Err(LinkError::Config("port must not be empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(LinkError::Config("baud_rate must be greater than 0".into()));
        }
        if self.max_retries == 0 {
            return Err(LinkError::Config("max_retries must be at least 1".into()));
        }
        let intervals = [
            ("command_timeout_ms", self.command_timeout_ms),
            ("monitor_interval_ms", self.monitor_interval_ms),
            ("send_poll_interval_ms", self.send_poll_interval_ms),
            ("read_idle_ms", self.read_idle_ms),
            ("error_backoff_ms", self.error_backoff_ms),
            ("queue_poll_ms", self.queue_poll_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(LinkError::Config(format!("{} must be greater than 0", name)));
            }
        }
        let sizes = [
            ("command_queue_capacity", self.command_queue_capacity),
            ("event_capacity", self.event_capacity),
            ("max_frame_len", self.max_frame_len),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(LinkError::Config(format!("{} must be greater than 0", name)));
            }
        }
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, LinkError> {
        toml::from_str(content).map_err(|e| LinkError::Config(format!("invalid TOML: {}", e)))
    }
}

/// Load configuration.
///
/// `path` wins over `DEVICE_LINK_CONFIG`; with neither, defaults are used.
/// Environment overrides are applied afterwards and the result is validated.
///
/// # Errors
///
/// `LinkError::Config` if the file cannot be read, is not valid TOML, or the
/// final settings fail validation.
pub fn load_config(path: Option<&Path>) -> Result<LinkConfig, LinkError> {
    let file = match path {
        Some(p) => Some(p.to_path_buf()),
        None => env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from),
    };

    let mut config = match file {
        Some(file) => {
            let content = fs::read_to_string(&file).map_err(|e| {
                LinkError::Config(format!("failed to read {}: {}", file.display(), e))
            })?;
            LinkConfig::from_toml_str(&content)?
        }
        None => LinkConfig::default(),
    };

    apply_environment_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Apply environment variable overrides
///
/// Supported variables:
/// - `DEVICE_LINK_PORT` -> `port`
/// - `DEVICE_LINK_BAUD` -> `baud_rate`
/// - `DEVICE_LINK_AUTO_RECONNECT` -> `auto_reconnect` (`true`/`false`/`1`/`0`)
pub fn apply_environment_overrides(config: &mut LinkConfig) -> Result<(), LinkError> {
    if let Ok(value) = env::var("DEVICE_LINK_PORT") {
        config.port = value;
    }
    if let Ok(value) = env::var("DEVICE_LINK_BAUD") {
        config.baud_rate = value
            .parse()
            .map_err(|_| LinkError::Config(format!("DEVICE_LINK_BAUD is not a number: {}", value)))?;
    }
    if let Ok(value) = env::var("DEVICE_LINK_AUTO_RECONNECT") {
        config.auto_reconnect = parse_bool(&value).ok_or_else(|| {
            LinkError::Config(format!("DEVICE_LINK_AUTO_RECONNECT is not a boolean: {}", value))
        })?;
    }
    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    const OVERRIDE_VARS: [&str; 3] = [
        "DEVICE_LINK_PORT",
        "DEVICE_LINK_BAUD",
        "DEVICE_LINK_AUTO_RECONNECT",
    ];

    /// Serialises tests that read or write the process environment
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clear_overrides() {
        for var in OVERRIDE_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults_match_controller_settings() {
        let config = LinkConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.command_timeout(), Duration::from_secs(2));
        assert_eq!(config.reconnect_interval(), Duration::from_secs(5));
        assert!(config.auto_reconnect);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = LinkConfig::from_toml_str(
            r#"
            port = "/dev/ttyACM0"
            baud_rate = 115200
            auto_reconnect = false
            "#,
        )
        .unwrap();
        assert_eq!(config.port, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, 115200);
        assert!(!config.auto_reconnect);
        assert_eq!(config.command_timeout_ms, 2000);
    }

    #[test]
    fn test_invalid_toml() {
        let err = LinkConfig::from_toml_str("baud_rate = \"fast\"").unwrap_err();
        assert!(matches!(err, LinkError::Config(_)));
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = LinkConfig::new("", 9600);
        assert!(config.validate().is_err());

        config.port = "COM4".into();
        config.max_retries = 0;
        assert!(config.validate().unwrap_err().to_string().contains("max_retries"));

        config.max_retries = 1;
        config.send_poll_interval_ms = 0;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("send_poll_interval_ms"));

        config.send_poll_interval_ms = 10;
        config.command_queue_capacity = 0;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("command_queue_capacity"));
    }

    #[test]
    fn test_load_config_from_file() {
        let _env = env_lock();
        let path = env::temp_dir().join(format!("device-link-test-{}.toml", std::process::id()));
        fs::write(&path, "port = \"/dev/ttyS9\"\nmax_retries = 5\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_load_config_missing_file() {
        let _env = env_lock();
        let err = load_config(Some(Path::new("/nonexistent/device-link.toml"))).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn test_environment_overrides() {
        let _env = env_lock();
        clear_overrides();

        let mut config = LinkConfig::default();
        apply_environment_overrides(&mut config).unwrap();
        assert_eq!(config, LinkConfig::default());

        env::set_var("DEVICE_LINK_PORT", "/dev/ttyUSB3");
        env::set_var("DEVICE_LINK_BAUD", "115200");
        env::set_var("DEVICE_LINK_AUTO_RECONNECT", "off");
        apply_environment_overrides(&mut config).unwrap();
        assert_eq!(config.port, "/dev/ttyUSB3");
        assert_eq!(config.baud_rate, 115200);
        assert!(!config.auto_reconnect);
        assert_eq!(config.max_retries, 3);

        env::set_var("DEVICE_LINK_BAUD", "fast");
        let err = apply_environment_overrides(&mut config).unwrap_err();
        assert!(matches!(err, LinkError::Config(_)));
        assert!(err.to_string().contains("DEVICE_LINK_BAUD"));
        env::set_var("DEVICE_LINK_BAUD", "9600");

        env::set_var("DEVICE_LINK_AUTO_RECONNECT", "maybe");
        let err = apply_environment_overrides(&mut config).unwrap_err();
        assert!(err.to_string().contains("DEVICE_LINK_AUTO_RECONNECT"));

        clear_overrides();
    }

    #[test]
    fn test_environment_overrides_file_settings() {
        let _env = env_lock();
        clear_overrides();
        let path = env::temp_dir().join(format!("device-link-env-{}.toml", std::process::id()));
        fs::write(&path, "port = \"/dev/ttyS9\"\nbaud_rate = 19200\n").unwrap();

        env::set_var("DEVICE_LINK_PORT", "/dev/ttyACM2");
        let loaded = load_config(Some(&path));
        clear_overrides();
        let _ = fs::remove_file(&path);

        let config = loaded.unwrap();
        assert_eq!(config.port, "/dev/ttyACM2");
        assert_eq!(config.baud_rate, 19200);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
