//! Gateway configuration
//!
//! Values come from the `Default` impls, then an optional TOML file, then
//! `GATEWAY_*` environment variables (`__` separates nested keys, e.g.
//! `GATEWAY_STORAGE__TABLE=readings`).

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use connection_manager::ConnMgrConfig;
use data_manager::AlertConfig;
use serde::{Deserialize, Serialize};
use shared_buffer::BufferConfig;
use storage::{StorageConfig, DEFAULT_TABLE};

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "GATEWAY";

/// Largest accepted idle timeout (one week)
pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Top-level gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Idle timeout for connections, the server and both consumers
    pub timeout_secs: u64,
    /// Interface the connection manager binds
    pub bind_address: IpAddr,
    /// Consumer slots in the shared buffer
    pub max_consumers: usize,
    /// Sensor-to-room map read by the data manager
    pub sensor_map: PathBuf,
    /// File the event log collector writes
    pub log_file: PathBuf,
    pub storage: StorageSettings,
    pub alerts: AlertConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout_secs: connection_manager::DEFAULT_TIMEOUT_SECS,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_consumers: shared_buffer::DEFAULT_MAX_CONSUMERS,
            sensor_map: PathBuf::from("room_sensor.map"),
            log_file: PathBuf::from("gateway.log"),
            storage: StorageSettings::default(),
            alerts: AlertConfig::default(),
        }
    }
}

/// Database settings as they appear in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub url: String,
    pub table: String,
    pub clear_on_start: bool,
    pub connect_retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://sensor.db".to_string(),
            table: DEFAULT_TABLE.to_string(),
            clear_on_start: true,
            connect_retries: 3,
            retry_delay_secs: 5,
        }
    }
}

impl From<&StorageSettings> for StorageConfig {
    fn from(settings: &StorageSettings) -> Self {
        StorageConfig {
            url: settings.url.clone(),
            table: settings.table.clone(),
            clear_on_start: settings.clear_on_start,
            connect_retries: settings.connect_retries,
            retry_delay: Duration::from_secs(settings.retry_delay_secs),
        }
    }
}

impl GatewayConfig {
    /// Load from `path` (if it exists) and the process environment
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, environment())
    }

    pub(crate) fn load_with(path: &Path, env: Environment) -> Result<Self, ConfigError> {
        let config: GatewayConfig = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(env)
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
            return Err(ConfigError::Message(format!(
                "timeout_secs must be between 1 and {}, got {}",
                MAX_TIMEOUT_SECS, self.timeout_secs
            )));
        }
        if self.max_consumers < 2 {
            return Err(ConfigError::Message(format!(
                "max_consumers must leave room for both consumers, got {}",
                self.max_consumers
            )));
        }
        self.alerts
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn conn_mgr_config(&self, port: u16) -> ConnMgrConfig {
        ConnMgrConfig {
            port,
            bind_address: self.bind_address,
            timeout: self.timeout(),
            ..Default::default()
        }
    }

    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            max_consumers: self.max_consumers,
        }
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig::from(&self.storage)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<config::Map<String, String>>();
        environment().source(Some(vars))
    }

    #[test]
    fn test_defaults_without_file() {
        let config = GatewayConfig::load_with(Path::new("/nonexistent/gateway.toml"), env(&[])).unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.storage_config().table, "SensorData");
        assert_eq!(config.alerts.window, 5);
    }

    #[test]
    fn test_file_then_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
timeout_secs = 8
sensor_map = "/etc/gateway/rooms.map"

[storage]
url = "sqlite::memory:"
clear_on_start = false

[alerts]
max_temp = 24.5
"#
        )
        .unwrap();

        let config = GatewayConfig::load_with(
            file.path(),
            env(&[
                ("GATEWAY_TIMEOUT_SECS", "10"),
                ("GATEWAY_STORAGE__TABLE", "readings"),
                ("GATEWAY_BIND_ADDRESS", "127.0.0.1"),
            ]),
        )
        .unwrap();

        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.sensor_map, PathBuf::from("/etc/gateway/rooms.map"));
        assert_eq!(config.storage.url, "sqlite::memory:");
        assert_eq!(config.storage.table, "readings");
        assert!(!config.storage.clear_on_start);
        assert_eq!(config.storage.connect_retries, 3);
        assert_eq!(config.alerts.max_temp, 24.5);
        assert_eq!(config.alerts.min_temp, 10.0);

        let conn = config.conn_mgr_config(1234);
        assert_eq!(conn.port, 1234);
        assert_eq!(conn.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let missing = Path::new("/nonexistent/gateway.toml");
        assert!(GatewayConfig::load_with(missing, env(&[("GATEWAY_TIMEOUT_SECS", "0")])).is_err());
        assert!(GatewayConfig::load_with(missing, env(&[("GATEWAY_MAX_CONSUMERS", "1")])).is_err());
        assert!(GatewayConfig::load_with(
            missing,
            env(&[("GATEWAY_ALERTS__MIN_TEMP", "30"), ("GATEWAY_ALERTS__MAX_TEMP", "20")])
        )
        .is_err());
        assert!(GatewayConfig::load_with(missing, env(&[("GATEWAY_TIMEOUT_SECS", "soon")])).is_err());
        assert!(GatewayConfig::load_with(
            missing,
            env(&[("GATEWAY_TIMEOUT_SECS", "18446744073709551615")])
        )
        .is_err());

        let week = MAX_TIMEOUT_SECS.to_string();
        let config = GatewayConfig::load_with(missing, env(&[("GATEWAY_TIMEOUT_SECS", week.as_str())])).unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(MAX_TIMEOUT_SECS));
    }

    #[test]
    fn test_connection_settings_deserialize_with_defaults() {
        let conn: ConnMgrConfig = Config::builder()
            .set_override("port", 4321)
            .unwrap()
            .set_override("bind_address", "127.0.0.1")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(conn.port, 4321);
        assert_eq!(conn.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(conn.timeout, ConnMgrConfig::default().timeout);
        assert_eq!(conn.read_chunk, ConnMgrConfig::default().read_chunk);
    }
}
