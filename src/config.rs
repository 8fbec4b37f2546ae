//! # Configuration Management
//!
//! Centralized configuration for the telemetry relay.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`TELEMETRY_RELAY_*`)
//!
//! Defaults match the deployed relay: multicast group `239.255.65.56:6556`
//! with a 2 MiB receive buffer, WebSocket subscribers on port 9001, and a
//! reassembly sweep once more than 50 sets are pending.

use crate::core::reassembly::{DEFAULT_HIGH_WATER_MARK, DEFAULT_MAX_AGE};
use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default multicast group carrying the telemetry bus
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 65, 56);

/// Default multicast port
pub const DEFAULT_MULTICAST_PORT: u16 = 6556;

/// Receive buffer requested for the multicast socket (2 MiB)
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 1 << 21;

/// Largest UDP datagram we ever expect
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Channel suppressed from the single-message feed by default
pub const DEFAULT_FILTERED_CHANNEL: &str = "vicon";

/// Top-level relay configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub multicast: MulticastConfig,

    #[serde(default)]
    pub websocket: WebSocketConfig,

    #[serde(default)]
    pub reassembly: ReassemblyConfig,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub secondary: SecondaryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| RelayError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| RelayError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| RelayError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `TELEMETRY_RELAY_*` environment overrides on top of `self`
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(group) = env_parse::<Ipv4Addr>("TELEMETRY_RELAY_MULTICAST_GROUP")? {
            self.multicast.group = group;
        }
        if let Some(port) = env_parse::<u16>("TELEMETRY_RELAY_MULTICAST_PORT")? {
            self.multicast.port = port;
        }
        if let Some(size) = env_parse::<usize>("TELEMETRY_RELAY_RECV_BUFFER_SIZE")? {
            self.multicast.recv_buffer_size = size;
        }
        if let Ok(addr) = std::env::var("TELEMETRY_RELAY_WEBSOCKET_ADDRESS") {
            self.websocket.address = addr;
        }
        if let Some(mark) = env_parse::<usize>("TELEMETRY_RELAY_HIGH_WATER_MARK")? {
            self.reassembly.high_water_mark = mark;
        }
        if let Some(ms) = env_parse::<u64>("TELEMETRY_RELAY_MAX_AGE_MS")? {
            self.reassembly.max_age = Duration::from_millis(ms);
        }
        if let Ok(endpoint) = std::env::var("TELEMETRY_RELAY_SECONDARY_ENDPOINT") {
            self.secondary.enabled = true;
            self.secondary.endpoint = endpoint;
        }
        Ok(())
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.multicast.validate());
        errors.extend(self.websocket.validate());
        errors.extend(self.reassembly.validate());
        errors.extend(self.secondary.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RelayError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| RelayError::ConfigError(format!("Invalid value for {name}: '{raw}'"))),
        Err(_) => Ok(None),
    }
}

/// Multicast input configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MulticastConfig {
    /// Multicast group to join
    pub group: Ipv4Addr,

    pub port: u16,

    /// Address to bind. Defaults to the group address itself so only
    /// traffic for this group is received.
    pub bind_address: Option<Ipv4Addr>,

    /// Local interface used for group membership
    pub interface: Ipv4Addr,

    /// Requested SO_RCVBUF in bytes
    pub recv_buffer_size: usize,

    pub multicast_ttl: u32,

    /// Receive buffer used per datagram
    pub max_datagram_size: usize,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_MULTICAST_PORT,
            bind_address: None,
            interface: Ipv4Addr::UNSPECIFIED,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            multicast_ttl: 0,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

impl MulticastConfig {
    /// Socket address the listener binds to
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from((self.bind_address.unwrap_or(self.group), self.port))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.group.is_multicast() {
            errors.push(format!("Multicast group {} is not a multicast address", self.group));
        }

        if self.port == 0 {
            errors.push("Multicast port must be greater than 0".to_string());
        }

        if self.recv_buffer_size < 4096 {
            errors.push("Receive buffer too small (minimum: 4 KB)".to_string());
        } else if self.recv_buffer_size > 256 * 1024 * 1024 {
            errors.push(format!(
                "Receive buffer too large: {} bytes (maximum: 256 MB)",
                self.recv_buffer_size
            ));
        }

        if self.max_datagram_size < 20 || self.max_datagram_size > MAX_DATAGRAM_SIZE {
            errors.push(format!(
                "Invalid max datagram size: {} (valid range: 20-{MAX_DATAGRAM_SIZE})",
                self.max_datagram_size
            ));
        }

        if self.multicast_ttl > 255 {
            errors.push(format!("Multicast TTL too large: {} (maximum: 255)", self.multicast_ttl));
        }

        errors
    }
}

/// Subscriber endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Listen address (e.g., "0.0.0.0:9001")
    pub address: String,

    /// Envelopes buffered per subscriber before new ones are dropped
    pub subscriber_queue_depth: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            address: String::from("0.0.0.0:9001"),
            subscriber_queue_depth: 64,
        }
    }
}

impl WebSocketConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("WebSocket address cannot be empty".to_string());
        } else if self.address.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid WebSocket address format: '{}' (expected format: '0.0.0.0:9001')",
                self.address
            ));
        }

        if self.subscriber_queue_depth == 0 {
            errors.push("Subscriber queue depth must be greater than 0".to_string());
        } else if self.subscriber_queue_depth > 65_536 {
            errors.push(format!(
                "Subscriber queue depth too large: {} (maximum: 65536)",
                self.subscriber_queue_depth
            ));
        }

        errors
    }
}

/// Fragment reassembly configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReassemblyConfig {
    /// Pending sets above which a sweep runs
    pub high_water_mark: usize,

    /// Age past which an incomplete set is dropped
    #[serde(with = "millis_serde")]
    pub max_age: Duration,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

impl ReassemblyConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.high_water_mark == 0 {
            errors.push("High-water mark must be greater than 0".to_string());
        } else if self.high_water_mark > 100_000 {
            errors.push(format!(
                "High-water mark too large: {} (maximum: 100,000)",
                self.high_water_mark
            ));
        }

        if self.max_age.as_millis() < 10 {
            errors.push("Fragment max age too short (minimum: 10ms)".to_string());
        } else if self.max_age.as_secs() > 60 {
            errors.push("Fragment max age too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Channels suppressed from the single-message feed
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    pub suppressed_channels: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            suppressed_channels: vec![DEFAULT_FILTERED_CHANNEL.to_string()],
        }
    }
}

/// Optional pass-through pub/sub input
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecondaryConfig {
    pub enabled: bool,

    /// Endpoint to connect to (e.g., "tcp://localhost:5556")
    pub endpoint: String,
}

impl Default for SecondaryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::from("tcp://localhost:5556"),
        }
    }
}

impl SecondaryConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.enabled && self.endpoint.is_empty() {
            errors.push("Secondary endpoint cannot be empty when enabled".to_string());
        }
        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level, overridden by `RUST_LOG` when set
    #[serde(with = "level_name_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("telemetry-relay"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// `max_age` is written as whole milliseconds, e.g. `max_age = 1000`.
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(age: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(age.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `log_level` is one lowercase level name, the same spelling `RUST_LOG` uses.
mod level_name_serde {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use tracing::Level;

    pub fn serialize<S: Serializer>(level: &Level, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&level.as_str().to_ascii_lowercase())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Level, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse::<Level>().map_err(|_| {
            de::Error::custom(format!(
                "Invalid log level \"{name}\": expected trace, debug, info, warn or error"
            ))
        })
    }
}
