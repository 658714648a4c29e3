//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RTCBRIDGE_CONFIG or --config)
//! 3. Environment variables

use rtcbridge_core::SignalingConfig;
use rtcbridge_protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Polyfill script served over plain HTTP.
    pub polyfill: PolyfillConfig,
    /// Signaling settings handed to in-process peer connections.
    pub signaling: SignalingSettings,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("RTCBRIDGE_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.polyfill.apply_env_overrides();
        self.signaling.apply_env_overrides();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.polyfill.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Seconds a client has to send its request head.
    pub handshake_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            max_connections: 64,
            handshake_timeout_secs: 10,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("RTCBRIDGE_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(max) = std::env::var("RTCBRIDGE_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }

        if let Ok(timeout) = std::env::var("RTCBRIDGE_HANDSHAKE_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.handshake_timeout_secs = secs;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the handshake timeout as Duration.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Polyfill script configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolyfillConfig {
    /// Request path answered with the script.
    pub path: String,
    /// File holding the script. Without one a stub script is served.
    #[serde(default)]
    pub script_file: Option<PathBuf>,
}

impl Default for PolyfillConfig {
    fn default() -> Self {
        Self {
            path: "/rtcbridge.js".to_string(),
            script_file: None,
        }
    }
}

impl PolyfillConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("RTCBRIDGE_POLYFILL_PATH") {
            self.path = path;
        }
        if let Ok(file) = std::env::var("RTCBRIDGE_POLYFILL_FILE") {
            self.script_file = Some(PathBuf::from(file));
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "polyfill path '{}' must start with '/'",
                self.path
            )));
        }
        Ok(())
    }

    /// Reads the configured script.
    pub fn load_script(&self) -> Result<Option<String>, ConfigError> {
        match self.script_file {
            Some(ref path) => std::fs::read_to_string(path)
                .map(Some)
                .map_err(|e| ConfigError::IoError(path.clone(), e)),
            None => Ok(None),
        }
    }
}

/// Signaling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingSettings {
    /// Milliseconds `setLocalDescription` waits for the engine.
    pub local_info_timeout_ms: u64,
}

impl Default for SignalingSettings {
    fn default() -> Self {
        Self {
            local_info_timeout_ms: 10_000,
        }
    }
}

impl SignalingSettings {
    fn apply_env_overrides(&mut self) {
        if let Ok(timeout) = std::env::var("RTCBRIDGE_LOCAL_INFO_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.local_info_timeout_ms = ms;
            }
        }
    }

    pub fn to_signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            local_info_timeout: Duration::from_millis(self.local_info_timeout_ms),
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr.port(), 10717);
        assert!(config.network.bind_addr.ip().is_loopback());
        assert_eq!(config.network.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(config.polyfill.path, "/rtcbridge.js");
        assert_eq!(
            config.signaling.to_signaling_config().local_info_timeout,
            Duration::from_secs(10)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "network:\n  bind_addr: \"0.0.0.0:9000\"\npolyfill:\n  path: /owr.js"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.network.bind_addr.port(), 9000);
        assert_eq!(config.network.max_connections, 64);
        assert_eq!(config.polyfill.path, "/owr.js");
        assert_eq!(config.signaling.local_info_timeout_ms, 10_000);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rtcbridge.yaml");

        let mut config = Config::default();
        config.network.max_connections = 3;
        config.polyfill.script_file = Some(dir.path().join("bridge.js"));
        config.save(&path).unwrap();

        let parsed = Config::from_file(&path).unwrap();
        assert_eq!(parsed.network.max_connections, 3);
        assert_eq!(parsed.polyfill.script_file, config.polyfill.script_file);
    }

    #[test]
    fn test_parse_errors_name_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "network:\n  bind_addr: not-an-address").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(..)));
        assert!(err.to_string().contains("failed to parse config file"));

        let missing = Config::from_file("/nonexistent/rtcbridge.yaml").unwrap_err();
        assert!(matches!(missing, ConfigError::IoError(..)));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.polyfill.path = "owr.js".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.network.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_script() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "window.bridge = true;").unwrap();

        let config = PolyfillConfig {
            script_file: Some(file.path().to_path_buf()),
            ..PolyfillConfig::default()
        };
        assert_eq!(
            config.load_script().unwrap().as_deref(),
            Some("window.bridge = true;")
        );
        assert_eq!(PolyfillConfig::default().load_script().unwrap(), None);
    }
}
