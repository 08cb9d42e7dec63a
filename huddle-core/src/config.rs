use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use huddle_sfu::SfuConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub webrtc: SfuConfig,
    pub signaling: SignalingConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Capacity of each participant's outbound message queue
    pub outbound_buffer: usize,
    /// Largest accepted inbound frame, in bytes
    pub max_message_size: usize,
    /// 0 = unlimited
    pub max_rooms: usize,
    /// 0 = unlimited
    pub max_participants_per_room: usize,
    /// Seconds of client silence before the participant is dropped; 0 = never
    pub idle_timeout_secs: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
            max_message_size: 64 * 1024,
            max_rooms: 0,
            max_participants_per_room: 0,
            idle_timeout_secs: 0,
        }
    }
}

impl SignalingConfig {
    #[must_use]
    pub const fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_secs))
        }
    }
}

/// Per-client request quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteQuota {
    pub per_minute: u32,
    pub burst: u32,
}

impl RouteQuota {
    #[must_use]
    pub const fn new(per_minute: u32, burst: u32) -> Self {
        Self { per_minute, burst }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub create_room: RouteQuota,
    pub room_info: RouteQuota,
    pub websocket: RouteQuota,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            create_room: RouteQuota::new(5, 1),
            room_info: RouteQuota::new(10, 2),
            websocket: RouteQuota::new(3, 1),
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. `PORT` (server port only)
    /// 2. Environment variables (`HUDDLE_SERVER__HOST`, `HUDDLE_SIGNALING__MAX_ROOMS`, ...)
    /// 3. Config file (if provided and present)
    /// 4. Defaults
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("HUDDLE")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("webrtc.stun_servers")
                .try_parsing(true),
        );

        let mut config: Self = builder.build()?.try_deserialize()?;
        config.apply_port_override(std::env::var("PORT").ok().as_deref())?;
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    fn apply_port_override(&mut self, port: Option<&str>) -> Result<(), ConfigError> {
        let Some(port) = port.map(str::trim).filter(|p| !p.is_empty()) else {
            return Ok(());
        };
        self.server.port = port
            .parse()
            .map_err(|_| ConfigError::Message(format!("invalid PORT value: {port}")))?;
        Ok(())
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Check the configuration, returning every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.host.trim().is_empty() {
            errors.push("server.host must not be empty".to_string());
        }

        if crate::logging::parse_log_level(&self.logging.level).is_err() {
            errors.push(format!("logging.level is invalid: {}", self.logging.level));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            errors.push(format!(
                "logging.format must be 'pretty' or 'json', got '{}'",
                self.logging.format
            ));
        }

        for url in &self.webrtc.stun_servers {
            if !(url.starts_with("stun:") || url.starts_with("stuns:")) {
                errors.push(format!("webrtc.stun_servers entry is not a STUN URL: {url}"));
            }
        }

        if self.signaling.outbound_buffer == 0 {
            errors.push("signaling.outbound_buffer must be greater than 0".to_string());
        }
        if self.signaling.max_message_size < 1024 {
            errors.push("signaling.max_message_size must be at least 1024 bytes".to_string());
        }

        if self.rate_limit.enabled {
            for (name, quota) in [
                ("create_room", self.rate_limit.create_room),
                ("room_info", self.rate_limit.room_info),
                ("websocket", self.rate_limit.websocket),
            ] {
                if quota.per_minute == 0 || quota.burst == 0 {
                    errors.push(format!(
                        "rate_limit.{name} needs per_minute and burst greater than 0"
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Load and validate configuration.
///
/// Config file search order:
/// 1. `explicit_path` (command line)
/// 2. `HUDDLE_CONFIG_PATH` environment variable
/// 3. ./config.yaml
/// 4. Environment variables only
pub fn load_config(explicit_path: Option<&str>) -> anyhow::Result<Config> {
    let config_path = explicit_path
        .map(ToString::to_string)
        .or_else(|| std::env::var("HUDDLE_CONFIG_PATH").ok())
        .filter(|p| Path::new(p).exists())
        .or_else(|| {
            let cwd = "config.yaml";
            Path::new(cwd).exists().then(|| cwd.to_string())
        });

    let config = match config_path.as_deref() {
        Some(path) => {
            eprintln!("Loading config from {path}");
            Config::load(Some(path))?
        }
        None => Config::from_env()?,
    };

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    info!("Configuration loaded and validated successfully");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.http_address(), "0.0.0.0:8080");
        assert_eq!(config.rate_limit.create_room, RouteQuota::new(5, 1));
        assert_eq!(config.rate_limit.room_info, RouteQuota::new(10, 2));
        assert_eq!(config.rate_limit.websocket, RouteQuota::new(3, 1));
        assert!(config.signaling.idle_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_override() {
        let mut config = Config::default();
        config.apply_port_override(Some("9090")).unwrap();
        assert_eq!(config.server.port, 9090);

        config.apply_port_override(Some("")).unwrap();
        assert_eq!(config.server.port, 9090);

        assert!(config.apply_port_override(Some("http")).is_err());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        config.signaling.outbound_buffer = 0;
        config.webrtc.stun_servers = vec!["http://example.com".to_string()];

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  host: 127.0.0.1\nsignaling:\n  max_rooms: 4\n  idle_timeout_secs: 30\n"
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.signaling.max_rooms, 4);
        assert_eq!(
            config.signaling.idle_timeout(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.signaling.outbound_buffer, 256);
    }
}
