//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port of the control API.
    /// Override: `LANCAST_API_PORT`
    pub api_port: u16,

    /// Port of the stream proxy (0 = ephemeral).
    /// Override: `LANCAST_PROXY_PORT`
    pub proxy_port: u16,

    /// IP address to advertise to renderers in proxied stream URLs.
    /// If not specified, auto-detection will be attempted.
    /// Override: `LANCAST_ADVERTISE_IP`
    pub advertise_ip: Option<IpAddr>,

    /// IPv4 interface to send M-SEARCH from.
    pub ssdp_interface: Option<Ipv4Addr>,

    /// Start a discovery session at startup.
    pub discover_on_start: bool,

    /// Seconds between transport polls while playing.
    pub watchdog_interval_secs: u64,

    /// Consecutive non-playing polls before playback is failed.
    pub watchdog_max_failures: u32,

    /// Image served to renderers as `/logo.jpg`.
    /// Override: `LANCAST_LOGO_PATH`
    pub logo_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = lancast_core::Config::default();
        Self {
            api_port: core.api_port,
            proxy_port: core.proxy_port,
            advertise_ip: None,
            ssdp_interface: None,
            discover_on_start: true,
            watchdog_interval_secs: core.watchdog_interval_secs,
            watchdog_max_failures: core.watchdog_max_failures,
            logo_path: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Some(port) = env_parse("LANCAST_API_PORT") {
            self.api_port = port;
        }
        if let Some(port) = env_parse("LANCAST_PROXY_PORT") {
            self.proxy_port = port;
        }
        if let Some(ip) = env_parse("LANCAST_ADVERTISE_IP") {
            self.advertise_ip = Some(ip);
        }
        // LANCAST_LOGO_PATH is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to lancast-core's Config type.
    pub fn to_core_config(&self) -> lancast_core::Config {
        lancast_core::Config {
            api_port: self.api_port,
            proxy_port: self.proxy_port,
            ssdp_interface: self.ssdp_interface,
            watchdog_interval_secs: self.watchdog_interval_secs,
            watchdog_max_failures: self.watchdog_max_failures,
            ..Default::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("Ignoring invalid {}={:?}", name, value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_core() {
        let config = ServerConfig::default();
        let core = config.to_core_config();
        assert_eq!(core.api_port, 49500);
        assert_eq!(core.watchdog_interval_secs, 5);
        assert!(config.discover_on_start);
        assert!(core.validate().is_ok());
    }

    #[test]
    fn loads_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "proxy_port: 8099\nadvertise_ip: 192.168.1.20\ndiscover_on_start: false\nlogo_path: /srv/logo.png"
        )
        .unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.proxy_port, 8099);
        assert_eq!(
            config.advertise_ip,
            Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)))
        );
        assert!(!config.discover_on_start);
        assert_eq!(config.logo_path, Some(PathBuf::from("/srv/logo.png")));
        assert_eq!(config.watchdog_max_failures, 3);
        assert_eq!(config.to_core_config().proxy_port, 8099);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ServerConfig::load(Some(&dir.path().join("absent.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "api_port: [not a port]").unwrap();
        assert!(ServerConfig::load(Some(file.path())).is_err());
    }
}
