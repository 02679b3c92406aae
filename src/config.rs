//! Configuration file support for the Squid exporter.
//!
//! Loads settings from `~/.config/squid-exporter/config.toml` on Linux
//! (or platform-appropriate location on other OSes), or from an explicit path.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::{CONNECT_TIMEOUT, ClientConfig, READ_TIMEOUT, SQUID_HOST, SQUID_PORT};

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Squid hostname.
    pub hostname: String,

    /// Squid port.
    pub port: u16,

    /// Cache manager login; empty disables authentication.
    pub login: String,

    /// Cache manager password.
    pub password: String,

    /// Extra request header lines, e.g. `"X-Forwarded-For: 10.0.0.1"`.
    pub headers: Vec<String>,

    /// Whether to fetch the `service_times` report.
    pub extract_times: bool,

    /// Connection timeout in seconds.
    pub connect_timeout: u64,

    /// Read timeout in seconds.
    pub read_timeout: u64,

    /// Address the metrics server binds to.
    pub listen_address: IpAddr,

    /// Port the metrics server binds to.
    pub listen_port: u16,

    /// Path the metrics are served under.
    pub metrics_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: SQUID_HOST.to_string(),
            port: SQUID_PORT,
            login: String::new(),
            password: String::new(),
            headers: Vec::new(),
            extract_times: true,
            connect_timeout: CONNECT_TIMEOUT.as_secs(),
            read_timeout: READ_TIMEOUT.as_secs(),
            listen_address: IpAddr::from([0, 0, 0, 0]),
            listen_port: 9301,
            metrics_path: "/metrics".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file location.
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but is malformed.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Config::default()),
        }
    }

    /// Load configuration from an explicit path, which must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Returns the path to the config file.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("squid-exporter/config.toml"))
    }

    /// Validate all configuration settings.
    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            bail!("hostname must not be empty");
        }
        if self.port == 0 {
            bail!("port must be non-zero");
        }
        if self.listen_port == 0 {
            bail!("listen_port must be non-zero");
        }
        if self.connect_timeout == 0 || self.read_timeout == 0 {
            bail!("timeouts must be at least one second");
        }
        if !self.metrics_path.starts_with('/') {
            bail!("metrics_path must start with '/': {:?}", self.metrics_path);
        }
        for (i, header) in self.headers.iter().enumerate() {
            if header.contains(['\r', '\n']) {
                bail!("Invalid header [{}]: contains a line break", i);
            }
            if !header.contains(':') {
                bail!("Invalid header [{}]: missing ':' in {:?}", i, header);
            }
        }
        Ok(())
    }

    /// Client settings for the cache manager connection.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::default()
            .with_server(self.hostname.clone(), self.port)
            .with_credentials(self.login.clone(), self.password.clone());
        for header in &self.headers {
            config = config.with_header(header.clone());
        }
        config.connect_timeout = Duration::from_secs(self.connect_timeout);
        config.read_timeout = Duration::from_secs(self.read_timeout);
        config
    }

    /// Address the metrics server binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.listen_port)
    }
}
