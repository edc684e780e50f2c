use crate::logging::{LogConfig, LogFormat, LogLevel};
use crate::registry::BootstrapConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Well-known name the host service is published under.
pub const DEFAULT_SERVICE_NAME: &str = "PerfStatRemoteHost";

/// Default registry port.
pub const DEFAULT_REGISTRY_PORT: u16 = 1099;

/// Daemon configuration.
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct DaemonConfig {
    /// Name (or `//host:port/name` URL) the host service is bound under.
    pub service_name: String,
    pub registry_port: u16,
    /// Create a registry in-process when none is listening.
    pub auto_create_registry: bool,
    pub registry_host: String,
    /// Port for the host service. 0 picks an ephemeral port.
    pub host_port: u16,
    /// Port for the session endpoint. 0 picks an ephemeral port.
    pub session_port: u16,
    pub bind_address: IpAddr,
    /// Host name put in advertised endpoints. Defaults to the machine's
    /// host name.
    pub advertise_host: Option<String>,
    /// Directory holding `hsperfdata_*` directories. Defaults to the system
    /// temp dir.
    pub perfdata_root: Option<PathBuf>,
    pub poll_interval_ms: u64,
    /// Idle time after which an exported session is reclaimed. 0 disables.
    pub session_lease_secs: u64,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
    pub log_to_file: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            registry_port: DEFAULT_REGISTRY_PORT,
            auto_create_registry: true,
            registry_host: "127.0.0.1".to_string(),
            host_port: 0,
            session_port: 0,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertise_host: None,
            perfdata_root: None,
            poll_interval_ms: 1000,
            session_lease_secs: 600,
            log_level: LogLevel::Info,
            log_format: LogFormat::Human,
            log_to_file: false,
        }
    }
}

impl DaemonConfig {
    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, `~/.perfstatd/config.yaml`
    /// is used when present, otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match crate::paths::default_config_path().filter(|p| p.exists()) {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            anyhow::bail!("service_name must not be empty");
        }

        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }

        if self.registry_port == 0 {
            anyhow::bail!("registry_port must be a fixed port");
        }

        Ok(())
    }

    pub fn perfdata_root(&self) -> PathBuf {
        self.perfdata_root
            .clone()
            .unwrap_or_else(crate::paths::default_perfdata_root)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn session_lease(&self) -> Duration {
        Duration::from_secs(self.session_lease_secs)
    }

    /// Host name published in endpoints handed to remote callers.
    pub fn advertised_host(&self) -> String {
        self.advertise_host
            .clone()
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned())
    }

    pub fn bootstrap_config(&self) -> BootstrapConfig {
        BootstrapConfig {
            registry_host: self.registry_host.clone(),
            registry_port: self.registry_port,
            auto_create_registry: self.auto_create_registry,
        }
    }

    pub fn log_config(&self) -> Result<LogConfig> {
        let file = if self.log_to_file {
            Some(crate::paths::daemon_log_path()?)
        } else {
            None
        };
        Ok(LogConfig {
            level: self.log_level,
            format: self.log_format,
            file,
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
