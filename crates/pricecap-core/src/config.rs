//! Controller configuration, loaded once at startup.
//!
//! Values come from built-in defaults, optionally overridden by a TOML
//! file, optionally overridden again by command-line flags.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::UNITS_PER_CPU;

/// Errors raised by [`ControllerConfig::validate`].
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("control interval must be positive, got {0}")]
    Interval(f64),

    #[error("epsilon must be a positive finite number, got {0}")]
    Epsilon(f64),

    #[error("ncpus must be at least 1")]
    NoCpus,

    #[error("max_message_size must be at least 1")]
    MessageSize,

    #[error("bridge name must not be empty")]
    EmptyBridge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// UDP port telemetry is received on.
    pub listen_port: u16,
    pub listen_address: IpAddr,
    /// Length of a control epoch in seconds.
    pub control_interval_secs: f64,
    /// Learning rate of the price update.
    pub epsilon: f64,
    /// Physical CPUs available to guests.
    pub ncpus: u32,
    /// Bridge the guests are attached to, used for address resolution.
    pub bridge: String,
    /// Domain that never takes part in allocation.
    pub privileged_domain: Option<String>,
    /// libvirt connection URI; `None` lets virsh pick its default.
    pub virsh_uri: Option<String>,
    /// Receive buffer size; longer datagrams are truncated.
    pub max_message_size: usize,
    pub arp_table: PathBuf,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen_port: 2712,
            listen_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            control_interval_secs: 5.0,
            epsilon: 0.01,
            ncpus: 4,
            bridge: "virbr0".to_string(),
            privileged_domain: Some("Domain-0".to_string()),
            virsh_uri: None,
            max_message_size: 1024,
            arp_table: PathBuf::from("/proc/net/arp"),
        }
    }
}

impl ControllerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ControllerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.control_interval_secs.is_finite() && self.control_interval_secs > 0.0) {
            return Err(ConfigError::Interval(self.control_interval_secs));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(ConfigError::Epsilon(self.epsilon));
        }
        if self.ncpus == 0 {
            return Err(ConfigError::NoCpus);
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::MessageSize);
        }
        if self.bridge.is_empty() {
            return Err(ConfigError::EmptyBridge);
        }
        Ok(())
    }

    /// Total capacity units shared among guests (100 per CPU).
    pub fn platform_size(&self) -> f64 {
        f64::from(self.ncpus) * f64::from(UNITS_PER_CPU)
    }

    pub fn control_interval(&self) -> Duration {
        Duration::from_secs_f64(self.control_interval_secs)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.listen_port)
    }
}
