//! Node configuration.
//!
//! A [`ClusterConfig`] is read once at startup and never changes afterwards.
//! It can be built in code or parsed from TOML:
//!
//! ```toml
//! local-address = "0.0.0.0:7001"
//! master-address = "10.0.0.1:9000"
//! role = "room"
//! app-name = "lobby"
//! report-interval-ms = 1000
//! ```
//!
//! An empty `master-address` marks the master node itself, which does not
//! run a membership agent.

use std::time::Duration;

use serde::Deserialize;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An address is not of the form `host:port`.
    #[error("invalid {field} {address:?}: expected host:port")]
    InvalidAddress {
        /// Which setting.
        field: &'static str,
        /// The offending value.
        address: String,
    },

    /// An interval that drives a loop is zero.
    #[error("{field} must be greater than zero")]
    ZeroInterval {
        /// Which setting.
        field: &'static str,
    },

    /// The TOML document could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings for one node.
///
/// # Example
///
/// ```rust
/// use tidepool::config::ClusterConfig;
///
/// let config = ClusterConfig::builder()
///     .local_address("0.0.0.0:7001")
///     .master_address("10.0.0.1:9000")
///     .role("room")
///     .app_name("lobby")
///     .build()
///     .unwrap();
/// assert_eq!(config.local_port(), Some(7001));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ClusterConfig {
    local_address: String,
    master_address: String,
    role: String,
    app_name: String,
    report_interval_ms: u64,
    reconnect_delay_ms: u64,
    ready_poll_ms: u64,
    close_notice_timeout_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            local_address: String::new(),
            master_address: String::new(),
            role: String::new(),
            app_name: String::new(),
            report_interval_ms: 1000,
            reconnect_delay_ms: 500,
            ready_poll_ms: 50,
            close_notice_timeout_ms: 3000,
        }
    }
}

impl ClusterConfig {
    /// Start building a configuration.
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::default()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: ClusterConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Check addresses and intervals.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if port_of(&self.local_address).is_none() {
            return Err(ConfigError::InvalidAddress {
                field: "local-address",
                address: self.local_address.clone(),
            });
        }
        if !self.master_address.is_empty() && port_of(&self.master_address).is_none() {
            return Err(ConfigError::InvalidAddress {
                field: "master-address",
                address: self.master_address.clone(),
            });
        }
        for (field, value) in [
            ("report-interval-ms", self.report_interval_ms),
            ("reconnect-delay-ms", self.reconnect_delay_ms),
            ("ready-poll-ms", self.ready_poll_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroInterval { field });
            }
        }
        Ok(())
    }

    /// Address this node listens on.
    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    /// Port part of the listen address.
    pub fn local_port(&self) -> Option<u16> {
        port_of(&self.local_address)
    }

    /// The master's address, or `None` on the master itself.
    pub fn master_address(&self) -> Option<&str> {
        if self.master_address.is_empty() {
            None
        } else {
            Some(&self.master_address)
        }
    }

    /// This node's role.
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Application name reported in heartbeats.
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Time between heartbeats.
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    /// Delay between failed connection attempts to the master.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Polling granularity while the reporter waits for a connection.
    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms)
    }

    /// Upper bound on the close notice sent during shutdown.
    pub fn close_notice_timeout(&self) -> Duration {
        Duration::from_millis(self.close_notice_timeout_ms)
    }
}

fn port_of(address: &str) -> Option<u16> {
    address
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse::<u16>().ok())
        .filter(|port| *port != 0)
}

/// Builder for [`ClusterConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClusterConfigBuilder {
    config: ClusterConfig,
}

impl ClusterConfigBuilder {
    /// Set the listen address (`host:port`).
    pub fn local_address(mut self, address: impl Into<String>) -> Self {
        self.config.local_address = address.into();
        self
    }

    /// Set the master's address.
    pub fn master_address(mut self, address: impl Into<String>) -> Self {
        self.config.master_address = address.into();
        self
    }

    /// Set the node role.
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.config.role = role.into();
        self
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.config.app_name = name.into();
        self
    }

    /// Set the heartbeat interval.
    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.config.report_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the delay between failed connection attempts.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the readiness polling granularity.
    pub fn ready_poll(mut self, poll: Duration) -> Self {
        self.config.ready_poll_ms = poll.as_millis() as u64;
        self
    }

    /// Set the bound on the shutdown close notice.
    pub fn close_notice_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_notice_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<ClusterConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
