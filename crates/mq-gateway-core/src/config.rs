//! Gateway configuration.
//!
//! Configuration is read once at process start and shared as an
//! `Arc<GatewayConfig>` by the [`SessionFactory`](crate::session::SessionFactory).
//! Every field carries a default so an empty configuration describes a local
//! development queue manager.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Prefix for configuration environment variables, e.g. `MQGW__CONNECTION__CHANNEL`.
pub const ENV_PREFIX: &str = "MQGW";

/// Complete gateway configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Queue manager connection settings
    pub connection: ConnectionConfig,

    /// Queue, topic and model-queue names
    pub destinations: DestinationConfig,

    /// Capacity and threshold limits
    pub limits: LimitsConfig,

    /// Background polling cadence
    pub polling: PollingConfig,
}

impl GatewayConfig {
    /// Load configuration from files and environment.
    ///
    /// Sources, later ones overriding earlier ones:
    ///  1. `config/gateway.{yaml,toml,json}` if present
    ///  2. `explicit_path` if given (must exist)
    ///  3. Environment variables prefixed `MQGW__` with `__` separators
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/gateway").required(false));

        if let Some(path) = explicit_path {
            info!(path = %path.display(), "Loading configuration from explicit path");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        let config: GatewayConfig =
            settings
                .try_deserialize()
                .map_err(|e| ConfigurationError::Parsing {
                    message: e.to_string(),
                })?;

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the gateway cannot run with
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.connection.validate()?;
        self.destinations.validate()?;
        self.limits.validate()?;
        self.polling.validate()?;
        Ok(())
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Queue manager connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Queue manager name
    pub queue_manager: String,

    /// Listener endpoints, tried in order
    pub endpoints: Vec<Endpoint>,

    /// Server-connection channel
    pub channel: String,

    /// Application credentials
    pub credentials: Credentials,

    /// TLS settings; plain connection when absent
    pub tls: Option<TlsConfig>,
}

impl ConnectionConfig {
    /// Render the endpoint list as `host(port),host2(port2)`
    pub fn connection_name(&self) -> String {
        self.endpoints
            .iter()
            .map(Endpoint::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.queue_manager.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "connection.queue_manager".to_string(),
            });
        }

        if self.channel.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "connection.channel".to_string(),
            });
        }

        if self.endpoints.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "connection.endpoints".to_string(),
            });
        }

        for endpoint in &self.endpoints {
            if endpoint.host.trim().is_empty() {
                return Err(ConfigurationError::Invalid {
                    message: "endpoint host must not be empty".to_string(),
                });
            }
            if endpoint.port == 0 {
                return Err(ConfigurationError::Invalid {
                    message: format!("endpoint '{}' has port 0", endpoint.host),
                });
            }
        }

        if let Some(tls) = &self.tls {
            if tls.key_repository.trim().is_empty() || tls.cipher_spec.trim().is_empty() {
                return Err(ConfigurationError::Invalid {
                    message: "TLS requires both key_repository and cipher_spec".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            queue_manager: "QM1".to_string(),
            endpoints: vec![Endpoint::default()],
            channel: "DEV.APP.SVRCONN".to_string(),
            credentials: Credentials::default(),
            tls: None,
        }
    }
}

/// A queue manager listener address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1414,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.host, self.port)
    }
}

/// Application user credentials
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// Copy with the password replaced, for display
    pub fn redacted(&self) -> Self {
        Self {
            user: self.user.clone(),
            password: if self.password.is_empty() {
                String::new()
            } else {
                "<REDACTED>".to_string()
            },
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            user: "app".to_string(),
            password: String::new(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

/// TLS key repository and cipher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Key repository path stem (without extension)
    pub key_repository: String,
    pub cipher_spec: String,
}

// ============================================================================
// Destinations
// ============================================================================

/// Names of the queues, topics and models the gateway uses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    /// Queue used when a caller names none
    pub default_queue: String,

    /// Destination for messages that exceeded the backout threshold
    pub quarantine_queue: String,

    /// Prefix prepended to caller topics to form the topic string
    pub topic_prefix: String,

    /// Model queue used to create dynamic reply queues
    pub dynamic_model_queue: String,

    /// Name pattern for dynamic reply queues; `*` is replaced by the transport
    pub dynamic_queue_pattern: String,
}

impl DestinationConfig {
    /// Full topic string for a caller-supplied topic
    pub fn topic_string(&self, topic: &str) -> String {
        format!("{}{}", self.topic_prefix, topic)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        let required = [
            ("destinations.default_queue", &self.default_queue),
            ("destinations.quarantine_queue", &self.quarantine_queue),
            ("destinations.dynamic_model_queue", &self.dynamic_model_queue),
            ("destinations.dynamic_queue_pattern", &self.dynamic_queue_pattern),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigurationError::Missing {
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            default_queue: "DEV.QUEUE.1".to_string(),
            quarantine_queue: "DEV.DEAD.LETTER.QUEUE".to_string(),
            topic_prefix: "dev//".to_string(),
            dynamic_model_queue: "DEV.APP.MODEL.QUEUE".to_string(),
            dynamic_queue_pattern: "APP.REPLIES.*".to_string(),
        }
    }
}

// ============================================================================
// Limits
// ============================================================================

/// Capacity limits and thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum live façades per registry
    pub registry_capacity: usize,

    /// Maximum messages held in a subscriber stash
    pub stash_capacity: usize,

    /// Consecutive stash overflows after which a subscriber stops polling
    pub max_stash_warnings: u32,

    /// Backout count at which a failing request is quarantined
    pub backout_threshold: u32,

    /// Largest message quantity a single put, publish or request may ask for
    pub max_quantity: u32,
}

impl LimitsConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        let limits = [
            ("limits.registry_capacity", self.registry_capacity as u64),
            ("limits.stash_capacity", self.stash_capacity as u64),
            ("limits.max_stash_warnings", u64::from(self.max_stash_warnings)),
            ("limits.backout_threshold", u64::from(self.backout_threshold)),
            ("limits.max_quantity", u64::from(self.max_quantity)),
        ];
        for (key, value) in limits {
            if value == 0 {
                return Err(ConfigurationError::Invalid {
                    message: format!("{} must be greater than zero", key),
                });
            }
        }
        Ok(())
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            registry_capacity: 100,
            stash_capacity: 100,
            max_stash_warnings: 5,
            backout_threshold: 5,
            max_quantity: 1000,
        }
    }
}

// ============================================================================
// Polling
// ============================================================================

/// Poll cadence for subscribers and reply correlators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Lower bound of the randomized subscriber poll delay in milliseconds
    pub subscriber_min_delay_ms: u64,

    /// Upper bound of the randomized subscriber poll delay in milliseconds
    pub subscriber_max_delay_ms: u64,

    /// Fixed delay between reply polls in milliseconds
    pub reply_interval_ms: u64,
}

impl PollingConfig {
    pub fn subscriber_min_delay(&self) -> Duration {
        Duration::from_millis(self.subscriber_min_delay_ms)
    }

    pub fn subscriber_max_delay(&self) -> Duration {
        Duration::from_millis(self.subscriber_max_delay_ms)
    }

    pub fn reply_interval(&self) -> Duration {
        Duration::from_millis(self.reply_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.subscriber_min_delay_ms > self.subscriber_max_delay_ms {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "polling.subscriber_min_delay_ms ({}) exceeds subscriber_max_delay_ms ({})",
                    self.subscriber_min_delay_ms, self.subscriber_max_delay_ms
                ),
            });
        }

        if self.reply_interval_ms == 0 {
            return Err(ConfigurationError::Invalid {
                message: "polling.reply_interval_ms must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            subscriber_min_delay_ms: 1000,
            subscriber_max_delay_ms: 2000,
            reply_interval_ms: 5000,
        }
    }
}
