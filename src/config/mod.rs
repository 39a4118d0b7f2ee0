//! Configuration Management Module
//!
//! This module handles loading and managing configuration for the Letro core daemon.
//! Configuration includes the bundled server connection parameters, endpoint storage
//! location, fatal-error escalation delay and inbound acknowledgement policy.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::router::AckPolicy;

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all core settings.
///
/// This structure holds configuration for:
/// - Relay gateway bootstrap (server connection parameters, fatal-error delay)
/// - Durable endpoint storage (optional, in-memory when absent)
/// - Inbound message routing (acknowledgement policy)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Relay gateway configuration
    pub gateway: GatewayConfig,
    /// Endpoint store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Message router configuration
    #[serde(default)]
    pub router: RouterConfig,
}

/// Relay gateway bootstrap settings.
///
/// At most one of `connection_params_path` and `connection_params_base64` may be
/// set. When neither is set the daemon generates a local server identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Path to the DER-encoded server connection parameters
    #[serde(default)]
    pub connection_params_path: Option<String>,
    /// DER-encoded server connection parameters, standard base64
    #[serde(default)]
    pub connection_params_base64: Option<String>,
    /// Internet address advertised by a locally generated server identity
    #[serde(default = "default_server_internet_address")]
    pub server_internet_address: String,
    /// Delay before an asynchronous encryption failure moves the core to the fatal state
    #[serde(default = "default_fatal_error_delay_ms")]
    pub fatal_error_delay_ms: u64,
}

fn default_server_internet_address() -> String {
    "letro.localhost".to_string()
}

fn default_fatal_error_delay_ms() -> u64 {
    1000
}

impl GatewayConfig {
    pub fn fatal_error_delay(&self) -> Duration {
        Duration::from_millis(self.fatal_error_delay_ms)
    }
}

/// Endpoint store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON file holding endpoint node ids (in-memory store when absent)
    #[serde(default)]
    pub path: Option<String>,
}

/// Message router settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub ack_policy: AckPolicy,
}

impl Config {
    /// Validates the configuration.
    ///
    /// Checks that at most one connection parameters source is configured, that
    /// inline parameters are valid base64 and that the server address is printable.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Configuration is usable
    /// * `Err(anyhow::Error)` - Description of the first problem found
    pub fn validate(&self) -> anyhow::Result<()> {
        let gateway = &self.gateway;

        if gateway.connection_params_path.is_some() && gateway.connection_params_base64.is_some() {
            return Err(anyhow::anyhow!(
                "Configuration error: set either gateway.connection_params_path or gateway.connection_params_base64, not both."
            ));
        }

        if let Some(ref encoded) = gateway.connection_params_base64 {
            STANDARD.decode(encoded.trim()).map_err(|e| {
                anyhow::anyhow!(
                    "Configuration error: gateway.connection_params_base64 is not valid base64: {}",
                    e
                )
            })?;
        }

        let address = &gateway.server_internet_address;
        if address.is_empty() || !address.bytes().all(|b| (0x21..=0x7e).contains(&b)) {
            return Err(anyhow::anyhow!(
                "Configuration error: gateway.server_internet_address '{}' must be a non-empty printable ASCII domain.",
                address
            ));
        }

        if let Some(ref path) = self.store.path {
            if path.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "Configuration error: store.path is empty. Remove it to use the in-memory store."
                ));
            }
        }

        Ok(())
    }

    /// Loads configuration from file.
    ///
    /// Reads `LETRO_CONFIG_PATH` if set, otherwise `config/letro-core.toml`.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("LETRO_CONFIG_PATH")
            .unwrap_or_else(|_| "config/letro-core.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/letro-core.template.toml config/letro-core.toml\n\
                Then edit config/letro-core.toml with your actual values.",
                config_path
            ))
        }
    }

    /// Creates a default configuration for local development.
    ///
    /// Uses a generated server identity, an in-memory store and
    /// acknowledgement after processing.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self {
            gateway: GatewayConfig {
                connection_params_path: None,
                connection_params_base64: None,
                server_internet_address: default_server_internet_address(),
                fatal_error_delay_ms: default_fatal_error_delay_ms(),
            },
            store: StoreConfig::default(),
            router: RouterConfig::default(),
        }
    }
}
