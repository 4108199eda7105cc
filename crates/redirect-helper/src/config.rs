//! Configuration types and loading logic.

use std::path::PathBuf;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use redirect_tracing::TracingConfig;
use serde::{Deserialize, Serialize};

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Where the JSON document lives.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Listen port. When unset, the port saved in the store document is used.
    #[serde(default)]
    pub port: Option<u16>,
}

/// Values given on the command line; they win over file and environment.
#[derive(Debug, Default, Serialize)]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreOverride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<PortOverride>,
}

#[derive(Debug, Serialize)]
pub struct StoreOverride {
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct PortOverride {
    pub port: u16,
}

impl CliOverrides {
    pub fn new(store_path: Option<PathBuf>, port: Option<u16>) -> Self {
        Self {
            store: store_path.map(|path| StoreOverride { path }),
            server: port.map(|port| PortOverride { port }),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./redirect_helper.json")
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: None,
        }
    }
}

impl ServerConfig {
    /// `host:port` to bind, taking the port from the store when not configured.
    pub fn listen_address(&self, stored_port: u16) -> String {
        format!("{}:{}", self.bind_address, self.port.unwrap_or(stored_port))
    }
}

impl AppConfig {
    /// Load configuration from TOML file, environment variables and CLI flags.
    ///
    /// Priority (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables (REDIRECT_ prefix, __ for nesting)
    /// 3. TOML config file (optional)
    /// 4. Defaults
    pub fn load(config_path: &str, overrides: &CliOverrides) -> anyhow::Result<Self> {
        Ok(Self::figment(config_path, overrides).extract()?)
    }

    fn figment(config_path: &str, overrides: &CliOverrides) -> Figment {
        Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("REDIRECT_").split("__"))
            .merge(Serialized::defaults(overrides))
    }
}
