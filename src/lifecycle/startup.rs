//! Startup orchestration.
//!
//! # Responsibilities
//! - Load configuration and apply command-line overrides
//! - Validate the merged result
//! - Bind the listener
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Overrides are applied before validation so a bad flag is reported like a bad file
//! - Listeners start last (traffic only when ready)

use std::path::Path;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::ProxyConfig;
use crate::config::validation::validate_config;
use crate::net::listener::{Listener, ListenerError};

/// Values given on the command line that replace file settings.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
}

impl Overrides {
    /// Write every present override into `config`.
    pub fn apply(&self, config: &mut ProxyConfig) {
        if let Some(host) = &self.host {
            config.listener.host = host.clone();
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
    }
}

/// Build the effective configuration.
///
/// Without a file the defaults are used. The result is validated after
/// overrides have been applied.
pub fn resolve_config(path: Option<&Path>, overrides: &Overrides) -> Result<ProxyConfig, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    overrides.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Bind the listener described by `config`, logging a failure.
pub async fn bind_listener(config: &ProxyConfig) -> Result<Listener, ListenerError> {
    Listener::bind(&config.listener).await.inspect_err(|e| {
        tracing::error!(
            address = %config.listener.bind_address(),
            error = %e,
            "Failed to bind listener"
        );
    })
}
