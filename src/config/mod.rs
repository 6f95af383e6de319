//! Configuration management
//!
//! This module handles loading and validation of the agent configuration
//! from a TOML file. A missing file at the default location means defaults;
//! every path defaults to somewhere under `$HOME/.tunnel-agent`.

mod toml_parser;
mod validation;

pub use toml_parser::TomlConfig;

use crate::error::{AgentError, Result};
use crate::security::{sanitize_path, validate_org_slug};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Directory name under `$HOME` holding the socket, config and peer state
pub const AGENT_DIR: &str = ".tunnel-agent";

/// Main configuration structure
#[derive(Debug, Clone)]
pub struct Config {
    /// Daemon settings
    pub agent: AgentSettings,

    /// Organizations served by the static directory, keyed by slug
    pub organizations: HashMap<String, OrganizationConfig>,

    /// File this configuration was read from, if any
    pub source: Option<PathBuf>,
}

/// Daemon settings from the `[agent]` table
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Control socket path
    pub socket_path: PathBuf,

    /// Directory holding `peers.json`
    pub state_dir: PathBuf,

    /// Region new peers are registered in
    pub region: String,

    /// How long a client waits for a freshly spawned daemon
    pub spawn_timeout: Duration,

    /// Dial timeout applied when a caller doesn't pass one
    pub default_dial_timeout: Option<Duration>,
}

/// One organization as described in the config file
#[derive(Debug, Clone)]
pub struct OrganizationConfig {
    /// Directory identifier
    pub id: String,

    /// Display name
    pub name: Option<String>,

    /// WireGuard gateway endpoint (host:port)
    pub gateway_endpoint: String,

    /// Base64-encoded gateway public key
    pub gateway_public_key: String,

    /// Address assigned to the local peer
    pub peer_ip: String,

    /// Private-network DNS server
    pub dns: Option<String>,
}

impl Config {
    /// Create a configuration with default settings and no organizations
    pub fn new() -> Self {
        Self {
            agent: AgentSettings::default(),
            organizations: HashMap::new(),
            source: None,
        }
    }

    /// Load configuration from `path`, or from the default location.
    ///
    /// An explicit path must exist. The default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = default_config_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    debug!("No config at {:?}, using defaults", path);
                    Self::new()
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let toml_config = TomlConfig::from_file(path.as_ref())?;
        let mut config: Config = toml_config.into();
        config.source = Some(path.as_ref().to_path_buf());
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse(toml: &str) -> Result<Self> {
        let toml_config = TomlConfig::parse(toml)?;
        Ok(toml_config.into())
    }

    /// Add or update an organization
    pub fn add_organization(&mut self, slug: String, config: OrganizationConfig) {
        self.organizations.insert(slug, config);
    }

    /// Get an organization by slug
    pub fn get_organization(&self, slug: &str) -> Option<&OrganizationConfig> {
        self.organizations.get(slug)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        self.agent.validate()?;

        for (slug, org) in &self.organizations {
            validate_org_slug(slug)
                .and_then(|_| org.validate())
                .map_err(|e| AgentError::Config(format!("Organization '{}': {}", slug, e)))?;
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentSettings {
    /// Validate daemon settings
    pub fn validate(&self) -> Result<()> {
        for path in [&self.socket_path, &self.state_dir] {
            let as_str = path.to_str().ok_or_else(|| {
                AgentError::Config(format!("Path is not valid UTF-8: {:?}", path))
            })?;
            sanitize_path(as_str).map_err(|e| AgentError::Config(e.to_string()))?;
        }

        validation::validate_region(&self.region)?;
        validation::validate_timeout_ms("spawn_timeout_ms", self.spawn_timeout.as_millis() as u64)?;

        if let Some(timeout) = self.default_dial_timeout {
            validation::validate_timeout_ms("default_dial_timeout_ms", timeout.as_millis() as u64)?;
        }

        Ok(())
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        toml_parser::TomlAgentConfig::default().into()
    }
}

impl OrganizationConfig {
    /// Validate organization configuration
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(AgentError::Config("Organization id cannot be empty".to_string()));
        }

        validation::validate_endpoint(&self.gateway_endpoint)?;
        validation::validate_public_key(&self.gateway_public_key)?;
        validation::validate_ip_address(&self.peer_ip)?;

        if let Some(dns) = &self.dns {
            validation::validate_ip_address(dns)?;
        }

        Ok(())
    }
}

/// `$HOME/.tunnel-agent`, falling back to the temp dir when `HOME` is unset
pub fn default_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(AGENT_DIR)
}

/// Default control socket path
pub fn default_socket_path() -> PathBuf {
    default_home().join("agent.sock")
}

/// Default configuration file path
pub fn default_config_path() -> PathBuf {
    default_home().join("config.toml")
}
