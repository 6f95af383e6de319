//! TOML configuration file parser
//!
//! This module handles parsing of the agent's TOML configuration file. The
//! `[agent]` table tunes the daemon itself; each `[organizations.<slug>]`
//! table describes one organization served by the bundled static directory.

use crate::config::{default_home, AgentSettings, Config, OrganizationConfig};
use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Daemon settings
    #[serde(default)]
    pub agent: TomlAgentConfig,

    /// Organizations keyed by slug
    #[serde(default)]
    pub organizations: HashMap<String, TomlOrganizationConfig>,
}

/// TOML `[agent]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlAgentConfig {
    /// Control socket path
    pub socket_path: Option<String>,

    /// Directory for persisted peer state
    pub state_dir: Option<String>,

    /// Region new peers are registered in
    #[serde(default = "default_region")]
    pub region: String,

    /// How long a client waits for a spawned daemon to answer `ping`
    #[serde(default = "default_spawn_timeout_ms")]
    pub spawn_timeout_ms: u64,

    /// Dial timeout used by `Dialer::dial` when none is given
    pub default_dial_timeout_ms: Option<u64>,
}

impl Default for TomlAgentConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            state_dir: None,
            region: default_region(),
            spawn_timeout_ms: default_spawn_timeout_ms(),
            default_dial_timeout_ms: None,
        }
    }
}

/// TOML organization table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlOrganizationConfig {
    /// Directory identifier
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// WireGuard gateway endpoint (host:port)
    pub gateway_endpoint: String,

    /// Base64-encoded gateway public key
    pub gateway_public_key: String,

    /// Address assigned to the local peer
    pub peer_ip: String,

    /// Private-network DNS server
    #[serde(default)]
    pub dns: Option<String>,
}

impl TomlConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml)
            .map_err(|e| AgentError::Config(format!("Failed to parse TOML config: {}", e)))
    }
}

impl From<TomlConfig> for Config {
    fn from(toml: TomlConfig) -> Self {
        let mut config = Config::new();
        config.agent = toml.agent.into();

        for (slug, org) in toml.organizations {
            config.add_organization(slug, org.into());
        }

        config
    }
}

impl From<TomlAgentConfig> for AgentSettings {
    fn from(toml: TomlAgentConfig) -> Self {
        let home = default_home();
        AgentSettings {
            socket_path: toml
                .socket_path
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join("agent.sock")),
            state_dir: toml.state_dir.map(PathBuf::from).unwrap_or(home),
            region: toml.region,
            spawn_timeout: Duration::from_millis(toml.spawn_timeout_ms),
            default_dial_timeout: toml.default_dial_timeout_ms.map(Duration::from_millis),
        }
    }
}

impl From<TomlOrganizationConfig> for OrganizationConfig {
    fn from(toml: TomlOrganizationConfig) -> Self {
        OrganizationConfig {
            id: toml.id,
            name: toml.name,
            gateway_endpoint: toml.gateway_endpoint,
            gateway_public_key: toml.gateway_public_key,
            peer_ip: toml.peer_ip,
            dns: toml.dns,
        }
    }
}

pub(crate) fn default_region() -> String {
    "iad".to_string()
}

pub(crate) fn default_spawn_timeout_ms() -> u64 {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [agent]
            socket_path = "/tmp/agent-test/agent.sock"
            state_dir = "/tmp/agent-test"
            region = "syd"
            spawn_timeout_ms = 2000
            default_dial_timeout_ms = 1500

            [organizations.acme]
            id = "org-1"
            name = "Acme Corp"
            gateway_endpoint = "gw.example.com:51820"
            gateway_public_key = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOP=="
            peer_ip = "fdaa:0:1:a7b::2"
            dns = "fdaa:0:1::3"
        "#;

        let config = TomlConfig::parse(toml).expect("Failed to parse TOML");
        assert_eq!(config.agent.region, "syd");
        assert_eq!(config.agent.default_dial_timeout_ms, Some(1500));
        assert!(config.organizations.contains_key("acme"));

        let config: Config = config.into();
        assert_eq!(
            config.agent.socket_path,
            PathBuf::from("/tmp/agent-test/agent.sock")
        );
        assert_eq!(config.agent.spawn_timeout, Duration::from_millis(2000));

        let acme = config.get_organization("acme").unwrap();
        assert_eq!(acme.id, "org-1");
        assert_eq!(acme.dns.as_deref(), Some("fdaa:0:1::3"));
    }

    #[test]
    fn test_parse_with_defaults() {
        let config = TomlConfig::parse("").expect("Failed to parse TOML");
        assert_eq!(config.agent.region, "iad");
        assert_eq!(config.agent.spawn_timeout_ms, 5000);
        assert!(config.agent.socket_path.is_none());
        assert!(config.organizations.is_empty());
    }

    #[test]
    fn test_organizations_without_agent_table() {
        let toml = r#"
            [organizations.acme]
            id = "org-1"
            gateway_endpoint = "gw.example.com:51820"
            gateway_public_key = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOP=="
            peer_ip = "10.0.0.2"
        "#;

        let config: Config = TomlConfig::parse(toml).unwrap().into();
        assert_eq!(config.agent.region, "iad");
        assert_eq!(config.agent.spawn_timeout, Duration::from_millis(5000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_organization_requires_gateway() {
        let toml = r#"
            [organizations.acme]
            id = "org-1"
            peer_ip = "10.0.0.2"
        "#;

        assert!(TomlConfig::parse(toml).is_err());
    }
}
