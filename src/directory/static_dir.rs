//! Directory backed by the `[organizations]` tables of the config file

use crate::config::{Config, OrganizationConfig};
use crate::directory::{CreatedPeer, Directory, Organization};
use crate::error::{AgentError, Result};
use crate::tunnel::PublicKey;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::info;

/// Directory that answers from local configuration
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    organizations: HashMap<String, OrganizationConfig>,
}

impl StaticDirectory {
    /// Build from a loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            organizations: config.organizations.clone(),
        }
    }

    fn organization_config(&self, slug: &str) -> Result<&OrganizationConfig> {
        self.organizations
            .get(slug)
            .ok_or_else(|| AgentError::OrganizationNotFound(slug.to_string()))
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn organizations(&self) -> Result<Vec<Organization>> {
        let mut orgs: Vec<Organization> = self
            .organizations
            .iter()
            .map(|(slug, org)| Organization {
                id: org.id.clone(),
                slug: slug.clone(),
                name: org.name.clone().unwrap_or_else(|| slug.clone()),
            })
            .collect();
        orgs.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(orgs)
    }

    async fn create_peer(
        &self,
        org: &Organization,
        region: &str,
        name: &str,
        public_key: &PublicKey,
    ) -> Result<CreatedPeer> {
        let config = self.organization_config(&org.slug)?;

        info!(
            "Registering peer '{}' in {} for {} (key {})",
            name, region, org.slug, public_key
        );

        let peer_ip: IpAddr = config.peer_ip.parse().map_err(|e| {
            AgentError::Directory(format!("bad peer_ip for {}: {}", org.slug, e))
        })?;

        let dns = config
            .dns
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|e| AgentError::Directory(format!("bad dns for {}: {}", org.slug, e)))?;

        Ok(CreatedPeer {
            peer_ip,
            endpoint: config.gateway_endpoint.clone(),
            gateway_public_key: PublicKey::from_base64(&config.gateway_public_key)?,
            dns,
        })
    }
}
