//! Remote directory collaborator
//!
//! The directory knows which organizations the user belongs to and hands out
//! WireGuard peer registrations for them. The agent only consumes it through
//! the [`Directory`] trait; [`StaticDirectory`] answers from the config file
//! so the daemon can run without a remote API.

mod static_dir;

pub use static_dir::StaticDirectory;

use crate::error::{AgentError, Result};
use crate::tunnel::PublicKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// An organization as known to the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    /// Directory identifier
    pub id: String,
    /// Short name used on the control socket
    pub slug: String,
    /// Display name
    pub name: String,
}

/// Gateway details returned when a peer is registered
#[derive(Debug, Clone)]
pub struct CreatedPeer {
    /// Address assigned to the new peer inside the private network
    pub peer_ip: IpAddr,
    /// Gateway endpoint (host:port)
    pub endpoint: String,
    /// Gateway public key
    pub gateway_public_key: PublicKey,
    /// Private-network DNS server
    pub dns: Option<IpAddr>,
}

/// Organization lookup and peer registration
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Directory: Send + Sync {
    /// All organizations visible to the current user
    async fn organizations(&self) -> Result<Vec<Organization>>;

    /// Register `public_key` as a new peer named `name` in `region`
    async fn create_peer(
        &self,
        org: &Organization,
        region: &str,
        name: &str,
        public_key: &PublicKey,
    ) -> Result<CreatedPeer>;
}

/// Look up an organization by slug
pub async fn find_organization(directory: &dyn Directory, slug: &str) -> Result<Organization> {
    let orgs = directory
        .organizations()
        .await
        .map_err(|e| AgentError::Directory(format!("can't load organizations: {}", e)))?;

    orgs.into_iter()
        .find(|org| org.slug == slug)
        .ok_or_else(|| AgentError::OrganizationNotFound(slug.to_string()))
}
