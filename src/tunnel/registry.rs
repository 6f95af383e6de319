//! Tunnel registry
//!
//! Maps organization slugs to established tunnels. Establishment holds the
//! registry lock for its whole duration, directory and provider calls
//! included, so establishments for different organizations run one at a
//! time. It is a rare, interactive operation and this keeps "at most one
//! tunnel per organization" trivially true.

use crate::directory::{find_organization, Directory, Organization};
use crate::error::{AgentError, Result};
use crate::tunnel::provider::{resolve_addr, BoxedStream, TunnelProvider, TunnelSession};
use crate::tunnel::state::PeerStateStore;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// An established tunnel into one organization's private network
pub struct Tunnel {
    org: Organization,
    peer_ip: IpAddr,
    session: Arc<dyn TunnelSession>,
}

impl Tunnel {
    /// Organization this tunnel belongs to
    pub fn org(&self) -> &Organization {
        &self.org
    }

    /// Our address inside the private network
    pub fn peer_ip(&self) -> IpAddr {
        self.peer_ip
    }

    /// The provider session
    pub fn session(&self) -> &dyn TunnelSession {
        self.session.as_ref()
    }

    /// Resolve `host:port` through the tunnel's resolver
    pub async fn resolve(&self, addr: &str) -> Result<SocketAddr> {
        resolve_addr(self.session.as_ref(), addr).await
    }

    /// Dial `addr` inside the tunnel
    pub async fn dial(&self, addr: SocketAddr) -> Result<BoxedStream> {
        self.session.dial(addr).await
    }
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("org", &self.org.slug)
            .field("peer_ip", &self.peer_ip)
            .finish()
    }
}

struct RegistryInner {
    tunnels: HashMap<String, Arc<Tunnel>>,
    peers: PeerStateStore,
}

/// Registry of established tunnels, one per organization
pub struct TunnelRegistry {
    inner: Mutex<RegistryInner>,
    directory: Arc<dyn Directory>,
    provider: Arc<dyn TunnelProvider>,
    region: String,
}

impl TunnelRegistry {
    /// Create an empty registry
    pub fn new(
        directory: Arc<dyn Directory>,
        provider: Arc<dyn TunnelProvider>,
        peers: PeerStateStore,
        region: String,
    ) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                tunnels: HashMap::new(),
                peers,
            }),
            directory,
            provider,
            region,
        }
    }

    /// Establish the tunnel for `slug`, or return the existing one.
    ///
    /// On any failure the registry is left exactly as it was.
    pub async fn establish(&self, slug: &str) -> Result<Arc<Tunnel>> {
        let mut inner = self.inner.lock().await;

        if let Some(tunnel) = inner.tunnels.get(slug) {
            debug!("Tunnel for {} already established", slug);
            return Ok(tunnel.clone());
        }

        info!("Establishing tunnel for {}", slug);

        let org = find_organization(self.directory.as_ref(), slug).await?;

        let state = inner
            .peers
            .state_for_org(self.directory.as_ref(), &org, "", "", &self.region)
            .await?;

        let session = self
            .provider
            .connect(&state.tunnel_config())
            .await
            .map_err(|e| {
                error!("Tunnel for {} failed: {}", slug, e);
                AgentError::TunnelEstablish {
                    org: slug.to_string(),
                    reason: e.to_string(),
                }
            })?;

        let tunnel = Arc::new(Tunnel {
            org,
            peer_ip: state.peer_ip,
            session,
        });
        inner.tunnels.insert(slug.to_string(), tunnel.clone());

        info!("Tunnel for {} established ({})", slug, state.peer_ip);
        Ok(tunnel)
    }

    /// The established tunnel for `slug`
    pub async fn tunnel_for(&self, slug: &str) -> Result<Arc<Tunnel>> {
        let inner = self.inner.lock().await;
        inner
            .tunnels
            .get(slug)
            .cloned()
            .ok_or_else(|| AgentError::NoTunnel(slug.to_string()))
    }

    /// Whether a tunnel exists for `slug`
    pub async fn contains(&self, slug: &str) -> bool {
        self.inner.lock().await.tunnels.contains_key(slug)
    }

    /// Number of established tunnels
    pub async fn len(&self) -> usize {
        self.inner.lock().await.tunnels.len()
    }

    /// Whether no tunnel is established
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Slugs with an established tunnel, sorted
    pub async fn organizations(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut slugs: Vec<String> = inner.tunnels.keys().cloned().collect();
        slugs.sort();
        slugs
    }
}
