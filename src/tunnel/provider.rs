//! Tunnel provider collaborator
//!
//! A [`TunnelProvider`] turns a [`TunnelConfig`] into a live
//! [`TunnelSession`]: something that can resolve names inside the private
//! network and open TCP connections scoped to it. The WireGuard data plane
//! itself lives behind this trait.

use crate::error::{AgentError, Result};
use crate::tunnel::{KeyPair, PublicKey};
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// Byte stream returned by a session dial
pub trait TunnelStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> TunnelStream for T {}

/// Owned, type-erased tunnel stream
pub type BoxedStream = Box<dyn TunnelStream>;

/// Everything a provider needs to bring up one organization's tunnel
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Local key pair
    pub keypair: KeyPair,
    /// Address of the local peer inside the private network
    pub local_address: IpAddr,
    /// Private-network DNS server
    pub dns: Option<IpAddr>,
    /// Gateway endpoint (host:port)
    pub endpoint: String,
    /// Gateway public key
    pub gateway_public_key: PublicKey,
    /// Persistent keepalive interval
    pub keepalive: Duration,
    /// MTU value
    pub mtu: u16,
}

impl TunnelConfig {
    /// Validate the tunnel configuration
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(AgentError::Config(
                "Gateway endpoint cannot be empty".to_string(),
            ));
        }

        if !(1280..=1500).contains(&self.mtu) {
            return Err(AgentError::Config(format!(
                "MTU {} is out of valid range (1280-1500)",
                self.mtu
            )));
        }

        Ok(())
    }
}

/// A live tunnel session
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TunnelSession: Send + Sync {
    /// Resolve `host` through the session's resolver
    async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>>;

    /// Open a TCP connection to `addr` through the session
    async fn dial(&self, addr: SocketAddr) -> Result<BoxedStream>;
}

/// Opens tunnel sessions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Bring up a session for `config`
    async fn connect(&self, config: &TunnelConfig) -> Result<Arc<dyn TunnelSession>>;
}

/// Resolve `addr` (`host:port`) to a socket address.
///
/// Literal IPs are used as-is; hostnames go through `session`. The first
/// address returned by the resolver wins.
pub async fn resolve_addr(session: &dyn TunnelSession, addr: &str) -> Result<SocketAddr> {
    let (host, port) = split_host_port(addr)?;

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let addrs = session
        .lookup_host(host)
        .await
        .map_err(|e| AgentError::Resolve {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

    let ip = addrs.first().copied().ok_or_else(|| AgentError::Resolve {
        host: host.to_string(),
        reason: "no addresses found".to_string(),
    })?;

    debug!("Resolved {} to {}", host, ip);
    Ok(SocketAddr::new(ip, port))
}

/// Split `host:port`. IPv6 hosts must be bracketed (`[fdaa::3]:22`).
pub fn split_host_port(addr: &str) -> Result<(&str, u16)> {
    let (host, port) = match addr.strip_prefix('[') {
        Some(rest) => rest
            .split_once("]:")
            .ok_or_else(|| AgentError::Protocol(format!("missing port in address {}", addr)))?,
        None => {
            let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
                AgentError::Protocol(format!("missing port in address {}", addr))
            })?;
            if host.contains(':') {
                return Err(AgentError::Protocol(format!(
                    "too many colons in address {}",
                    addr
                )));
            }
            (host, port)
        }
    };

    if host.is_empty() {
        return Err(AgentError::Protocol(format!("missing host in address {}", addr)));
    }

    let port = port
        .parse::<u16>()
        .map_err(|e| AgentError::Protocol(format!("invalid port in address {}: {}", addr, e)))?;

    Ok((host, port))
}

/// Provider whose sessions use the host's own resolver and TCP stack.
///
/// It performs no encryption; it stands in wherever a private network is
/// already routable from this machine.
#[derive(Debug, Clone, Default)]
pub struct HostNetworkProvider;

#[async_trait]
impl TunnelProvider for HostNetworkProvider {
    async fn connect(&self, config: &TunnelConfig) -> Result<Arc<dyn TunnelSession>> {
        config.validate()?;
        debug!(
            "Host network session for {} via {}",
            config.local_address, config.endpoint
        );
        Ok(Arc::new(HostSession))
    }
}

/// Session on the host network stack
#[derive(Debug, Clone, Default)]
pub struct HostSession;

#[async_trait]
impl TunnelSession for HostSession {
    async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }

    async fn dial(&self, addr: SocketAddr) -> Result<BoxedStream> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| AgentError::Dial(format!("dial tcp {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
