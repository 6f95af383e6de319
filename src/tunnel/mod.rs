//! Tunnel management
//!
//! This module handles peer key generation, persisted peer registrations,
//! the tunnel provider seam and the registry of established tunnels.

mod keys;
mod provider;
mod registry;
mod state;

pub use keys::{KeyPair, PrivateKey, PublicKey};
pub use provider::{
    resolve_addr, split_host_port, BoxedStream, HostNetworkProvider, HostSession, TunnelConfig,
    TunnelProvider, TunnelSession, TunnelStream,
};
#[cfg(test)]
pub use provider::{MockTunnelProvider, MockTunnelSession};
pub use registry::{Tunnel, TunnelRegistry};
pub use state::{PeerState, PeerStateStore, PEER_STATE_FILE};
