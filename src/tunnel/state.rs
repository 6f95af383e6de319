//! Persisted WireGuard peer registrations
//!
//! Registering a peer with the directory is not free (each one occupies an
//! address in the organization's network), so the first registration for an
//! organization is saved and reused by every later daemon.

use crate::directory::{Directory, Organization};
use crate::error::{AgentError, Result};
use crate::security::{ensure_private_dir, validate_file_permissions, SecureFileMode};
use crate::tunnel::{KeyPair, PublicKey, TunnelConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::net::IpAddr;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// File name of the peer state inside the state directory
pub const PEER_STATE_FILE: &str = "peers.json";

const DEFAULT_MTU: u16 = 1420;
const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(25);

/// One organization's peer registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerState {
    /// Organization slug
    pub org: String,
    /// Peer name registered with the directory
    pub name: String,
    /// Region the peer was registered in
    pub region: String,
    /// Local key pair
    pub keypair: KeyPair,
    /// Address assigned to this peer
    pub peer_ip: IpAddr,
    /// Gateway endpoint (host:port)
    pub endpoint: String,
    /// Gateway public key
    pub gateway_public_key: PublicKey,
    /// Private-network DNS server
    #[serde(default)]
    pub dns: Option<IpAddr>,
}

impl PeerState {
    /// Build the provider configuration for this peer
    pub fn tunnel_config(&self) -> TunnelConfig {
        TunnelConfig {
            keypair: self.keypair.clone(),
            local_address: self.peer_ip,
            dns: self.dns,
            endpoint: self.endpoint.clone(),
            gateway_public_key: self.gateway_public_key.clone(),
            keepalive: DEFAULT_KEEPALIVE,
            mtu: DEFAULT_MTU,
        }
    }
}

/// Peer states keyed by organization slug
#[derive(Debug)]
pub struct PeerStateStore {
    path: Option<PathBuf>,
    states: BTreeMap<String, PeerState>,
}

impl PeerStateStore {
    /// Open (or create) the store under `state_dir`
    pub fn open(state_dir: &Path) -> Result<Self> {
        ensure_private_dir(state_dir)?;
        let path = state_dir.join(PEER_STATE_FILE);

        let states = if path.exists() {
            validate_file_permissions(&path, SecureFileMode::PeerState)?;
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            BTreeMap::new()
        };

        debug!("Loaded {} peer state(s) from {:?}", states.len(), path);

        Ok(Self {
            path: Some(path),
            states,
        })
    }

    /// A store that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            path: None,
            states: BTreeMap::new(),
        }
    }

    /// Stored state for `org`, if any
    pub fn get(&self, org: &str) -> Option<&PeerState> {
        self.states.get(org)
    }

    /// Number of stored registrations
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Return the stored registration for `org`, registering a new peer
    /// with `directory` when there is none.
    ///
    /// Empty `region` or `name` fall back to `default_region` and a
    /// generated interactive peer name.
    pub async fn state_for_org(
        &mut self,
        directory: &dyn Directory,
        org: &Organization,
        region: &str,
        name: &str,
        default_region: &str,
    ) -> Result<PeerState> {
        if let Some(state) = self.states.get(&org.slug) {
            debug!("Reusing peer '{}' for {}", state.name, org.slug);
            return Ok(state.clone());
        }

        let region = if region.is_empty() { default_region } else { region };
        let name = if name.is_empty() {
            interactive_peer_name()
        } else {
            name.to_string()
        };

        let keypair = KeyPair::generate();
        let created = directory
            .create_peer(org, region, &name, &keypair.public)
            .await
            .map_err(|e| {
                AgentError::Directory(format!("can't register peer for {}: {}", org.slug, e))
            })?;

        info!(
            "Registered peer '{}' ({}) in {} for {}",
            name, created.peer_ip, region, org.slug
        );

        let state = PeerState {
            org: org.slug.clone(),
            name,
            region: region.to_string(),
            keypair,
            peer_ip: created.peer_ip,
            endpoint: created.endpoint,
            gateway_public_key: created.gateway_public_key,
            dns: created.dns,
        };

        self.states.insert(org.slug.clone(), state.clone());
        self.save().await?;

        Ok(state)
    }

    async fn save(&self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        let json = serde_json::to_vec_pretty(&self.states)?;
        tokio::task::spawn_blocking(move || write_private(&path, &json))
            .await
            .map_err(|e| AgentError::Config(format!("Peer state writer failed: {}", e)))?
    }
}

/// Replace `path` with `contents` through a 0600 temp file and a rename
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");

    // Create file with restricted permissions from the start
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&tmp)
        .map_err(|e| AgentError::Config(format!("Failed to create {:?}: {}", tmp, e)))?;

    file.write_all(contents)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;

    Ok(())
}

/// `interactive-<host>-<user>-<n>`
fn interactive_peer_name() -> String {
    let host = hostname().unwrap_or_else(|| "unknown".to_string());
    let user = std::env::var("USER").unwrap_or_else(|_| "user".to_string());
    let suffix: u16 = rand::random();

    format!("interactive-{}-{}-{}", host, user, suffix)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

fn hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return None;
    }

    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..len]);
    let short = name.split('.').next().unwrap_or_default();
    (!short.is_empty()).then(|| short.to_string())
}
