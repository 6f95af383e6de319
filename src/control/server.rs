//! Control server on a Unix socket
//!
//! This module owns the socket lifecycle: it evicts a daemon already bound
//! to the path, clears stale socket files, binds with owner-only
//! permissions and runs the accept loop until shutdown is requested.

use crate::client::AgentClient;
use crate::control::CommandHandler;
use crate::error::{AgentError, Result};
use crate::security::{ensure_private_dir, set_secure_permissions, SecureFileMode};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

/// How long to wait for an evicted daemon to let go of the socket
const EVICT_TIMEOUT: Duration = Duration::from_secs(2);

/// Control server manages the control socket
pub struct ControlServer {
    listener: UnixListener,
    socket: SocketFile,
    handler: Arc<CommandHandler>,
}

impl ControlServer {
    /// Bind the control socket at `socket_path`.
    ///
    /// A daemon already answering there is asked to terminate first.
    pub async fn bind(socket_path: &Path, handler: Arc<CommandHandler>) -> Result<Self> {
        evict_running_daemon(socket_path).await;
        remove_socket(socket_path)?;

        if let Some(parent) = socket_path.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_private_dir(parent)?;
            }
        }

        let listener = UnixListener::bind(socket_path)
            .map_err(|e| AgentError::Bind(format!("{:?}: {}", socket_path, e)))?;
        let socket = SocketFile::track(socket_path)?;
        set_secure_permissions(socket_path, SecureFileMode::Socket)?;

        info!("Control server listening at {:?}", socket_path);

        Ok(Self {
            listener,
            socket,
            handler,
        })
    }

    /// Path of the bound socket
    pub fn socket_path(&self) -> &Path {
        &self.socket.path
    }

    /// Accept connections until the handler requests shutdown.
    ///
    /// The socket file is removed when this returns.
    pub async fn serve(self) -> Result<()> {
        let mut shutdown = self.handler.subscribe_shutdown();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let handler = self.handler.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handler.handle_connection(stream).await {
                                debug!("Control connection ended with error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept control connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }

        info!("Control server at {:?} stopped", self.socket.path);
        Ok(())
    }
}

/// Remove a stale socket file at `path`.
///
/// Refuses to touch anything that isn't a socket. A missing path is fine.
pub fn remove_socket(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(AgentError::Bind(format!("{:?}: {}", path, e))),
    };

    if !metadata.file_type().is_socket() {
        return Err(AgentError::Bind(format!(
            "refusing to remove something that isn't a socket: {:?}",
            path
        )));
    }

    debug!("Removing stale socket at {:?}", path);
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AgentError::Bind(format!("{:?}: {}", path, e))),
    }
}

async fn evict_running_daemon(path: &Path) {
    let client = AgentClient::connect(path);
    let Ok(pid) = client.ping().await else {
        return;
    };

    info!("Asking running agent (pid {}) to terminate", pid);
    if let Err(e) = client.kill().await {
        debug!("kill request to pid {} failed: {}", pid, e);
    }

    let deadline = tokio::time::Instant::now() + EVICT_TIMEOUT;
    while client.ping().await.is_ok() {
        if tokio::time::Instant::now() >= deadline {
            warn!("Agent (pid {}) still answering at {:?}", pid, path);
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// The socket file we bound; unlinked on drop unless it was replaced
struct SocketFile {
    path: PathBuf,
    dev: u64,
    ino: u64,
}

impl SocketFile {
    fn track(path: &Path) -> Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }
}

impl Drop for SocketFile {
    fn drop(&mut self) {
        let ours = fs::symlink_metadata(&self.path)
            .map(|m| m.dev() == self.dev && m.ino() == self.ino)
            .unwrap_or(false);

        if ours {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("Failed to remove socket {:?}: {}", self.path, e);
            }
        }
    }
}
