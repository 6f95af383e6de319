//! File permission validation and enforcement
//!
//! The control socket, its directory and the persisted peer state are
//! restricted to the owning user: anyone who can open the socket can dial
//! into every established tunnel.

use crate::error::AgentError;
use std::path::Path;
use tracing::{debug, warn};

/// Secure file mode requirements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureFileMode {
    /// Control socket (0600)
    Socket,
    /// Persisted peer state holding private keys (0600)
    PeerState,
    /// Agent directory (0700)
    Directory,
}

impl SecureFileMode {
    /// Get the maximum allowed permission mode
    #[cfg(unix)]
    pub fn max_mode(&self) -> u32 {
        match self {
            Self::Socket | Self::PeerState => 0o600,
            Self::Directory => 0o700,
        }
    }

    /// Get human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Socket | Self::PeerState => "0600 (owner read/write only)",
            Self::Directory => "0700 (owner only)",
        }
    }
}

/// Validate file permissions
#[cfg(unix)]
pub fn validate_file_permissions(path: &Path, mode: SecureFileMode) -> Result<(), AgentError> {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    debug!("Validating permissions for {:?}", path);

    let metadata = std::fs::metadata(path).map_err(|e| {
        AgentError::Permission(format!("Failed to read metadata for {:?}: {}", path, e))
    })?;

    let file_mode = metadata.permissions().mode() & 0o777;
    let max_mode = mode.max_mode();

    if file_mode & !max_mode != 0 {
        warn!(
            "File {:?} has insecure permissions: {:o} (max: {:o})",
            path, file_mode, max_mode
        );
        return Err(AgentError::Permission(format!(
            "File {:?} has insecure permissions: {:o}, expected {}",
            path,
            file_mode,
            mode.description()
        )));
    }

    let file_uid = metadata.uid();
    let current_uid = unsafe { libc::getuid() };

    if file_uid != current_uid {
        return Err(AgentError::Permission(format!(
            "File {:?} is not owned by the current user",
            path
        )));
    }

    Ok(())
}

/// Set secure file permissions
#[cfg(unix)]
pub fn set_secure_permissions(path: &Path, mode: SecureFileMode) -> Result<(), AgentError> {
    use std::os::unix::fs::PermissionsExt;

    let perms = std::fs::Permissions::from_mode(mode.max_mode());
    std::fs::set_permissions(path, perms).map_err(|e| {
        AgentError::Permission(format!("Failed to set permissions on {:?}: {}", path, e))
    })?;

    debug!("Set secure permissions on {:?}: {:o}", path, mode.max_mode());
    Ok(())
}

/// Create `path` (and parents) if missing and restrict it to the owner
#[cfg(unix)]
pub fn ensure_private_dir(path: &Path) -> Result<(), AgentError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| {
            AgentError::Permission(format!("Failed to create directory {:?}: {}", path, e))
        })?;
        set_secure_permissions(path, SecureFileMode::Directory)?;
        return Ok(());
    }

    if !path.is_dir() {
        return Err(AgentError::Permission(format!(
            "{:?} is not a directory",
            path
        )));
    }

    // pre-existing directories (e.g. /tmp for tests) are left alone unless
    // they are world-writable without the sticky bit
    check_not_world_writable(path)
}

#[cfg(unix)]
fn check_not_world_writable(path: &Path) -> Result<(), AgentError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path)?.permissions().mode();
    if mode & 0o002 != 0 && mode & 0o1000 == 0 {
        return Err(AgentError::Permission(format!(
            "Directory {:?} is world-writable",
            path
        )));
    }

    Ok(())
}
