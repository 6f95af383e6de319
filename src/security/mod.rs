//! Security hardening
//!
//! This module provides:
//! - Owner-only permissions for the control socket, its directory and the
//!   persisted peer state
//! - Validation of untrusted input (organization slugs, paths)

mod permissions;
mod validation;

pub use permissions::{
    ensure_private_dir, set_secure_permissions, validate_file_permissions, SecureFileMode,
};
pub use validation::{sanitize_path, validate_org_slug};
