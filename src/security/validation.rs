//! Input validation and sanitization
//!
//! Organization slugs arrive over the control socket and end up as registry
//! keys and state-file entries, so they are checked before any lookup.

use crate::error::AgentError;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Validate organization slug (lowercase alphanumeric and dashes)
pub fn validate_org_slug(slug: &str) -> Result<(), AgentError> {
    if slug.is_empty() {
        return Err(AgentError::Validation(
            "Organization slug cannot be empty".to_string(),
        ));
    }

    if slug.len() > 64 {
        return Err(AgentError::Validation(
            "Organization slug too long (max 64 characters)".to_string(),
        ));
    }

    // ':' in particular must never appear, the connect parser relies on it
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(AgentError::Validation(format!(
            "Invalid organization slug '{}': only lowercase alphanumeric, dash, and underscore allowed",
            slug
        )));
    }

    if slug.starts_with('-') || slug.starts_with('_') {
        return Err(AgentError::Validation(
            "Organization slug cannot start with dash or underscore".to_string(),
        ));
    }

    Ok(())
}

/// Sanitize file path to prevent directory traversal
pub fn sanitize_path(path: &str) -> Result<PathBuf, AgentError> {
    let path = Path::new(path);

    if path.to_str().is_some_and(|s| s.contains('\0')) {
        return Err(AgentError::Validation("Path contains null byte".to_string()));
    }

    for component in path.components() {
        if let std::path::Component::ParentDir = component {
            warn!("Path contains parent directory reference: {:?}", path);
            return Err(AgentError::Validation(
                "Path contains invalid parent directory reference".to_string(),
            ));
        }
    }

    Ok(path.to_path_buf())
}
