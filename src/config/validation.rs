//! Configuration validation functions
//!
//! This module provides validation for configuration fields: gateway
//! endpoints, peer addresses, keys, regions and timeouts.

use crate::error::{AgentError, Result};
use std::net::IpAddr;

/// Validate IP address
pub fn validate_ip_address(ip: &str) -> Result<()> {
    ip.parse::<IpAddr>()
        .map_err(|_| AgentError::Config(format!("Invalid IP address: {}", ip)))?;
    Ok(())
}

/// Validate endpoint format (host:port)
pub fn validate_endpoint(endpoint: &str) -> Result<()> {
    let parts: Vec<&str> = endpoint.rsplitn(2, ':').collect();

    if parts.len() != 2 {
        return Err(AgentError::Config(format!(
            "Invalid endpoint format: {} (expected format: host:port)",
            endpoint
        )));
    }

    let port: u16 = parts[0]
        .parse()
        .map_err(|_| AgentError::Config(format!("Invalid port in endpoint: {}", endpoint)))?;

    if port == 0 {
        return Err(AgentError::Config("Port number cannot be 0".to_string()));
    }

    // Host validation is lenient (can be hostname or IP)
    let host = parts[1];
    if host.is_empty() {
        return Err(AgentError::Config(
            "Host cannot be empty in endpoint".to_string(),
        ));
    }

    Ok(())
}

/// Validate base64-encoded public key
pub fn validate_public_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(AgentError::Config("Public key cannot be empty".to_string()));
    }

    // 32 bytes, base64 encoded = 44 characters (with padding)
    if key.len() != 44 {
        return Err(AgentError::Config(format!(
            "Invalid public key length: {} (expected 44 characters)",
            key.len()
        )));
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=')
    {
        return Err(AgentError::Config(
            "Public key contains invalid base64 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate region code (short lowercase identifier like "iad")
pub fn validate_region(region: &str) -> Result<()> {
    if region.is_empty() || region.len() > 8 {
        return Err(AgentError::Config(format!(
            "Invalid region '{}': expected 1-8 characters",
            region
        )));
    }

    if !region.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
        return Err(AgentError::Config(format!(
            "Invalid region '{}': only lowercase letters and digits allowed",
            region
        )));
    }

    Ok(())
}

/// Validate a millisecond timeout
pub fn validate_timeout_ms(name: &str, ms: u64) -> Result<()> {
    if ms == 0 {
        return Err(AgentError::Config(format!("{} cannot be 0", name)));
    }

    // an hour is already far beyond anything interactive
    if ms > 3_600_000 {
        return Err(AgentError::Config(format!(
            "{} of {}ms is too long (maximum 3600000)",
            name, ms
        )));
    }

    Ok(())
}
