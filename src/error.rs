//! Error types for tunnel-agent
//!
//! This module defines the error types used throughout the agent.
//! We use `thiserror` for ergonomic error definitions and `anyhow` for
//! error propagation in the binary.
//!
//! The `Display` text of each variant is what a client sees after `err ` on
//! the control socket, so the wording is part of the wire protocol.

use thiserror::Error;

/// Main error type for agent operations
#[derive(Error, Debug)]
pub enum AgentError {
    /// The control socket could not be bound, or the path is occupied by
    /// something that is not a socket
    #[error("can't bind agent socket: {0}")]
    Bind(String),

    /// Malformed or unknown control command
    #[error("{0}")]
    Protocol(String),

    /// `establish` referenced an organization the directory doesn't know
    #[error("no such organization: {0}")]
    OrganizationNotFound(String),

    /// The tunnel provider failed to open a session
    #[error("can't establish tunnel for {org}: {reason}")]
    TunnelEstablish {
        /// Organization slug
        org: String,
        /// Provider failure
        reason: String,
    },

    /// `connect` was issued for an organization without an established tunnel
    #[error("no tunnel for {0} established")]
    NoTunnel(String),

    /// Destination host could not be resolved
    #[error("connection failed: can't resolve {host}: {reason}")]
    Resolve {
        /// Host that failed to resolve
        host: String,
        /// Resolver failure
        reason: String,
    },

    /// Destination could not be dialed
    #[error("connection failed: {0}")]
    Dial(String),

    /// Remote directory service failure
    #[error("directory error: {0}")]
    Directory(String),

    /// Failure talking to a running agent
    #[error("agent error: {0}")]
    Agent(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Permission errors
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias using AgentError
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Rebuild the error behind an `err` reply.
    ///
    /// Messages of the broker's own failures map back to their variant;
    /// anything else becomes [`AgentError::Agent`].
    pub fn from_reply(message: &str) -> Self {
        if let Some(org) = message.strip_prefix("no such organization: ") {
            return AgentError::OrganizationNotFound(org.to_string());
        }

        if let Some(org) = message
            .strip_prefix("no tunnel for ")
            .and_then(|rest| rest.strip_suffix(" established"))
        {
            return AgentError::NoTunnel(org.to_string());
        }

        if let Some((org, reason)) = message
            .strip_prefix("can't establish tunnel for ")
            .and_then(|rest| rest.split_once(": "))
        {
            return AgentError::TunnelEstablish {
                org: org.to_string(),
                reason: reason.to_string(),
            };
        }

        if let Some(failure) = message.strip_prefix("connection failed: ") {
            return match failure
                .strip_prefix("can't resolve ")
                .and_then(|rest| rest.split_once(": "))
            {
                Some((host, reason)) => AgentError::Resolve {
                    host: host.to_string(),
                    reason: reason.to_string(),
                },
                None => AgentError::Dial(failure.to_string()),
            };
        }

        if let Some(reason) = message.strip_prefix("directory error: ") {
            return AgentError::Directory(reason.to_string());
        }

        AgentError::Agent(message.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for AgentError {
    fn from(err: toml::de::Error) -> Self {
        AgentError::Config(err.to_string())
    }
}
