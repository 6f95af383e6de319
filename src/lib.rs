//! tunnel-agent: per-user daemon brokering connections into private networks
//!
//! The agent keeps one WireGuard tunnel per organization alive on behalf of
//! short-lived command-line tools. Tools talk to it over a Unix socket using
//! a tiny line protocol and get back plain byte streams that the agent
//! relays through the right tunnel.
//!
//! # Architecture
//!
//! A single daemon per user owns the control socket. Each control
//! connection carries one command (`ping`, `kill`, `establish`, `connect`);
//! `connect` turns the connection itself into a relayed stream. Tunnels are
//! established once and shared by every later connection.
//!
//! # Modules
//!
//! - `config`: Configuration parsing and management
//! - `control`: Control socket server, protocol and connection broker
//! - `client`: Client API used by other tools
//! - `directory`: Organization lookup and peer registration
//! - `tunnel`: Keys, peer state, tunnel provider and registry
//! - `security`: File permissions and input validation
//! - `error`: Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod control;
pub mod directory;
pub mod error;
pub mod security;
pub mod tunnel;

// Re-export commonly used types
pub use client::{AgentClient, Dialer};
pub use error::{AgentError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
