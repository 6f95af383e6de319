//! Control socket
//!
//! This module provides the local control interface: a Unix socket that
//! accepts one line-oriented command per connection and, for `connect`,
//! relays bytes to a destination reached through an organization's tunnel.

mod api;
mod handler;
mod relay;
mod server;

pub use api::{Command, ConnectTarget, Reply, MAX_COMMAND_LEN};
pub use handler::CommandHandler;
pub use relay::{dial, relay, RelayStats};
pub use server::{remove_socket, ControlServer};
