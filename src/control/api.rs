//! Control protocol commands and replies
//!
//! Every control connection carries exactly one command line of
//! space-separated tokens. The daemon answers with one reply line whose
//! first token is `ok`, `pong` or `err`. A successful `connect` is followed
//! by the raw relayed bytes on the same connection.

use crate::error::{AgentError, Result};
use crate::security::validate_org_slug;
use std::fmt;
use std::time::Duration;

/// Longest command line the daemon will read
pub const MAX_COMMAND_LEN: usize = 4096;

/// A parsed control command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `ping`
    Ping,
    /// `kill`
    Kill,
    /// `establish <org>`
    Establish {
        /// Organization slug
        org: String,
    },
    /// `connect [<org>] <host:port> [timeout-ms]`
    Connect(ConnectTarget),
}

/// Destination of a `connect` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Organization whose tunnel carries the connection. `None` dials
    /// through the host network.
    pub org: Option<String>,
    /// Destination `host:port`
    pub addr: String,
    /// Dial timeout; `None` waits as long as the dialer does
    pub timeout: Option<Duration>,
}

impl Command {
    /// Parse one command line
    pub fn parse(line: &str) -> Result<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();

        match tokens.as_slice() {
            ["ping"] => Ok(Command::Ping),
            ["kill"] => Ok(Command::Kill),
            ["ping" | "kill", ..] => Err(AgentError::Protocol(format!(
                "{} takes no arguments",
                tokens[0]
            ))),
            ["establish", org] => {
                validate_org_slug(org)?;
                Ok(Command::Establish {
                    org: org.to_string(),
                })
            }
            ["establish", ..] => Err(AgentError::Protocol(
                "usage: establish <org>".to_string(),
            )),
            ["connect", args @ ..] => ConnectTarget::parse(args).map(Command::Connect),
            _ => Err(AgentError::Protocol(format!(
                "bad command: [{}]",
                tokens.join(" ")
            ))),
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::Kill => "kill",
            Command::Establish { .. } => "establish",
            Command::Connect(_) => "connect",
        }
    }
}

impl ConnectTarget {
    fn parse(args: &[&str]) -> Result<Self> {
        // slugs never contain ':', addresses always do
        let (org, rest) = match args.first() {
            Some(first) if !first.contains(':') => {
                validate_org_slug(first)?;
                (Some(first.to_string()), &args[1..])
            }
            _ => (None, args),
        };

        let (addr, timeout) = match rest {
            [addr] => (addr, None),
            [addr, ms] => (addr, parse_timeout(ms)?),
            _ => {
                return Err(AgentError::Protocol(
                    "usage: connect [<org>] <host:port> [timeout-ms]".to_string(),
                ))
            }
        };

        if !addr.contains(':') {
            return Err(AgentError::Protocol(format!(
                "missing port in address {}",
                addr
            )));
        }

        Ok(Self {
            org,
            addr: addr.to_string(),
            timeout,
        })
    }
}

/// Zero means no timeout
fn parse_timeout(ms: &str) -> Result<Option<Duration>> {
    let ms: u64 = ms
        .parse()
        .map_err(|_| AgentError::Protocol(format!("invalid timeout: {}", ms)))?;

    Ok((ms > 0).then(|| Duration::from_millis(ms)))
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Ping => write!(f, "ping"),
            Command::Kill => write!(f, "kill"),
            Command::Establish { org } => write!(f, "establish {}", org),
            Command::Connect(target) => {
                write!(f, "connect")?;
                if let Some(org) = &target.org {
                    write!(f, " {}", org)?;
                }
                write!(f, " {}", target.addr)?;
                if let Some(timeout) = target.timeout {
                    write!(f, " {}", timeout.as_millis())?;
                }
                Ok(())
            }
        }
    }
}

/// A reply line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `ok`
    Ok,
    /// `pong <pid>`
    Pong(u32),
    /// `err <message>`
    Err(String),
}

impl Reply {
    /// Build the error reply for a failed command
    pub fn error(err: &AgentError) -> Self {
        Reply::Err(err.to_string())
    }

    /// Parse a reply line as read by a client
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        let (tag, rest) = line.split_once(' ').unwrap_or((line, ""));

        match tag {
            "ok" => Ok(Reply::Ok),
            "pong" => rest
                .trim()
                .parse()
                .map(Reply::Pong)
                .map_err(|_| AgentError::Agent(format!("bad pong: {}", line))),
            "err" => Ok(Reply::Err(rest.to_string())),
            _ => Err(AgentError::Agent(format!("unexpected reply: {}", line))),
        }
    }

    /// Turn an `err` reply into an error
    pub fn into_result(self) -> Result<Self> {
        match self {
            Reply::Err(message) => Err(AgentError::from_reply(&message)),
            reply => Ok(reply),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => write!(f, "ok"),
            Reply::Pong(pid) => write!(f, "pong {}", pid),
            Reply::Err(message) => write!(f, "err {}", message),
        }
    }
}
