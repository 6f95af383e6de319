//! Client side of the control socket
//!
//! [`AgentClient`] is what other tools link against: it makes sure a daemon
//! is running, asks it to establish tunnels and hands out [`Dialer`]s whose
//! connections are relayed through them.

mod dialer;

pub use dialer::Dialer;

use crate::config::Config;
use crate::control::{Command, Reply, MAX_COMMAND_LEN};
use crate::error::{AgentError, Result};
use crate::security::ensure_private_dir;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, info};

/// Log file of a spawned daemon, inside the state directory
pub const AGENT_LOG_FILE: &str = "agent.log";

/// Subcommand that runs the daemon in the foreground
pub const DAEMON_SUBCOMMAND: &str = "daemon-start";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const SPAWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handle on the agent daemon behind a control socket
#[derive(Debug, Clone)]
pub struct AgentClient {
    socket_path: PathBuf,
    request_timeout: Duration,
    default_dial_timeout: Option<Duration>,
}

impl AgentClient {
    /// Attach to the daemon at `socket_path` without spawning one.
    ///
    /// No connection is made until the first request.
    pub fn connect(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            default_dial_timeout: None,
        }
    }

    /// Make sure a daemon answers at the configured socket, spawning
    /// `<current-exe> daemon-start` when none does.
    pub async fn establish(config: &Config) -> Result<Self> {
        let client = Self::connect(&config.agent.socket_path)
            .with_default_dial_timeout(config.agent.default_dial_timeout);

        if let Ok(pid) = client.ping().await {
            debug!("Agent already running (pid {})", pid);
            return Ok(client);
        }

        let child = spawn_daemon(config)?;
        info!("Started agent (pid {})", child);

        let deadline = tokio::time::Instant::now() + config.agent.spawn_timeout;
        loop {
            match client.ping().await {
                Ok(pid) => {
                    debug!("Agent answering (pid {})", pid);
                    return Ok(client);
                }
                Err(e) if tokio::time::Instant::now() >= deadline => {
                    return Err(AgentError::Timeout(format!(
                        "agent didn't answer at {:?} within {:?}: {}",
                        client.socket_path, config.agent.spawn_timeout, e
                    )));
                }
                Err(_) => tokio::time::sleep(SPAWN_POLL_INTERVAL).await,
            }
        }
    }

    /// Bound on each request/response exchange
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Dial timeout passed along when a dialer call gives none
    pub fn with_default_dial_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_dial_timeout = timeout;
        self
    }

    /// Control socket path
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Pid of the running daemon
    pub async fn ping(&self) -> Result<u32> {
        match self.request(&Command::Ping).await? {
            Reply::Pong(pid) => Ok(pid),
            other => Err(unexpected(&other)),
        }
    }

    /// Ask the daemon to stop accepting connections
    pub async fn kill(&self) -> Result<()> {
        self.request(&Command::Kill).await.map(|_| ())
    }

    /// Establish the tunnel for `org`
    pub async fn establish_tunnel(&self, org: &str) -> Result<()> {
        let command = Command::Establish {
            org: org.to_string(),
        };
        match self.request(&command).await? {
            Reply::Ok => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Establish the tunnel for `org` and return a dialer scoped to it
    pub async fn dialer(&self, org: &str) -> Result<Dialer> {
        self.establish_tunnel(org).await?;
        Ok(Dialer::new(self.clone(), org.to_string()))
    }

    async fn request(&self, command: &Command) -> Result<Reply> {
        tokio::time::timeout(self.request_timeout, async {
            let mut stream = self.open().await?;
            send(&mut stream, command).await?;
            read_reply(&mut stream).await?.into_result()
        })
        .await
        .map_err(|_| AgentError::Timeout(format!("{} request to agent", command.name())))?
    }

    pub(crate) async fn open(&self) -> Result<UnixStream> {
        UnixStream::connect(&self.socket_path).await.map_err(|e| {
            AgentError::Agent(format!("can't connect to agent at {:?}: {}", self.socket_path, e))
        })
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub(crate) fn default_dial_timeout(&self) -> Option<Duration> {
        self.default_dial_timeout
    }
}

pub(crate) async fn send(stream: &mut UnixStream, command: &Command) -> Result<()> {
    stream.write_all(format!("{}\n", command).as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one reply line without reading past it; relayed bytes may follow.
pub(crate) async fn read_reply(stream: &mut UnixStream) -> Result<Reply> {
    let mut line = Vec::with_capacity(64);
    loop {
        let byte = match stream.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(AgentError::Agent("agent closed the connection".to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        if byte == b'\n' {
            break;
        }
        if line.len() >= MAX_COMMAND_LEN {
            return Err(AgentError::Agent("reply line too long".to_string()));
        }
        line.push(byte);
    }

    Reply::parse(&String::from_utf8_lossy(&line))
}

fn unexpected(reply: &Reply) -> AgentError {
    AgentError::Agent(format!("unexpected reply: {}", reply))
}

/// Start a detached daemon for `config`, logging into the state directory
fn spawn_daemon(config: &Config) -> Result<u32> {
    let exe = std::env::current_exe()?;

    ensure_private_dir(&config.agent.state_dir)?;
    let log_path = config.agent.state_dir.join(AGENT_LOG_FILE);
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(&log_path)
        .map_err(|e| AgentError::Agent(format!("can't open {:?}: {}", log_path, e)))?;

    let mut cmd = std::process::Command::new(exe);
    cmd.arg(DAEMON_SUBCOMMAND);
    if let Some(path) = &config.source {
        cmd.arg("--config").arg(path);
    }

    let child = cmd
        .stdin(Stdio::null())
        .stdout(log.try_clone()?)
        .stderr(log)
        .process_group(0)
        .spawn()
        .map_err(|e| AgentError::Agent(format!("can't start agent: {}", e)))?;

    Ok(child.id())
}
