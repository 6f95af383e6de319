//! Command handler for the control socket
//!
//! Reads the single command line of a control connection, dispatches it and
//! writes the reply. A successful `connect` hands the connection over to the
//! relay.

use crate::control::api::{Command, ConnectTarget, Reply, MAX_COMMAND_LEN};
use crate::control::relay;
use crate::error::{AgentError, Result};
use crate::tunnel::{BoxedStream, HostSession, TunnelRegistry, TunnelSession};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Dispatches control commands against the tunnel registry
pub struct CommandHandler {
    /// Established tunnels
    registry: Arc<TunnelRegistry>,
    /// Session used by address-only `connect`
    host: Arc<dyn TunnelSession>,
    /// Dial timeout when the command carries none
    default_dial_timeout: Option<Duration>,
    /// Set to `true` once the daemon should stop accepting
    shutdown: watch::Sender<bool>,
}

impl CommandHandler {
    /// Create a handler over `registry`
    pub fn new(registry: Arc<TunnelRegistry>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            host: Arc::new(HostSession),
            default_dial_timeout: None,
            shutdown,
        }
    }

    /// Use `session` for address-only `connect`
    pub fn with_host_session(mut self, session: Arc<dyn TunnelSession>) -> Self {
        self.host = session;
        self
    }

    /// Apply `timeout` to dials that don't specify one
    pub fn with_default_dial_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_dial_timeout = timeout;
        self
    }

    /// The tunnel registry
    pub fn registry(&self) -> &Arc<TunnelRegistry> {
        &self.registry
    }

    /// Receiver that flips to `true` when shutdown is requested
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Ask the accept loop to stop. Idempotent.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("Shutdown requested");
        }
    }

    /// Whether shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Serve one control connection from start to finish
    pub async fn handle_connection<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = BufReader::new(stream);
        let line = match read_command_line(&mut reader).await {
            Ok(line) => line,
            Err(e) => {
                warn!("Unreadable command: {}", e);
                // the client may already be gone
                let _ = write_reply(&mut reader, &Reply::error(&e)).await;
                return Err(e);
            }
        };
        debug!("Received command: {}", line.trim_end());

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                warn!("Rejected command: {}", e);
                return write_reply(&mut reader, &Reply::error(&e)).await;
            }
        };

        match command {
            Command::Ping => {
                write_reply(&mut reader, &Reply::Pong(std::process::id())).await
            }
            Command::Kill => {
                write_reply(&mut reader, &Reply::Ok).await?;
                self.shutdown();
                Ok(())
            }
            Command::Establish { org } => {
                let reply = match self.registry.establish(&org).await {
                    Ok(_) => Reply::Ok,
                    Err(e) => {
                        warn!("establish {} failed: {}", org, e);
                        Reply::error(&e)
                    }
                };
                write_reply(&mut reader, &reply).await
            }
            Command::Connect(target) => self.handle_connect(reader, target).await,
        }
    }

    async fn handle_connect<S>(&self, mut client: BufReader<S>, target: ConnectTarget) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let upstream = match self.dial(&target).await {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!("connect {} failed: {}", target.addr, e);
                return write_reply(&mut client, &Reply::error(&e)).await;
            }
        };

        write_reply(&mut client, &Reply::Ok).await?;
        debug!("Relaying to {}", target.addr);

        // the BufReader goes along so bytes already buffered after the
        // command line still reach the destination
        relay::relay(client, upstream).await;
        Ok(())
    }

    async fn dial(&self, target: &ConnectTarget) -> Result<BoxedStream> {
        let timeout = target.timeout.or(self.default_dial_timeout);

        match &target.org {
            Some(org) => {
                let tunnel = self.registry.tunnel_for(org).await?;
                relay::dial(tunnel.session(), &target.addr, timeout).await
            }
            None => relay::dial(self.host.as_ref(), &target.addr, timeout).await,
        }
    }
}

/// Read the command line, bounded by [`MAX_COMMAND_LEN`]. A missing
/// terminator before EOF is accepted; invalid UTF-8 is replaced so the
/// parser can reject it.
async fn read_command_line<S>(reader: &mut BufReader<S>) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(64);
    let read = (&mut *reader)
        .take(MAX_COMMAND_LEN as u64)
        .read_until(b'\n', &mut line)
        .await?;

    if read == MAX_COMMAND_LEN && !line.ends_with(b"\n") {
        return Err(AgentError::Protocol("command line too long".to_string()));
    }

    Ok(String::from_utf8_lossy(&line).into_owned())
}

async fn write_reply<W>(writer: &mut W, reply: &Reply) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(format!("{}\n", reply).as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
