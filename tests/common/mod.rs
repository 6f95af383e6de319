//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UnixStream};
use tokio::task::JoinHandle;
use tunnel_agent::config::Config;
use tunnel_agent::control::{CommandHandler, ControlServer};
use tunnel_agent::directory::StaticDirectory;
use tunnel_agent::tunnel::{
    HostSession, PeerStateStore, TunnelConfig, TunnelProvider, TunnelRegistry, TunnelSession,
};

/// Config with one organization, `acme`
pub const ACME_CONFIG: &str = r#"
[agent]
region = "iad"

[organizations.acme]
id = "org-1"
name = "Acme Corp"
gateway_endpoint = "gw.example.com:51820"
gateway_public_key = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQ="
peer_ip = "10.10.0.2"
"#;

/// Provider counting how many sessions it opened. Sessions use the host
/// network, so tests can relay to local listeners.
#[derive(Default)]
pub struct CountingProvider {
    pub connects: AtomicUsize,
    pub delay: Duration,
}

impl CountingProvider {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            connects: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TunnelProvider for CountingProvider {
    async fn connect(&self, _config: &TunnelConfig) -> tunnel_agent::Result<Arc<dyn TunnelSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(Arc::new(HostSession))
    }
}

/// A daemon running in-process on a temporary socket
pub struct TestAgent {
    pub socket_path: PathBuf,
    pub handler: Arc<CommandHandler>,
    pub provider: Arc<CountingProvider>,
    pub task: JoinHandle<tunnel_agent::Result<()>>,
}

impl TestAgent {
    pub async fn start(dir: &Path) -> Self {
        Self::start_with(dir, CountingProvider::default()).await
    }

    pub async fn start_with(dir: &Path, provider: CountingProvider) -> Self {
        let config = Config::parse(ACME_CONFIG).unwrap();
        let provider = Arc::new(provider);

        let registry = TunnelRegistry::new(
            Arc::new(StaticDirectory::from_config(&config)),
            provider.clone(),
            PeerStateStore::open(&dir.join("state")).unwrap(),
            config.agent.region.clone(),
        );
        let handler = Arc::new(CommandHandler::new(Arc::new(registry)));

        let socket_path = dir.join("agent.sock");
        let server = ControlServer::bind(&socket_path, handler.clone())
            .await
            .expect("Failed to bind control server");
        let task = tokio::spawn(server.serve());

        Self {
            socket_path,
            handler,
            provider,
            task,
        }
    }
}

/// Send one command and read everything the agent sends back
pub async fn send_command(socket_path: &Path, command: &str) -> String {
    let mut stream = UnixStream::connect(socket_path)
        .await
        .expect("Failed to connect to control socket");
    stream.write_all(command.as_bytes()).await.unwrap();

    let mut reply = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut reply))
        .await
        .expect("Reply timeout")
        .unwrap();
    reply
}

/// TCP server echoing every connection back to itself
pub async fn echo_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.into_split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

/// An address nothing listens on
pub fn closed_port() -> std::net::SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}
