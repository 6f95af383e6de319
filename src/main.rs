//! tunnel-agent main entry point
//!
//! This binary runs the agent daemon and offers a few client commands for
//! talking to it from a shell.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tunnel_agent::{
    config::Config,
    control::{CommandHandler, ControlServer},
    directory::StaticDirectory,
    tunnel::{HostNetworkProvider, PeerStateStore, TunnelRegistry},
    AgentClient, APP_NAME, VERSION,
};

/// Per-user daemon that relays connections into private networks
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version = VERSION, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path (default: ~/.tunnel-agent/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent daemon in the foreground
    DaemonStart,

    /// Ask the running agent to stop
    Stop,

    /// Check that the agent answers
    Ping,

    /// Establish the tunnel for an organization, starting the agent if needed
    Establish {
        /// Organization slug
        org: String,
    },

    /// Pipe stdin/stdout through a connection inside an organization's network
    Proxy {
        /// Organization slug
        org: String,

        /// Destination host:port
        addr: String,

        /// Dial timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Execute command
    if let Err(e) = run(cli).await {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Initialize structured logging with tracing
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // stdout belongs to `proxy`
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Run the CLI command
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Version = cli.command {
        println!("{} v{}", APP_NAME, VERSION);
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::DaemonStart => run_daemon(config).await,
        Commands::Stop => {
            let client = AgentClient::connect(&config.agent.socket_path);
            client.kill().await?;
            info!("Agent at {:?} stopped", config.agent.socket_path);
            Ok(())
        }
        Commands::Ping => {
            let pid = AgentClient::connect(&config.agent.socket_path).ping().await?;
            println!("pong {}", pid);
            Ok(())
        }
        Commands::Establish { org } => {
            let client = AgentClient::establish(&config).await?;
            client.establish_tunnel(&org).await?;
            info!("Tunnel for {} established", org);
            Ok(())
        }
        Commands::Proxy {
            org,
            addr,
            timeout_ms,
        } => {
            let client = AgentClient::establish(&config).await?;
            let dialer = client.dialer(&org).await?;
            let stream = match timeout_ms {
                Some(ms) => dialer.dial_timeout(&addr, Duration::from_millis(ms)).await?,
                None => dialer.dial(&addr).await?,
            };
            proxy_stdio(stream).await
        }
        Commands::Version => Ok(()),
    }
}

/// Run the daemon until `kill` or a termination signal
async fn run_daemon(config: Config) -> anyhow::Result<()> {
    info!("Starting {} v{}", APP_NAME, VERSION);

    let peers = PeerStateStore::open(&config.agent.state_dir)?;
    let registry = TunnelRegistry::new(
        Arc::new(StaticDirectory::from_config(&config)),
        Arc::new(HostNetworkProvider),
        peers,
        config.agent.region.clone(),
    );

    let handler = Arc::new(
        CommandHandler::new(Arc::new(registry))
            .with_default_dial_timeout(config.agent.default_dial_timeout),
    );
    let server = ControlServer::bind(&config.agent.socket_path, handler.clone()).await?;

    let signal_handler = handler.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_handler.shutdown();
    });

    server.serve().await?;

    info!("Shutting down agent");
    Ok(())
}

/// Copy stdin to the relayed stream and the stream to stdout
async fn proxy_stdio(stream: tokio::net::UnixStream) -> anyhow::Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let upload = async move {
        let mut stdin = tokio::io::stdin();
        tokio::io::copy(&mut stdin, &mut writer).await?;
        writer.shutdown().await
    };

    let download = async move {
        let mut stdout = tokio::io::stdout();
        tokio::io::copy(&mut reader, &mut stdout).await?;
        stdout.flush().await
    };

    let (up, down) = tokio::join!(upload, download);
    down?;
    up?;
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
