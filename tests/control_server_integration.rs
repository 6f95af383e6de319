//! Self-contained integration tests for the control server
//!
//! These tests start their own instance of the agent on a temporary socket
//! and talk to it over the line protocol, so they don't require a
//! separately running daemon.

mod common;

use common::{closed_port, echo_server, send_command, CountingProvider, TestAgent};
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tunnel_agent::control::ControlServer;
use tunnel_agent::AgentError;

#[tokio::test]
async fn test_ping_returns_pid() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let agent = TestAgent::start(temp_dir.path()).await;

    let reply = send_command(&agent.socket_path, "ping\n").await;
    assert_eq!(reply, format!("pong {}\n", std::process::id()));
}

#[tokio::test]
async fn test_socket_is_owner_only() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let agent = TestAgent::start(temp_dir.path()).await;

    let mode = std::fs::metadata(&agent.socket_path)
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o077, 0, "socket mode {:o} is too open", mode);
}

#[tokio::test]
async fn test_bad_command_keeps_serving() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let agent = TestAgent::start(temp_dir.path()).await;

    let reply = send_command(&agent.socket_path, "bogus foo\n").await;
    assert_eq!(reply, "err bad command: [bogus foo]\n");

    let reply = send_command(&agent.socket_path, "ping\n").await;
    assert!(reply.starts_with("pong "), "unexpected reply: {}", reply);
}

#[tokio::test]
async fn test_multiple_sequential_connections() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let agent = TestAgent::start(temp_dir.path()).await;

    for _ in 1..=3 {
        let reply = send_command(&agent.socket_path, "ping\n").await;
        assert!(reply.starts_with("pong "));
    }
}

#[tokio::test]
async fn test_kill_stops_accept_loop() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let agent = TestAgent::start(temp_dir.path()).await;

    let reply = send_command(&agent.socket_path, "kill\n").await;
    assert_eq!(reply, "ok\n");

    timeout(Duration::from_secs(2), agent.task)
        .await
        .expect("Accept loop did not stop")
        .unwrap()
        .expect("Accept loop failed");

    assert!(
        !agent.socket_path.exists(),
        "Control server did not cleanup socket"
    );
    assert!(UnixStream::connect(&agent.socket_path).await.is_err());
}

#[tokio::test]
async fn test_shutdown_from_handler() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let agent = TestAgent::start(temp_dir.path()).await;

    agent.handler.shutdown();

    timeout(Duration::from_secs(2), agent.task)
        .await
        .expect("Accept loop did not stop")
        .unwrap()
        .unwrap();
    assert!(!agent.socket_path.exists());
}

#[tokio::test]
async fn test_connect_closed_port_fails_fast() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let agent = TestAgent::start(temp_dir.path()).await;

    let addr = closed_port();
    let started = Instant::now();
    let reply = send_command(&agent.socket_path, &format!("connect {} 100\n", addr)).await;

    assert!(
        reply.starts_with("err connection failed: "),
        "unexpected reply: {}",
        reply
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_connect_invalid_timeout() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let agent = TestAgent::start(temp_dir.path()).await;

    let reply = send_command(&agent.socket_path, "connect 127.0.0.1:9999 soon\n").await;
    assert_eq!(reply, "err invalid timeout: soon\n");
}

#[tokio::test]
async fn test_establish_twice_keeps_one_tunnel() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let agent = TestAgent::start(temp_dir.path()).await;

    assert_eq!(send_command(&agent.socket_path, "establish acme\n").await, "ok\n");
    assert_eq!(send_command(&agent.socket_path, "establish acme\n").await, "ok\n");

    assert_eq!(agent.handler.registry().len().await, 1);
    assert_eq!(agent.provider.count(), 1);

    // the peer registration was persisted
    assert!(temp_dir.path().join("state").join("peers.json").exists());
}

#[tokio::test]
async fn test_concurrent_establish() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let agent = TestAgent::start_with(
        temp_dir.path(),
        CountingProvider::with_delay(Duration::from_millis(200)),
    )
    .await;

    let path = Arc::new(agent.socket_path.clone());
    let attempts: Vec<_> = (0..4)
        .map(|_| {
            let path = path.clone();
            tokio::spawn(async move { send_command(&path, "establish acme\n").await })
        })
        .collect();

    for attempt in attempts {
        assert_eq!(attempt.await.unwrap(), "ok\n");
    }

    assert_eq!(agent.provider.count(), 1);
    assert_eq!(agent.handler.registry().organizations().await, vec!["acme"]);
}

#[tokio::test]
async fn test_establish_unknown_organization() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let agent = TestAgent::start(temp_dir.path()).await;

    let reply = send_command(&agent.socket_path, "establish globex\n").await;
    assert_eq!(reply, "err no such organization: globex\n");
    assert!(agent.handler.registry().is_empty().await);
}

#[tokio::test]
async fn test_connect_before_establish() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let agent = TestAgent::start(temp_dir.path()).await;

    let reply = send_command(&agent.socket_path, "connect acme 127.0.0.1:9999\n").await;
    assert_eq!(reply, "err no tunnel for acme established\n");
}

#[tokio::test]
async fn test_relay_through_tunnel() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let agent = TestAgent::start(temp_dir.path()).await;
    let echo = echo_server().await;

    assert_eq!(send_command(&agent.socket_path, "establish acme\n").await, "ok\n");

    let stream = UnixStream::connect(&agent.socket_path).await.unwrap();
    let mut stream = BufReader::new(stream);
    stream
        .get_mut()
        .write_all(format!("connect acme {} 1000\n", echo).as_bytes())
        .await
        .unwrap();

    let mut reply = String::new();
    stream.read_line(&mut reply).await.unwrap();
    assert_eq!(reply, "ok\n");

    stream.get_mut().write_all(b"hello through the tunnel").await.unwrap();
    stream.get_mut().shutdown().await.unwrap();

    let mut echoed = String::new();
    timeout(Duration::from_secs(5), stream.read_to_string(&mut echoed))
        .await
        .expect("Relay timeout")
        .unwrap();
    assert_eq!(echoed, "hello through the tunnel");
}

#[tokio::test]
async fn test_bytes_after_command_line_are_relayed() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let agent = TestAgent::start(temp_dir.path()).await;
    let echo = echo_server().await;

    let mut stream = UnixStream::connect(&agent.socket_path).await.unwrap();
    // command and payload in a single write
    stream
        .write_all(format!("connect {}\nearly bytes", echo).as_bytes())
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let mut received = String::new();
    timeout(Duration::from_secs(5), stream.read_to_string(&mut received))
        .await
        .expect("Relay timeout")
        .unwrap();
    assert_eq!(received, "ok\nearly bytes");
}

#[tokio::test]
async fn test_bind_refuses_regular_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let socket_path = temp_dir.path().join("agent.sock");
    std::fs::write(&socket_path, "not a socket").unwrap();

    let handler = TestAgent::start(&temp_dir.path().join("other")).await.handler;
    let result = ControlServer::bind(&socket_path, handler).await;

    assert!(matches!(result, Err(AgentError::Bind(_))));
    assert_eq!(std::fs::read_to_string(&socket_path).unwrap(), "not a socket");
}

#[tokio::test]
async fn test_new_daemon_replaces_running_one() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let first = TestAgent::start(temp_dir.path()).await;
    let second = TestAgent::start(temp_dir.path()).await;

    timeout(Duration::from_secs(3), first.task)
        .await
        .expect("First agent did not stop")
        .unwrap()
        .unwrap();

    // the first daemon's cleanup must not remove the new socket
    assert!(second.socket_path.exists());
    let reply = send_command(&second.socket_path, "ping\n").await;
    assert!(reply.starts_with("pong "));
}
