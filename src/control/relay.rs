//! Connection broker
//!
//! Dials the destination of a `connect` command and pumps bytes between it
//! and the control connection until both directions are done.

use crate::error::{AgentError, Result};
use crate::tunnel::{resolve_addr, BoxedStream, TunnelSession};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Resolve and dial `addr` through `session`, giving up after `timeout`
pub async fn dial(
    session: &dyn TunnelSession,
    addr: &str,
    timeout: Option<Duration>,
) -> Result<BoxedStream> {
    let target = resolve_addr(session, addr).await?;
    debug!("Dialing {} ({})", addr, target);

    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, session.dial(target))
            .await
            .map_err(|_| AgentError::Dial(format!("dial tcp {}: i/o timeout", target)))?,
        None => session.dial(target).await,
    }
}

/// Bytes moved in each direction by [`relay`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Client to destination
    pub sent: u64,
    /// Destination to client
    pub received: u64,
}

/// Copy bytes both ways between `client` and `upstream`.
///
/// Each direction half-closes its destination on EOF. Returns once both
/// directions have finished; both streams are dropped on return.
pub async fn relay<C, U>(client: C, upstream: U) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (upstream_read, upstream_write) = tokio::io::split(upstream);

    let outbound = tokio::spawn(pump(client_read, upstream_write, "client -> upstream"));
    let inbound = tokio::spawn(pump(upstream_read, client_write, "upstream -> client"));

    let (sent, received) = tokio::join!(outbound, inbound);

    let stats = RelayStats {
        sent: joined(sent),
        received: joined(received),
    };
    debug!(
        "Relay finished: {} bytes sent, {} bytes received",
        stats.sent, stats.received
    );
    stats
}

/// Copy `reader` into `writer` until EOF or an error, then half-close
/// `writer`. Returns the bytes delivered, including those moved before a
/// failure.
async fn pump<R, W>(mut reader: R, mut writer: W, direction: &'static str) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut copied = 0u64;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Relay {} read failed after {} bytes: {}", direction, copied, e);
                break;
            }
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            debug!("Relay {} write failed after {} bytes: {}", direction, copied, e);
            break;
        }
        copied += n as u64;
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Relay {} shutdown: {}", direction, e);
    }

    copied
}

fn joined(result: std::result::Result<u64, tokio::task::JoinError>) -> u64 {
    result.unwrap_or_else(|e| {
        warn!("Relay task failed: {}", e);
        0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::{HostSession, MockTunnelSession};
    use async_trait::async_trait;
    use std::net::{IpAddr, SocketAddr};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, ReadBuf};
    use tokio::net::TcpListener;

    /// Session whose dials never complete
    struct StalledSession;

    #[async_trait]
    impl TunnelSession for StalledSession {
        async fn lookup_host(&self, _host: &str) -> Result<Vec<IpAddr>> {
            Ok(vec![])
        }

        async fn dial(&self, _addr: SocketAddr) -> Result<BoxedStream> {
            std::future::pending().await
        }
    }

    /// Reader that fails on every read
    struct BrokenReader;

    impl AsyncRead for BrokenReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::ErrorKind::ConnectionReset.into()))
        }
    }

    #[tokio::test]
    async fn test_relay_both_directions() {
        let (client, mut client_peer) = duplex(64);
        let (upstream, mut upstream_peer) = duplex(64);

        let handle = tokio::spawn(relay(client, upstream));

        client_peer.write_all(b"hello").await.unwrap();
        client_peer.shutdown().await.unwrap();

        let mut buf = Vec::new();
        upstream_peer.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");

        upstream_peer.write_all(b"world!").await.unwrap();
        upstream_peer.shutdown().await.unwrap();

        let mut buf = Vec::new();
        client_peer.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"world!");

        let stats = handle.await.unwrap();
        assert_eq!(stats, RelayStats { sent: 5, received: 6 });
    }

    #[tokio::test]
    async fn test_dial_host_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = dial(&HostSession, &addr.to_string(), Some(Duration::from_secs(5))).await;
        assert!(stream.is_ok());
    }

    #[tokio::test]
    async fn test_dial_failure() {
        let mut session = MockTunnelSession::new();
        session.expect_lookup_host().never();
        session
            .expect_dial()
            .returning(|_| Err(AgentError::Dial("unreachable".to_string())));

        let err = match dial(&session, "10.0.0.9:80", Some(Duration::from_millis(50))).await {
            Ok(_) => panic!("dial should fail"),
            Err(e) => e,
        };
        assert!(err.to_string().starts_with("connection failed:"));
    }

    #[tokio::test]
    async fn test_dial_timeout_fires() {
        let started = std::time::Instant::now();
        let result = dial(&StalledSession, "10.0.0.9:80", Some(Duration::from_millis(50))).await;
        let elapsed = started.elapsed();

        match result {
            Err(AgentError::Dial(reason)) => {
                assert_eq!(reason, "dial tcp 10.0.0.9:80: i/o timeout");
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("dial should time out"),
        }
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_pump_counts_bytes_before_failure() {
        let reader = (&b"partial"[..]).chain(BrokenReader);
        let mut delivered = Vec::new();

        let copied = pump(reader, &mut delivered, "test").await;
        assert_eq!(copied, 7);
        assert_eq!(delivered, b"partial");
    }

    #[tokio::test]
    async fn test_dial_unresolvable() {
        let mut session = MockTunnelSession::new();
        session
            .expect_lookup_host()
            .returning(|_| Err(AgentError::Timeout("dns".to_string())));
        session.expect_dial().never();

        let result = dial(&session, "ghost.internal:80", None).await;
        assert!(matches!(result, Err(AgentError::Resolve { .. })));
    }

    #[tokio::test]
    async fn test_dial_uses_resolved_address() {
        let mut session = MockTunnelSession::new();
        session
            .expect_lookup_host()
            .returning(|_| Ok(vec!["10.0.0.7".parse().unwrap()]));
        session
            .expect_dial()
            .withf(|addr| *addr == "10.0.0.7:5432".parse::<SocketAddr>().unwrap())
            .returning(|_| Ok(Box::new(duplex(8).0) as BoxedStream));

        assert!(dial(&session, "db.internal:5432", None).await.is_ok());
    }
}
