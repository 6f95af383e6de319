use crate::client::{read_reply, send, AgentClient};
use crate::control::{Command, ConnectTarget, Reply};
use crate::error::{AgentError, Result};
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::debug;

/// Opens connections through one organization's tunnel
#[derive(Debug, Clone)]
pub struct Dialer {
    client: AgentClient,
    org: String,
}

impl Dialer {
    pub(crate) fn new(client: AgentClient, org: String) -> Self {
        Self { client, org }
    }

    /// Organization this dialer is scoped to
    pub fn org(&self) -> &str {
        &self.org
    }

    /// Connect to `addr` (`host:port`) inside the organization's network.
    ///
    /// The returned stream carries the relayed connection.
    pub async fn dial(&self, addr: &str) -> Result<UnixStream> {
        self.connect(addr, self.client.default_dial_timeout()).await
    }

    /// Like [`Dialer::dial`], giving up on the remote dial after `timeout`
    pub async fn dial_timeout(&self, addr: &str, timeout: Duration) -> Result<UnixStream> {
        self.connect(addr, Some(timeout)).await
    }

    async fn connect(&self, addr: &str, timeout: Option<Duration>) -> Result<UnixStream> {
        let command = Command::Connect(ConnectTarget {
            org: Some(self.org.clone()),
            addr: addr.to_string(),
            timeout,
        });

        let exchange = async {
            let mut stream = self.client.open().await?;
            send(&mut stream, &command).await?;
            match read_reply(&mut stream).await?.into_result()? {
                Reply::Ok => Ok::<_, AgentError>(stream),
                other => Err(AgentError::Agent(format!("unexpected reply: {}", other))),
            }
        };

        // the daemon's own dial timeout runs inside this exchange
        let budget = timeout.map(|t| t + self.client.request_timeout());
        let stream = match budget {
            Some(budget) => tokio::time::timeout(budget, exchange)
                .await
                .map_err(|_| AgentError::Timeout(format!("connect {} via {}", addr, self.org)))??,
            None => exchange.await?,
        };

        debug!("Connected to {} via {}", addr, self.org);
        Ok(stream)
    }
}
