//! Request/response client for talking to other brokers.
//!
//! Each request opens a fresh TCP connection, writes one message and reads one
//! reply. Peer traffic is infrequent (one gossip push per interval, a handful
//! of election messages) so there is no connection pool.

use hrd_core::{CONNECT_TIMEOUT, HeraldError, PeerAddress, Result};
use hrd_network::{Message, read_message, write_message};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PeerClientConfig {
    pub connect_timeout: Duration,
}

impl Default for PeerClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

/// Outcome of one attempt against one peer.
#[derive(Debug)]
pub struct PeerOutcome {
    pub peer: PeerAddress,
    pub result: Result<Message>,
}

impl PeerOutcome {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PeerClient {
    config: PeerClientConfig,
}

impl PeerClient {
    #[must_use]
    pub fn new(config: PeerClientConfig) -> Self {
        Self { config }
    }

    async fn connect(&self, peer: &PeerAddress) -> Result<TcpStream> {
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((peer.host.as_str(), peer.port)),
        )
        .await
        .map_err(|_| HeraldError::Timeout("connect to peer"))??;

        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Send `message` and wait up to `timeout` for the reply.
    ///
    /// An `Error` reply, or a reply that is itself a request, is returned as
    /// `UnexpectedResponse`.
    pub async fn request(
        &self,
        peer: &PeerAddress,
        message: &Message,
        timeout: Duration,
    ) -> Result<Message> {
        let mut stream = self.connect(peer).await?;

        write_message(&mut stream, message, timeout).await?;

        match read_message(&mut stream, timeout).await? {
            Some(Message::Error { message }) => Err(HeraldError::UnexpectedResponse(message)),
            Some(reply) if !reply.kind().is_response() => Err(HeraldError::UnexpectedResponse(
                format!("{} is not a response", reply.kind().name()),
            )),
            Some(reply) => Ok(reply),
            None => Err(HeraldError::ConnectionClosed),
        }
    }

    /// Send `message` to every peer concurrently, attempting each once.
    ///
    /// Failures never abort the remaining peers; every peer gets an outcome.
    pub async fn broadcast(
        &self,
        peers: Vec<PeerAddress>,
        message: Message,
        timeout: Duration,
    ) -> Vec<PeerOutcome> {
        let mut join_set = JoinSet::new();

        for peer in peers {
            let client = self.clone();
            let message = message.clone();
            join_set.spawn(async move {
                let result = client.request(&peer, &message, timeout).await;
                PeerOutcome { peer, result }
            });
        }

        let mut outcomes = Vec::with_capacity(join_set.len());
        while let Some(join_result) = join_set.join_next().await {
            match join_result {
                Ok(outcome) => {
                    if let Err(e) = &outcome.result {
                        debug!(
                            target: "hrd_cluster::client",
                            peer = %outcome.peer,
                            kind = ?message.kind(),
                            error = %e,
                            "Peer request failed"
                        );
                    }
                    outcomes.push(outcome);
                },
                Err(e) => {
                    warn!(target: "hrd_cluster::client", error = %e, "Peer request task failed");
                },
            }
        }

        outcomes.sort_by(|a, b| a.peer.cmp(&b.peer));
        outcomes
    }
}
