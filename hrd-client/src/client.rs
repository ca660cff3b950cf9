use crate::error::{ClientError, Result};
use hrd_core::{PeerAddress, canonical_topic};
use hrd_network::{Message, StatusReport, read_message, read_message_idle, write_message};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Turn a broker `Error` reply into a client error, pass anything else on.
fn reject_error(message: Message) -> Result<Message> {
    match message {
        Message::Error { message } => Err(ClientError::ServerError(message)),
        other => Ok(other),
    }
}

fn unexpected(expected: &str, got: &Message) -> ClientError {
    ClientError::InvalidResponse(format!(
        "Expected {}, got {}",
        expected,
        got.kind().name()
    ))
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker address as `host:port`
    pub addr: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: format!("127.0.0.1:{}", hrd_core::DEFAULT_PORT),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }
}

/// One value delivered on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub topic: String,
    /// `None` when nothing has been published on the topic yet.
    pub message: Option<String>,
}

/// Request/response connection to a single broker.
pub struct BrokerClient {
    stream: TcpStream,
    config: ClientConfig,
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("addr", &self.config.addr)
            .finish()
    }
}

impl BrokerClient {
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        debug!(addr = %config.addr, "Connecting to herald broker");

        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect(config.addr.as_str()),
        )
        .await
        .map_err(|_| ClientError::Timeout)?
        .map_err(ClientError::ConnectionFailed)?;

        stream.set_nodelay(true)?;

        debug!(addr = %config.addr, "Connected to herald broker");

        Ok(Self { stream, config })
    }

    /// Connect with default timeouts.
    pub async fn connect_to(addr: &str) -> Result<Self> {
        Self::connect(ClientConfig::new(addr)).await
    }

    async fn send(&mut self, message: &Message) -> Result<()> {
        trace!(kind = message.kind().name(), "Sending request");
        write_message(&mut self.stream, message, self.config.write_timeout).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Message> {
        match read_message(&mut self.stream, self.config.read_timeout).await? {
            Some(message) => reject_error(message),
            None => Err(ClientError::ConnectionClosed),
        }
    }

    async fn request(&mut self, message: Message) -> Result<Message> {
        self.send(&message).await?;
        self.recv().await
    }

    /// Publish a value. Returns whether the topic's stored value changed.
    pub async fn publish(&mut self, topic: &str, message: &str) -> Result<bool> {
        let reply = self
            .request(Message::Publish {
                topic: topic.to_string(),
                message: message.to_string(),
            })
            .await?;

        match reply {
            Message::Ack { changed } => Ok(changed),
            other => Err(unexpected("Ack", &other)),
        }
    }

    /// Current value of a topic, `None` if nothing was ever published.
    pub async fn fetch(&mut self, topic: &str) -> Result<Option<String>> {
        let reply = self
            .request(Message::Fetch {
                topic: topic.to_string(),
            })
            .await?;

        match reply {
            Message::Update { message, .. } => Ok(message),
            other => Err(unexpected("Update", &other)),
        }
    }

    /// Ask the broker to add a peer. Returns false if it already knew it.
    pub async fn add_peer(&mut self, peer: &PeerAddress) -> Result<bool> {
        match self.request(Message::add_peer(peer)).await? {
            Message::Ack { changed } => Ok(changed),
            other => Err(unexpected("Ack", &other)),
        }
    }

    pub async fn status(&mut self) -> Result<StatusReport> {
        match self.request(Message::Status {}).await? {
            Message::StatusReport(report) => Ok(report),
            other => Err(unexpected("StatusReport", &other)),
        }
    }

    /// Turn this connection into a subscription on `topic`.
    ///
    /// The first update is the topic's current value.
    pub async fn subscribe(mut self, topic: &str) -> Result<Subscription> {
        self.send(&Message::Subscribe {
            topic: topic.to_string(),
        })
        .await?;

        Ok(Subscription {
            topics: vec![canonical_topic(topic)],
            stream: self.stream,
            config: self.config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn close(mut self) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Stream of updates for one or more subscribed topics.
pub struct Subscription {
    stream: TcpStream,
    config: ClientConfig,
    topics: Vec<String>,
}

impl Subscription {
    /// Topics subscribed on this connection, canonicalized.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Add another topic to this subscription.
    pub async fn subscribe(&mut self, topic: &str) -> Result<()> {
        write_message(
            &mut self.stream,
            &Message::Subscribe {
                topic: topic.to_string(),
            },
            self.config.write_timeout,
        )
        .await?;

        let topic = canonical_topic(topic);
        if !self.topics.contains(&topic) {
            self.topics.push(topic);
        }
        Ok(())
    }

    /// Wait for the next update. Returns `Ok(None)` once the broker closes
    /// the connection.
    pub async fn next(&mut self) -> Result<Option<Update>> {
        let message = match read_message_idle(&mut self.stream, self.config.read_timeout).await? {
            Some(message) => reject_error(message)?,
            None => return Ok(None),
        };

        match message {
            Message::Update { topic, message } => Ok(Some(Update { topic, message })),
            other => Err(unexpected("Update", &other)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accept one connection and answer each request with the scripted reply.
    async fn scripted_broker(replies: Vec<Message>) -> (String, tokio::task::JoinHandle<Vec<Message>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            for reply in replies {
                let request = read_message(&mut stream, Duration::from_secs(5))
                    .await
                    .unwrap()
                    .unwrap();
                received.push(request);
                write_message(&mut stream, &reply, Duration::from_secs(5))
                    .await
                    .unwrap();
            }
            received
        });

        (addr, handle)
    }

    #[tokio::test]
    async fn test_publish_returns_changed_flag() {
        let (addr, broker) = scripted_broker(vec![Message::Ack { changed: true }]).await;

        let mut client = BrokerClient::connect_to(&addr).await.unwrap();
        assert!(client.publish("AAPL", "189.5").await.unwrap());

        let received = broker.await.unwrap();
        assert_eq!(
            received[0],
            Message::Publish {
                topic: "AAPL".into(),
                message: "189.5".into()
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_of_unpublished_topic_is_none() {
        let (addr, broker) = scripted_broker(vec![Message::Update {
            topic: "msft".into(),
            message: None,
        }])
        .await;

        let mut client = BrokerClient::connect_to(&addr).await.unwrap();
        assert_eq!(client.fetch("MSFT").await.unwrap(), None);
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_error_reply_becomes_server_error() {
        let (addr, broker) =
            scripted_broker(vec![Message::error("topic name must not be empty")]).await;

        let mut client = BrokerClient::connect_to(&addr).await.unwrap();
        let err = client.publish("", "x").await.unwrap_err();
        assert!(matches!(err, ClientError::ServerError(ref m) if m.contains("empty")));
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_reply_kind_is_invalid_response() {
        let (addr, broker) = scripted_broker(vec![Message::Ack { changed: false }]).await;

        let mut client = BrokerClient::connect_to(&addr).await.unwrap();
        let err = client.status().await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse(_)));
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_subscription_yields_updates_until_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let broker = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_message(&mut stream, Duration::from_secs(5))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(request, Message::Subscribe { topic: "AAPL".into() });

            for message in [None, Some("190".to_string())] {
                let update = Message::Update {
                    topic: "aapl".into(),
                    message,
                };
                write_message(&mut stream, &update, Duration::from_secs(5))
                    .await
                    .unwrap();
            }
        });

        let client = BrokerClient::connect_to(&addr).await.unwrap();
        let mut subscription = client.subscribe("AAPL").await.unwrap();
        assert_eq!(subscription.topics(), ["aapl".to_string()]);

        let first = subscription.next().await.unwrap().unwrap();
        assert_eq!(first.message, None);
        let second = subscription.next().await.unwrap().unwrap();
        assert_eq!(second.message.as_deref(), Some("190"));

        broker.await.unwrap();
        assert!(subscription.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = BrokerClient::connect_to(&addr).await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionFailed(_)));
    }
}
