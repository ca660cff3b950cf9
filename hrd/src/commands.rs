use hrd_client::{BrokerClient, ClientConfig, PeerAddress, Result, StatusReport};
use std::fmt::Write;
use std::time::Duration;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Connect to the broker, retrying refused or timed out attempts so a
/// command issued while the broker restarts still goes through.
async fn connect(server_addr: &str) -> Result<BrokerClient> {
    let config = ClientConfig::new(server_addr);
    let mut attempt = 0;
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match BrokerClient::connect(config.clone()).await {
            Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                attempt += 1;
                tracing::debug!(
                    addr = server_addr,
                    attempt,
                    error = %e,
                    "Connect failed, retrying in {}ms",
                    backoff.as_millis()
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            },
            result => return result,
        }
    }
}

fn display_value(message: Option<&str>) -> &str {
    message.unwrap_or("(no value)")
}

pub async fn publish(server_addr: &str, topic: &str, message: &str) -> Result<()> {
    let mut client = connect(server_addr).await?;
    let changed = client.publish(topic, message).await?;

    if changed {
        println!("Published to '{}'", topic);
    } else {
        println!("'{}' already holds this value, nothing changed", topic);
    }

    client.close().await
}

pub async fn fetch(server_addr: &str, topic: &str) -> Result<()> {
    let mut client = connect(server_addr).await?;
    let message = client.fetch(topic).await?;

    println!("{}: {}", topic, display_value(message.as_deref()));

    client.close().await
}

/// Print updates as they arrive. Stops after `count` updates when given,
/// otherwise runs until the broker closes the connection.
pub async fn subscribe(server_addr: &str, topic: &str, count: Option<usize>) -> Result<()> {
    let client = connect(server_addr).await?;
    let mut subscription = client.subscribe(topic).await?;
    let mut received = 0usize;

    while count.is_none_or(|limit| received < limit) {
        let Some(update) = subscription.next().await? else {
            eprintln!("Broker closed the connection");
            break;
        };
        received += 1;
        println!(
            "{}: {}",
            update.topic,
            display_value(update.message.as_deref())
        );
    }

    Ok(())
}

pub async fn add_peer(server_addr: &str, peer: &PeerAddress) -> Result<()> {
    let mut client = connect(server_addr).await?;

    if client.add_peer(peer).await? {
        println!("Added peer {}", peer);
    } else {
        println!("Peer {} already known", peer);
    }

    client.close().await
}

pub async fn status(server_addr: &str) -> Result<()> {
    let mut client = connect(server_addr).await?;
    let report = client.status().await?;

    print!("{}", format_status(&report));

    client.close().await
}

fn format_status(report: &StatusReport) -> String {
    let mut out = String::new();
    let coordinator = report
        .coordinator
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown".to_string());

    let _ = writeln!(out, "Broker Status:");
    let _ = writeln!(out, "  Node:           {}", report.node);
    let _ = writeln!(out, "  Role:           {}", report.role);
    let _ = writeln!(out, "  Coordinator:    {}", coordinator);
    let _ = writeln!(out, "  Topics:         {}", report.topic_count);

    let alive = report.peers.iter().filter(|p| p.alive).count();
    let _ = writeln!(out, "  Peers:          {} ({} alive)", report.peers.len(), alive);

    if !report.peers.is_empty() {
        let _ = writeln!(out, "\nPeer States:");
        for peer in &report.peers {
            let state = if peer.alive { "alive" } else { "suspected" };
            let _ = writeln!(out, "  {}: {}", peer.address, state);
        }
    }

    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use hrd_client::PeerStatus;
    use hrd_client::ClientError;
    use hrd_core::Role;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_gives_up_after_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let started = std::time::Instant::now();
        let err = connect(&addr).await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionFailed(_)));
        // 100 + 200 + 400ms of backoff before the last attempt.
        assert!(started.elapsed() >= Duration::from_millis(700));
    }

    #[tokio::test]
    async fn test_connect_reaches_broker_that_starts_late() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        drop(listener);

        let broker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let listener = TcpListener::bind(local).await.unwrap();
            listener.accept().await.unwrap();
        });

        let client = connect(&local.to_string()).await.unwrap();
        broker.await.unwrap();
        drop(client);
    }

    #[test]
    fn test_format_status_lists_peers() {
        let report = StatusReport {
            node: PeerAddress::new("10.0.0.3", 7000),
            role: Role::Coordinator,
            coordinator: Some(PeerAddress::new("10.0.0.3", 7000)),
            peers: vec![
                PeerStatus {
                    address: PeerAddress::new("10.0.0.1", 7000),
                    alive: true,
                },
                PeerStatus {
                    address: PeerAddress::new("10.0.0.2", 7000),
                    alive: false,
                },
            ],
            topic_count: 4,
        };

        let text = format_status(&report);
        assert!(text.contains("Role:           coordinator"));
        assert!(text.contains("Peers:          2 (1 alive)"));
        assert!(text.contains("10.0.0.2:7000: suspected"));
    }

    #[test]
    fn test_format_status_without_coordinator() {
        let report = StatusReport {
            node: PeerAddress::new("127.0.0.1", 7000),
            role: Role::Electing,
            coordinator: None,
            peers: Vec::new(),
            topic_count: 0,
        };

        let text = format_status(&report);
        assert!(text.contains("Coordinator:    unknown"));
        assert!(!text.contains("Peer States"));
    }

    #[test]
    fn test_missing_value_is_labelled() {
        assert_eq!(display_value(None), "(no value)");
        assert_eq!(display_value(Some("12")), "12");
    }
}
