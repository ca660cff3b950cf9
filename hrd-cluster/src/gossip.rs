//! Anti-entropy gossip.
//!
//! Every interval the node picks one known peer uniformly at random and pushes
//! its full topic snapshot as a `Sync` message. Push only: the receiver merges
//! and acknowledges, nothing flows back. Repeated rounds converge every
//! reachable node onto the same topic set.

use crate::client::PeerClient;
use crate::peer::PeerSet;
use hrd_core::{GOSSIP_INTERVAL, GOSSIP_TIMEOUT, HeraldError, PeerAddress, Result};
use hrd_network::Message;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Anything that can hand out a copy of the current topic map.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> BTreeMap<String, String>;
}

#[derive(Debug, Clone)]
pub struct GossipConfig {
    pub interval: Duration,
    /// Bound on one push, including the peer's acknowledgement.
    pub timeout: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            interval: GOSSIP_INTERVAL,
            timeout: GOSSIP_TIMEOUT,
        }
    }
}

pub struct GossipReplicator {
    peers: Arc<PeerSet>,
    source: Arc<dyn SnapshotSource>,
    client: PeerClient,
    config: GossipConfig,
}

impl GossipReplicator {
    pub fn new(
        peers: Arc<PeerSet>,
        source: Arc<dyn SnapshotSource>,
        client: PeerClient,
        config: GossipConfig,
    ) -> Self {
        Self {
            peers,
            source,
            client,
            config,
        }
    }

    fn pick_peer(&self) -> Option<PeerAddress> {
        let peers = self.peers.peers();
        peers.choose(&mut rand::thread_rng()).cloned()
    }

    /// Push the snapshot to one random peer.
    ///
    /// Returns the peer that acknowledged, or `None` if there was nobody to
    /// gossip with.
    pub async fn gossip_once(&self) -> Result<Option<PeerAddress>> {
        let Some(peer) = self.pick_peer() else {
            trace!(target: "hrd_cluster::gossip", "No peers to gossip with");
            return Ok(None);
        };

        let topics = self.source.snapshot();
        let topic_count = topics.len();

        let reply = self
            .client
            .request(&peer, &Message::Sync { topics }, self.config.timeout)
            .await;

        match reply {
            Ok(Message::Ack { changed }) => {
                hrd_metrics::increment_gossip_sent();
                trace!(
                    target: "hrd_cluster::gossip",
                    peer = %peer,
                    topics = topic_count,
                    changed,
                    "Gossip push acknowledged"
                );
                Ok(Some(peer))
            },
            Ok(other) => {
                hrd_metrics::increment_gossip_failed();
                Err(HeraldError::UnexpectedResponse(format!(
                    "{} answered Sync with {}",
                    peer,
                    other.kind().name()
                )))
            },
            Err(e) => {
                hrd_metrics::increment_gossip_failed();
                Err(e)
            },
        }
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the store is usually empty then.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.gossip_once().await {
                        debug!(target: "hrd_cluster::gossip", error = %e, "Gossip round failed");
                    }
                }
                _ = shutdown.recv() => {
                    debug!(target: "hrd_cluster::gossip", "Gossip loop stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use hrd_network::{read_message, write_message};
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_millis(500);

    struct FixedSource(BTreeMap<String, String>);

    impl SnapshotSource for FixedSource {
        fn snapshot(&self) -> BTreeMap<String, String> {
            self.0.clone()
        }
    }

    fn replicator(peers: Vec<PeerAddress>, topics: &[(&str, &str)]) -> GossipReplicator {
        let source = FixedSource(
            topics
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        );
        GossipReplicator::new(
            Arc::new(PeerSet::new(PeerAddress::new("127.0.0.1", 1), peers)),
            Arc::new(source),
            PeerClient::default(),
            GossipConfig {
                interval: Duration::from_millis(50),
                timeout: TIMEOUT,
            },
        )
    }

    /// Peer that records every `Sync` it receives and acks it.
    async fn recording_peer() -> (PeerAddress, Arc<Mutex<Vec<BTreeMap<String, String>>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = PeerAddress::from(listener.local_addr().unwrap());
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    if let Ok(Some(Message::Sync { topics })) = read_message(&mut stream, TIMEOUT).await {
                        sink.lock().unwrap().push(topics);
                        let _ = write_message(&mut stream, &Message::Ack { changed: true }, TIMEOUT)
                            .await;
                    }
                });
            }
        });

        (address, received)
    }

    #[tokio::test]
    async fn test_no_peers_is_a_noop() {
        let gossip = replicator(vec![], &[("a", "1")]);
        assert!(gossip.gossip_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pushes_full_snapshot() {
        let (peer, received) = recording_peer().await;
        let gossip = replicator(vec![peer.clone()], &[("aapl", "190"), ("msft", "410")]);

        assert_eq!(gossip.gossip_once().await.unwrap(), Some(peer));

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].get("aapl").map(String::as_str), Some("190"));
        assert_eq!(received[0].len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = PeerAddress::from(listener.local_addr().unwrap());
        drop(listener);

        let gossip = replicator(vec![dead], &[("a", "1")]);
        assert!(gossip.gossip_once().await.is_err());
    }

    #[tokio::test]
    async fn test_run_pushes_periodically() {
        let (peer, received) = recording_peer().await;
        let gossip = Arc::new(replicator(vec![peer], &[("a", "1")]));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let runner = Arc::clone(&gossip);
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(received.lock().unwrap().len() >= 2);
    }
}
