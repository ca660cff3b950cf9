//! Cluster membership for one broker.
//!
//! Wires the peer set, failure detector, election and gossip together and owns
//! their background tasks.

use crate::client::{PeerClient, PeerClientConfig};
use crate::election::{ElectionConfig, ElectionCoordinator, ElectionState};
use crate::failure::{FailureDetector, FailureDetectorConfig};
use crate::gossip::{GossipConfig, GossipReplicator, SnapshotSource};
use crate::peer::PeerSet;
use hrd_core::{PeerAddress, Role};
use hrd_network::{Message, StatusReport};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Address other brokers use to reach this one. Also its election priority.
    pub local: PeerAddress,
    pub peer_client: PeerClientConfig,
    pub failure: FailureDetectorConfig,
    pub election: ElectionConfig,
    pub gossip: GossipConfig,
}

impl ClusterConfig {
    pub fn new(local: PeerAddress) -> Self {
        Self {
            local,
            peer_client: PeerClientConfig::default(),
            failure: FailureDetectorConfig::default(),
            election: ElectionConfig::default(),
            gossip: GossipConfig::default(),
        }
    }
}

pub struct ClusterNode {
    peers: Arc<PeerSet>,
    state: Arc<ElectionState>,
    detector: Arc<FailureDetector>,
    election: Arc<ElectionCoordinator>,
    gossip: Arc<GossipReplicator>,
}

impl ClusterNode {
    /// `socket` must already be bound; heartbeats are sent from and received
    /// on it.
    pub fn new(
        config: ClusterConfig,
        initial_peers: Vec<PeerAddress>,
        socket: UdpSocket,
        source: Arc<dyn SnapshotSource>,
    ) -> Self {
        let peers = Arc::new(PeerSet::new(config.local, initial_peers));
        let state = Arc::new(ElectionState::new());
        let client = PeerClient::new(config.peer_client);
        let (events, _) = broadcast::channel(64);

        let detector = Arc::new(FailureDetector::new(
            Arc::clone(&peers),
            Arc::clone(&state),
            Arc::new(socket),
            config.failure,
            events.clone(),
        ));
        let election = Arc::new(ElectionCoordinator::new(
            Arc::clone(&peers),
            Arc::clone(&state),
            client.clone(),
            config.election,
            events,
        ));
        let gossip = Arc::new(GossipReplicator::new(
            Arc::clone(&peers),
            source,
            client,
            config.gossip,
        ));

        hrd_metrics::set_cluster_peers(peers.len() as u64, peers.alive_count() as u64);

        Self {
            peers,
            state,
            detector,
            election,
            gossip,
        }
    }

    /// Start the heartbeat, liveness, election and gossip loops.
    pub fn spawn(&self, shutdown: &broadcast::Sender<()>) -> JoinSet<()> {
        let mut tasks = JoinSet::new();

        let detector = Arc::clone(&self.detector);
        let rx = shutdown.subscribe();
        tasks.spawn(async move { detector.run_sender(rx).await });

        let detector = Arc::clone(&self.detector);
        let rx = shutdown.subscribe();
        tasks.spawn(async move { detector.run_receiver(rx).await });

        let detector = Arc::clone(&self.detector);
        let rx = shutdown.subscribe();
        tasks.spawn(async move { detector.run_evaluator(rx).await });

        let election = Arc::clone(&self.election);
        let rx = shutdown.subscribe();
        tasks.spawn(async move { election.run(rx).await });

        let gossip = Arc::clone(&self.gossip);
        let rx = shutdown.subscribe();
        tasks.spawn(async move { gossip.run(rx).await });

        info!(
            target: "hrd_cluster::node",
            node = %self.local(),
            peers = self.peers.len(),
            "Cluster tasks started"
        );

        tasks
    }

    #[must_use]
    pub fn local(&self) -> &PeerAddress {
        self.peers.local()
    }

    #[must_use]
    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.state.role()
    }

    #[must_use]
    pub fn coordinator(&self) -> Option<PeerAddress> {
        self.state.coordinator()
    }

    /// Register a peer learned at runtime.
    pub fn add_peer(&self, peer: PeerAddress) -> bool {
        let added = self.peers.add_peer(peer.clone());
        if added {
            info!(target: "hrd_cluster::node", peer = %peer, "Peer added");
            hrd_metrics::set_cluster_peers(
                self.peers.len() as u64,
                self.peers.alive_count() as u64,
            );
        }
        added
    }

    /// Answer the peer-to-peer messages owned by the cluster layer.
    ///
    /// Returns `None` for anything else so the caller can handle it.
    pub fn handle(&self, message: Message) -> Option<Message> {
        match message {
            Message::AddPeer { host, port } => {
                let changed = self.add_peer(PeerAddress::new(host, port));
                Some(Message::Ack { changed })
            },
            Message::Election { sender } => Some(self.election.handle_election(sender)),
            Message::Coordinator { sender } => Some(self.election.handle_coordinator(sender)),
            _ => None,
        }
    }

    #[must_use]
    pub fn status(&self, topic_count: usize) -> StatusReport {
        StatusReport {
            node: self.local().clone(),
            role: self.role(),
            coordinator: self.coordinator(),
            peers: self.peers.statuses(),
            topic_count,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct Empty;

    impl SnapshotSource for Empty {
        fn snapshot(&self) -> BTreeMap<String, String> {
            BTreeMap::new()
        }
    }

    async fn node(peers: Vec<PeerAddress>) -> ClusterNode {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let local = PeerAddress::from(socket.local_addr().unwrap());
        ClusterNode::new(ClusterConfig::new(local), peers, socket, Arc::new(Empty))
    }

    #[tokio::test]
    async fn test_handle_add_peer() {
        let node = node(vec![]).await;
        let peer = PeerAddress::new("127.0.0.1", 1);

        let reply = node.handle(Message::add_peer(&peer)).unwrap();
        assert_eq!(reply, Message::Ack { changed: true });
        let reply = node.handle(Message::add_peer(&peer)).unwrap();
        assert_eq!(reply, Message::Ack { changed: false });

        // Adding itself is a no-op.
        let reply = node.handle(Message::add_peer(node.local())).unwrap();
        assert_eq!(reply, Message::Ack { changed: false });
        assert_eq!(node.peers().len(), 1);
    }

    #[tokio::test]
    async fn test_handle_coordinator_updates_status() {
        let node = node(vec![]).await;
        let coordinator = PeerAddress::new("127.0.0.2", 7000);

        node.handle(Message::Coordinator {
            sender: coordinator.clone(),
        });

        let status = node.status(3);
        assert_eq!(status.role, Role::Follower);
        assert_eq!(status.coordinator, Some(coordinator));
        assert_eq!(status.topic_count, 3);
    }

    #[tokio::test]
    async fn test_handle_ignores_broker_messages() {
        let node = node(vec![]).await;
        assert!(node.handle(Message::Status {}).is_none());
        assert!(
            node.handle(Message::Fetch {
                topic: "a".to_string()
            })
            .is_none()
        );
    }

    #[tokio::test]
    async fn test_lone_node_elects_itself() {
        let node = node(vec![]).await;
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut tasks = node.spawn(&shutdown_tx);

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        while node.role() != Role::Coordinator && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(node.role(), Role::Coordinator);
        assert_eq!(node.coordinator().as_ref(), Some(node.local()));

        shutdown_tx.send(()).unwrap();
        while tasks.join_next().await.is_some() {}
    }
}
