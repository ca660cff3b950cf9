use hrd_core::PeerAddress;

/// Cluster state changes published on the node's event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// Peer missed heartbeats for longer than the failure threshold
    PeerSuspected(PeerAddress),
    /// Suspected peer resumed sending heartbeats
    PeerRecovered(PeerAddress),
    /// The recorded coordinator became suspected
    CoordinatorLost(PeerAddress),
    /// A coordinator was elected or announced
    CoordinatorChanged(PeerAddress),
}
