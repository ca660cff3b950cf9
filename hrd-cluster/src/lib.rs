#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]

//! Cluster layer for herald brokers.
//!
//! Brokers form a flat, statically configured cluster. Liveness comes from
//! UDP heartbeats, a single coordinator is chosen by bully election, and topic
//! state converges through periodic push gossip.

mod client;
mod discovery;
mod election;
mod event;
mod failure;
mod gossip;
mod node;
mod peer;

pub use client::{PeerClient, PeerClientConfig, PeerOutcome};
pub use discovery::{load_roster, parse_peer_list, parse_roster};
pub use election::{
    ElectionConfig, ElectionCoordinator, ElectionOutcome, ElectionState, ElectionTrigger,
};
pub use event::ClusterEvent;
pub use failure::{FailureDetector, FailureDetectorConfig};
pub use gossip::{GossipConfig, GossipReplicator, SnapshotSource};
pub use node::{ClusterConfig, ClusterNode};
pub use peer::{HeartbeatOutcome, Liveness, PeerSet, PeerState};
