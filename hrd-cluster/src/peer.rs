//! Known peers and their liveness.
//!
//! Every peer the node has ever learned about (static configuration, roster
//! file or a runtime `add_peer`) keeps a [`PeerState`] for the life of the
//! process. Records are never removed: a peer that comes back simply resumes
//! sending heartbeats and is marked alive again.
//!
//! Only the failure detector writes liveness; election and gossip read it.

use hrd_core::PeerAddress;
use hrd_network::PeerStatus;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Suspected,
}

#[derive(Debug, Clone)]
pub struct PeerState {
    pub address: PeerAddress,
    pub last_heartbeat_at: Instant,
    pub liveness: Liveness,
}

impl PeerState {
    fn new(address: PeerAddress, now: Instant) -> Self {
        Self {
            address,
            last_heartbeat_at: now,
            liveness: Liveness::Alive,
        }
    }

    /// Time since the last heartbeat.
    #[must_use]
    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat_at)
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.liveness == Liveness::Alive
    }
}

/// Result of recording a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Sender is not a known peer; the heartbeat was ignored.
    Unknown,
    Refreshed,
    /// Sender was suspected and is alive again.
    Recovered,
}

pub struct PeerSet {
    local: PeerAddress,
    peers: RwLock<BTreeMap<PeerAddress, PeerState>>,
}

impl PeerSet {
    pub fn new(local: PeerAddress, initial: impl IntoIterator<Item = PeerAddress>) -> Self {
        let set = Self {
            local,
            peers: RwLock::new(BTreeMap::new()),
        };
        for peer in initial {
            set.add_peer(peer);
        }
        set
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<PeerAddress, PeerState>> {
        self.peers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<PeerAddress, PeerState>> {
        self.peers.write().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn local(&self) -> &PeerAddress {
        &self.local
    }

    /// Add a peer. Returns false for the local address or an already known peer.
    pub fn add_peer(&self, address: PeerAddress) -> bool {
        if address == self.local {
            return false;
        }

        let mut peers = self.write();
        if peers.contains_key(&address) {
            return false;
        }
        peers.insert(address.clone(), PeerState::new(address, Instant::now()));
        true
    }

    #[must_use]
    pub fn contains(&self, address: &PeerAddress) -> bool {
        self.read().contains_key(address)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All known peers in priority order (lowest first).
    #[must_use]
    pub fn peers(&self) -> Vec<PeerAddress> {
        self.read().keys().cloned().collect()
    }

    /// Peers that outrank the local node in an election.
    #[must_use]
    pub fn higher_peers(&self) -> Vec<PeerAddress> {
        self.read()
            .keys()
            .filter(|addr| **addr > self.local)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn get(&self, address: &PeerAddress) -> Option<PeerState> {
        self.read().get(address).cloned()
    }

    #[must_use]
    pub fn is_alive(&self, address: &PeerAddress) -> bool {
        self.read().get(address).is_some_and(PeerState::is_alive)
    }

    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.read().values().filter(|p| p.is_alive()).count()
    }

    pub fn record_heartbeat(&self, address: &PeerAddress, now: Instant) -> HeartbeatOutcome {
        let mut peers = self.write();
        let Some(state) = peers.get_mut(address) else {
            return HeartbeatOutcome::Unknown;
        };

        state.last_heartbeat_at = now;
        match state.liveness {
            Liveness::Alive => HeartbeatOutcome::Refreshed,
            Liveness::Suspected => {
                state.liveness = Liveness::Alive;
                HeartbeatOutcome::Recovered
            },
        }
    }

    /// Mark every peer silent for longer than `threshold` as suspected.
    ///
    /// Returns only the peers that moved from alive to suspected in this call.
    pub fn evaluate(&self, now: Instant, threshold: Duration) -> Vec<PeerAddress> {
        let mut newly_suspected = Vec::new();
        let mut peers = self.write();

        for state in peers.values_mut() {
            if state.is_alive() && state.silence(now) > threshold {
                state.liveness = Liveness::Suspected;
                newly_suspected.push(state.address.clone());
            }
        }

        newly_suspected
    }

    #[must_use]
    pub fn statuses(&self) -> Vec<PeerStatus> {
        self.read()
            .values()
            .map(|p| PeerStatus {
                address: p.address.clone(),
                alive: p.is_alive(),
            })
            .collect()
    }
}
