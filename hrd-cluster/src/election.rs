//! Bully election.
//!
//! Priority is the [`PeerAddress`] ordering. On a trigger the node asks every
//! higher-priority peer whether it is alive. If none answers within the
//! election timeout the node declares itself coordinator and announces it to
//! every known peer. If any answers, the node steps back to follower and
//! waits for the winner's announcement.
//!
//! Announcements are applied unconditionally (last announcement wins), which
//! also cancels a local election that is still collecting answers.

use crate::client::PeerClient;
use crate::event::ClusterEvent;
use crate::peer::PeerSet;
use hrd_core::{ELECTION_TIMEOUT, PeerAddress, Role};
use hrd_network::Message;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tracing::{debug, info, warn};

/// Role and coordinator of the local node.
///
/// Role changes made by the election itself are compare-and-set, so two
/// overlapping triggers cannot both run an election or both claim victory.
pub struct ElectionState {
    role: AtomicU8,
    coordinator: watch::Sender<Option<PeerAddress>>,
}

impl Default for ElectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ElectionState {
    #[must_use]
    pub fn new() -> Self {
        let (coordinator, _) = watch::channel(None);
        Self {
            role: AtomicU8::new(Role::Follower as u8),
            coordinator,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        Role::from_u8(self.role.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn coordinator(&self) -> Option<PeerAddress> {
        self.coordinator.borrow().clone()
    }

    #[must_use]
    pub fn is_coordinator(&self) -> bool {
        self.role() == Role::Coordinator
    }

    /// Atomically move from `from` to `to`. Fails if the role is not `from`.
    pub fn transition(&self, from: Role, to: Role) -> bool {
        self.role
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Enter `Electing` from either stable role.
    pub fn begin_election(&self) -> bool {
        self.transition(Role::Follower, Role::Electing)
            || self.transition(Role::Coordinator, Role::Electing)
    }

    /// Finish a local election as winner. Fails if an announcement already
    /// moved the node out of `Electing`.
    pub fn claim(&self, local: &PeerAddress) -> bool {
        if !self.transition(Role::Electing, Role::Coordinator) {
            return false;
        }
        self.coordinator.send_replace(Some(local.clone()));
        true
    }

    /// Apply a coordinator announcement regardless of the current role.
    pub fn accept_coordinator(&self, coordinator: PeerAddress, local: &PeerAddress) {
        let role = if coordinator == *local {
            Role::Coordinator
        } else {
            Role::Follower
        };
        self.coordinator.send_replace(Some(coordinator));
        self.role.store(role as u8, Ordering::Release);
    }

    /// Receiver that observes every coordinator change made after this call.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Option<PeerAddress>> {
        self.coordinator.subscribe()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionTrigger {
    Startup,
    CoordinatorLost(PeerAddress),
    /// A lower-priority peer asked us to take part.
    ElectionRequest(PeerAddress),
    /// A higher peer answered but never announced itself.
    NoAnnouncement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionOutcome {
    Won,
    /// A higher peer answered and its announcement arrived.
    Deferred,
    /// An announcement arrived while the election was still running.
    Superseded,
    /// A higher peer answered but no announcement arrived in time.
    NoAnnouncement,
    AlreadyRunning,
}

#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Bound on waiting for answers from higher peers, and on waiting for the
    /// winner's announcement afterwards.
    pub election_timeout: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            election_timeout: ELECTION_TIMEOUT,
        }
    }
}

pub struct ElectionCoordinator {
    peers: Arc<PeerSet>,
    state: Arc<ElectionState>,
    client: PeerClient,
    config: ElectionConfig,
    events: broadcast::Sender<ClusterEvent>,
    trigger_tx: mpsc::Sender<ElectionTrigger>,
    trigger_rx: Mutex<mpsc::Receiver<ElectionTrigger>>,
}

impl ElectionCoordinator {
    pub fn new(
        peers: Arc<PeerSet>,
        state: Arc<ElectionState>,
        client: PeerClient,
        config: ElectionConfig,
        events: broadcast::Sender<ClusterEvent>,
    ) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(16);
        Self {
            peers,
            state,
            client,
            config,
            events,
            trigger_tx,
            trigger_rx: Mutex::new(trigger_rx),
        }
    }

    fn local(&self) -> &PeerAddress {
        self.peers.local()
    }

    #[must_use]
    pub fn state(&self) -> &Arc<ElectionState> {
        &self.state
    }

    /// Run the startup election, then serve triggers until shutdown.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut triggers = self.trigger_rx.lock().await;
        let mut events = self.events.subscribe();
        let mut next = Some(ElectionTrigger::Startup);

        loop {
            if let Some(trigger) = next.take() {
                let outcome = self.conduct_election(trigger).await;

                // Requests queued while the election ran are answered by its
                // result. A requester may have missed the announcement if it
                // asked after the broadcast reached it, so a winner repeats it.
                let requesters = drain_requests(&mut triggers);
                if outcome == ElectionOutcome::Won
                    && !requesters.is_empty()
                    && self.state.is_coordinator()
                {
                    debug!(
                        target: "hrd_cluster::election",
                        requesters = requesters.len(),
                        "Re-announcing to peers that asked during the election"
                    );
                    self.announce(requesters).await;
                }

                if outcome == ElectionOutcome::NoAnnouncement {
                    if !matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
                        break;
                    }
                    next = Some(ElectionTrigger::NoAnnouncement);
                    continue;
                }
            }

            tokio::select! {
                Some(trigger) = triggers.recv() => {
                    next = Some(trigger);
                }
                event = events.recv() => match event {
                    Ok(ClusterEvent::CoordinatorLost(peer)) => {
                        // Stale if a new coordinator was announced meanwhile.
                        if self.state.coordinator().as_ref() == Some(&peer) {
                            next = Some(ElectionTrigger::CoordinatorLost(peer));
                        }
                    },
                    Ok(_) => {},
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(target: "hrd_cluster::election", skipped, "Election lagged on cluster events");
                    },
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.recv() => {
                    debug!(target: "hrd_cluster::election", "Election loop stopping");
                    break;
                }
            }
        }
    }

    /// Run one round of the bully protocol.
    pub async fn conduct_election(&self, trigger: ElectionTrigger) -> ElectionOutcome {
        if !self.state.begin_election() {
            debug!(target: "hrd_cluster::election", trigger = ?trigger, "Election already in progress");
            return ElectionOutcome::AlreadyRunning;
        }

        hrd_metrics::increment_elections_started();
        info!(
            target: "hrd_cluster::election",
            node = %self.local(),
            trigger = ?trigger,
            "Starting election"
        );

        let mut announcements = self.state.watch();
        let higher = self.peers.higher_peers();

        if higher.is_empty() {
            return self.become_coordinator().await;
        }

        let request = Message::Election {
            sender: self.local().clone(),
        };
        let outcomes = self
            .client
            .broadcast(higher, request, self.config.election_timeout)
            .await;

        let answered = outcomes
            .iter()
            .filter(|o| matches!(o.result, Ok(Message::ElectionAck { .. })))
            .count();

        if answered == 0 {
            debug!(target: "hrd_cluster::election", "No higher-priority peer answered");
            return self.become_coordinator().await;
        }

        if !self.state.transition(Role::Electing, Role::Follower) {
            return ElectionOutcome::Superseded;
        }

        debug!(
            target: "hrd_cluster::election",
            answered,
            "Higher-priority peers answered, awaiting announcement"
        );

        match tokio::time::timeout(self.config.election_timeout, announcements.changed()).await {
            Ok(_) => ElectionOutcome::Deferred,
            Err(_) => {
                warn!(
                    target: "hrd_cluster::election",
                    timeout_ms = self.config.election_timeout.as_millis() as u64,
                    "No coordinator announcement received, restarting election"
                );
                ElectionOutcome::NoAnnouncement
            },
        }
    }

    async fn become_coordinator(&self) -> ElectionOutcome {
        let local = self.local().clone();
        if !self.state.claim(&local) {
            return ElectionOutcome::Superseded;
        }

        hrd_metrics::increment_elections_won();
        hrd_metrics::set_cluster_is_coordinator(true);
        info!(target: "hrd_cluster::election", node = %local, "Elected coordinator");
        let _ = self.events.send(ClusterEvent::CoordinatorChanged(local.clone()));

        let peers = self.peers.peers();
        let total = peers.len();
        let delivered = self.announce(peers).await;

        info!(
            target: "hrd_cluster::election",
            delivered,
            total,
            "Coordinator announcement sent"
        );

        ElectionOutcome::Won
    }

    /// Send a `Coordinator` announcement naming this node. Returns how many
    /// peers acknowledged it.
    async fn announce(&self, peers: Vec<PeerAddress>) -> usize {
        let outcomes = self
            .client
            .broadcast(
                peers,
                Message::Coordinator {
                    sender: self.local().clone(),
                },
                self.config.election_timeout,
            )
            .await;

        let mut delivered = 0;
        for outcome in &outcomes {
            match &outcome.result {
                Ok(_) => delivered += 1,
                Err(e) => warn!(
                    target: "hrd_cluster::election",
                    peer = %outcome.peer,
                    error = %e,
                    "Failed to announce coordinator"
                ),
            }
        }
        delivered
    }

    /// Answer an `Election` request.
    ///
    /// Only lower-priority senders get an acknowledgement; the node then makes
    /// sure it runs an election of its own.
    pub fn handle_election(&self, sender: PeerAddress) -> Message {
        if sender >= *self.local() {
            warn!(
                target: "hrd_cluster::election",
                sender = %sender,
                "Election request from a peer that does not rank lower"
            );
            return Message::error("election request must come from a lower-priority peer");
        }

        debug!(target: "hrd_cluster::election", sender = %sender, "Election request received");

        // A full queue already holds a pending election.
        let _ = self
            .trigger_tx
            .try_send(ElectionTrigger::ElectionRequest(sender));

        Message::ElectionAck {
            sender: self.local().clone(),
        }
    }

    /// Apply a `Coordinator` announcement.
    pub fn handle_coordinator(&self, sender: PeerAddress) -> Message {
        let previous = self.state.coordinator();
        let changed = previous.as_ref() != Some(&sender);

        self.state.accept_coordinator(sender.clone(), self.local());
        hrd_metrics::increment_coordinator_changes();
        hrd_metrics::set_cluster_is_coordinator(self.state.is_coordinator());

        if changed {
            info!(
                target: "hrd_cluster::election",
                coordinator = %sender,
                previous = ?previous.map(|p| p.to_string()),
                "Coordinator announced"
            );
        } else {
            debug!(target: "hrd_cluster::election", coordinator = %sender, "Coordinator re-announced");
        }

        let _ = self.events.send(ClusterEvent::CoordinatorChanged(sender));
        Message::Ack { changed }
    }
}

/// Empty the trigger queue, returning the peers that asked for an election.
fn drain_requests(triggers: &mut mpsc::Receiver<ElectionTrigger>) -> Vec<PeerAddress> {
    let mut requesters = Vec::new();
    while let Ok(trigger) = triggers.try_recv() {
        if let ElectionTrigger::ElectionRequest(peer) = trigger {
            if !requesters.contains(&peer) {
                requesters.push(peer);
            }
        }
    }
    requesters
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use hrd_network::{read_message, write_message};
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_millis(300);

    fn addr(port: u16) -> PeerAddress {
        PeerAddress::new("127.0.0.1", port)
    }

    fn coordinator(local: PeerAddress, peers: Vec<PeerAddress>) -> Arc<ElectionCoordinator> {
        let (events, _) = broadcast::channel(16);
        Arc::new(ElectionCoordinator::new(
            Arc::new(PeerSet::new(local, peers)),
            Arc::new(ElectionState::new()),
            PeerClient::default(),
            ElectionConfig {
                election_timeout: TIMEOUT,
            },
            events,
        ))
    }

    /// Peer that answers every request with `reply`.
    async fn scripted_peer(reply: Message) -> PeerAddress {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = PeerAddress::from(listener.local_addr().unwrap());
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let reply = reply.clone();
                tokio::spawn(async move {
                    if let Ok(Some(_)) = read_message(&mut stream, TIMEOUT).await {
                        let _ = write_message(&mut stream, &reply, TIMEOUT).await;
                    }
                });
            }
        });
        address
    }

    /// Peer that records every request and acks it.
    async fn recording_peer() -> (PeerAddress, Arc<std::sync::Mutex<Vec<Message>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = PeerAddress::from(listener.local_addr().unwrap());
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    if let Ok(Some(message)) = read_message(&mut stream, TIMEOUT).await {
                        sink.lock().unwrap().push(message);
                        let _ = write_message(&mut stream, &Message::Ack { changed: true }, TIMEOUT)
                            .await;
                    }
                });
            }
        });
        (address, received)
    }

    #[test]
    fn test_state_defaults() {
        let state = ElectionState::new();
        assert_eq!(state.role(), Role::Follower);
        assert!(state.coordinator().is_none());
    }

    #[test]
    fn test_transition_is_compare_and_set() {
        let state = ElectionState::new();
        assert!(state.begin_election());
        assert!(!state.begin_election());
        assert_eq!(state.role(), Role::Electing);

        assert!(!state.transition(Role::Follower, Role::Coordinator));
        assert!(state.claim(&addr(7000)));
        assert_eq!(state.role(), Role::Coordinator);
        assert_eq!(state.coordinator(), Some(addr(7000)));

        // A coordinator can start a new election.
        assert!(state.begin_election());
    }

    #[test]
    fn test_announcement_overrides_running_election() {
        let state = ElectionState::new();
        assert!(state.begin_election());

        state.accept_coordinator(addr(7005), &addr(7000));
        assert_eq!(state.role(), Role::Follower);
        assert_eq!(state.coordinator(), Some(addr(7005)));

        // The interrupted election can no longer claim victory.
        assert!(!state.claim(&addr(7000)));
        assert_eq!(state.coordinator(), Some(addr(7005)));
    }

    #[test]
    fn test_last_announcement_wins() {
        let state = ElectionState::new();
        state.accept_coordinator(addr(7005), &addr(7000));
        state.accept_coordinator(addr(7003), &addr(7000));
        assert_eq!(state.coordinator(), Some(addr(7003)));

        state.accept_coordinator(addr(7000), &addr(7000));
        assert_eq!(state.role(), Role::Coordinator);
    }

    #[tokio::test]
    async fn test_highest_node_wins_immediately() {
        let election = coordinator(addr(7009), vec![]);
        let outcome = election.conduct_election(ElectionTrigger::Startup).await;
        assert_eq!(outcome, ElectionOutcome::Won);
        assert_eq!(election.state().role(), Role::Coordinator);
        assert_eq!(election.state().coordinator(), Some(addr(7009)));
    }

    #[tokio::test]
    async fn test_wins_when_higher_peers_are_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = PeerAddress::from(listener.local_addr().unwrap());
        drop(listener);

        let election = coordinator(addr(1), vec![dead]);
        let outcome = election.conduct_election(ElectionTrigger::Startup).await;
        assert_eq!(outcome, ElectionOutcome::Won);
        assert_eq!(election.state().coordinator(), Some(addr(1)));
    }

    #[tokio::test]
    async fn test_defers_to_answering_higher_peer() {
        let higher = scripted_peer(Message::ElectionAck {
            sender: addr(65000),
        })
        .await;
        let election = coordinator(addr(1), vec![higher.clone()]);

        let announcer = Arc::clone(&election);
        let announced = higher.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            announcer.handle_coordinator(announced);
        });

        let outcome = election.conduct_election(ElectionTrigger::Startup).await;
        assert!(matches!(
            outcome,
            ElectionOutcome::Deferred | ElectionOutcome::Superseded
        ));
        assert_eq!(election.state().role(), Role::Follower);
        assert_eq!(election.state().coordinator(), Some(higher));
    }

    #[tokio::test]
    async fn test_missing_announcement_is_reported() {
        let higher = scripted_peer(Message::ElectionAck {
            sender: addr(65000),
        })
        .await;
        let election = coordinator(addr(1), vec![higher]);

        let outcome = election.conduct_election(ElectionTrigger::Startup).await;
        assert_eq!(outcome, ElectionOutcome::NoAnnouncement);
        assert_eq!(election.state().role(), Role::Follower);
        assert!(election.state().coordinator().is_none());
    }

    #[tokio::test]
    async fn test_non_ack_reply_counts_as_no_answer() {
        let higher = scripted_peer(Message::Ack { changed: false }).await;
        let election = coordinator(addr(1), vec![higher]);

        let outcome = election.conduct_election(ElectionTrigger::Startup).await;
        assert_eq!(outcome, ElectionOutcome::Won);
    }

    #[tokio::test]
    async fn test_handle_election_from_lower_peer() {
        let election = coordinator(addr(7005), vec![addr(7001)]);
        let reply = election.handle_election(addr(7001));
        assert_eq!(reply, Message::ElectionAck { sender: addr(7005) });

        let reply = election.handle_election(addr(7009));
        assert!(matches!(reply, Message::Error { .. }));
    }

    #[tokio::test]
    async fn test_handle_coordinator_reports_change() {
        let election = coordinator(addr(7000), vec![addr(7005)]);
        assert_eq!(
            election.handle_coordinator(addr(7005)),
            Message::Ack { changed: true }
        );
        assert_eq!(
            election.handle_coordinator(addr(7005)),
            Message::Ack { changed: false }
        );
        assert_eq!(election.state().coordinator(), Some(addr(7005)));
    }

    #[tokio::test]
    async fn test_winner_reannounces_to_queued_requesters() {
        let (lower, received) = recording_peer().await;
        let local = PeerAddress::new("127.0.0.2", 7000);
        let election = coordinator(local.clone(), vec![lower.clone()]);

        // Queued before the startup round, so it is drained after the win.
        assert!(matches!(
            election.handle_election(lower),
            Message::ElectionAck { .. }
        ));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let runner = Arc::clone(&election);
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        let announcements = || {
            received
                .lock()
                .unwrap()
                .iter()
                .filter(|m| **m == Message::Coordinator { sender: local.clone() })
                .count()
        };
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while announcements() < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(announcements(), 2);
        assert!(election.state().is_coordinator());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_drain_keeps_only_distinct_requesters() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.try_send(ElectionTrigger::ElectionRequest(addr(1))).unwrap();
        tx.try_send(ElectionTrigger::NoAnnouncement).unwrap();
        tx.try_send(ElectionTrigger::ElectionRequest(addr(1))).unwrap();
        tx.try_send(ElectionTrigger::ElectionRequest(addr(2))).unwrap();

        assert_eq!(drain_requests(&mut rx), vec![addr(1), addr(2)]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let election = coordinator(addr(7009), vec![]);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let runner = Arc::clone(&election);
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(election.state().is_coordinator());

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
