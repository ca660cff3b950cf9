//! UDP heartbeat failure detector.
//!
//! Three loops share one UDP socket bound on the node's own port:
//! - the sender pushes a `Heartbeat` datagram to every known peer,
//! - the receiver records heartbeats from known peers,
//! - the evaluator marks peers that have been silent too long as suspected.
//!
//! Losing the current coordinator is published as
//! [`ClusterEvent::CoordinatorLost`], which the election loop acts on.

use crate::election::ElectionState;
use crate::event::ClusterEvent;
use crate::peer::{HeartbeatOutcome, PeerSet};
use hrd_core::{FAILURE_THRESHOLD, HEARTBEAT_INTERVAL, LIVENESS_CHECK_INTERVAL, Result, Role};
use hrd_network::{MAX_DATAGRAM_SIZE, Message, decode_datagram, encode_frame};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone)]
pub struct FailureDetectorConfig {
    pub heartbeat_interval: Duration,
    /// A peer silent for longer than this is suspected.
    pub failure_threshold: Duration,
    pub check_interval: Duration,
}

impl Default for FailureDetectorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            failure_threshold: FAILURE_THRESHOLD,
            check_interval: LIVENESS_CHECK_INTERVAL,
        }
    }
}

pub struct FailureDetector {
    peers: Arc<PeerSet>,
    state: Arc<ElectionState>,
    socket: Arc<UdpSocket>,
    config: FailureDetectorConfig,
    events: broadcast::Sender<ClusterEvent>,
}

impl FailureDetector {
    pub fn new(
        peers: Arc<PeerSet>,
        state: Arc<ElectionState>,
        socket: Arc<UdpSocket>,
        config: FailureDetectorConfig,
        events: broadcast::Sender<ClusterEvent>,
    ) -> Self {
        Self {
            peers,
            state,
            socket,
            config,
            events,
        }
    }

    /// Send one heartbeat to every known peer. Returns how many were sent.
    pub async fn send_heartbeats(&self) -> Result<usize> {
        let frame = encode_frame(&Message::Heartbeat {
            sender: self.peers.local().clone(),
        })?;

        let mut sent = 0;
        for peer in self.peers.peers() {
            match self
                .socket
                .send_to(&frame, (peer.host.as_str(), peer.port))
                .await
            {
                Ok(_) => {
                    sent += 1;
                    hrd_metrics::increment_heartbeats_sent();
                },
                Err(e) => {
                    hrd_metrics::increment_heartbeat_send_failures();
                    debug!(
                        target: "hrd_cluster::failure",
                        peer = %peer,
                        error = %e,
                        "Heartbeat send failed"
                    );
                },
            }
        }
        Ok(sent)
    }

    /// Apply one received datagram. Malformed datagrams and heartbeats from
    /// unknown senders are dropped.
    pub fn handle_datagram(&self, buf: &[u8], now: Instant) -> HeartbeatOutcome {
        let sender = match decode_datagram(buf) {
            Ok(Message::Heartbeat { sender }) => sender,
            Ok(other) => {
                debug!(
                    target: "hrd_cluster::failure",
                    kind = ?other.kind(),
                    "Ignoring non-heartbeat datagram"
                );
                return HeartbeatOutcome::Unknown;
            },
            Err(e) => {
                debug!(target: "hrd_cluster::failure", error = %e, "Dropping malformed datagram");
                return HeartbeatOutcome::Unknown;
            },
        };

        let outcome = self.peers.record_heartbeat(&sender, now);
        match outcome {
            HeartbeatOutcome::Unknown => {
                trace!(target: "hrd_cluster::failure", sender = %sender, "Heartbeat from unknown sender");
            },
            HeartbeatOutcome::Refreshed => {
                hrd_metrics::increment_heartbeats_received();
            },
            HeartbeatOutcome::Recovered => {
                hrd_metrics::increment_heartbeats_received();
                info!(target: "hrd_cluster::failure", peer = %sender, "Peer recovered");
                let _ = self.events.send(ClusterEvent::PeerRecovered(sender));
                self.publish_peer_gauges();
            },
        }
        outcome
    }

    /// Suspect every peer silent past the threshold and publish the events.
    ///
    /// `CoordinatorLost` is raised when the recorded coordinator becomes
    /// suspected, and again on every later scan that still finds it suspected
    /// while no election is running.
    pub fn evaluate(&self, now: Instant) -> Vec<hrd_core::PeerAddress> {
        let suspected = self.peers.evaluate(now, self.config.failure_threshold);
        let coordinator = self.state.coordinator();

        for peer in &suspected {
            hrd_metrics::increment_peers_suspected();
            warn!(
                target: "hrd_cluster::failure",
                peer = %peer,
                threshold_ms = self.config.failure_threshold.as_millis() as u64,
                "Peer suspected"
            );
            let _ = self.events.send(ClusterEvent::PeerSuspected(peer.clone()));
        }

        if let Some(coordinator) = coordinator {
            if suspected.contains(&coordinator) {
                warn!(target: "hrd_cluster::failure", coordinator = %coordinator, "Coordinator lost");
                let _ = self.events.send(ClusterEvent::CoordinatorLost(coordinator));
            } else if self.peers.contains(&coordinator)
                && !self.peers.is_alive(&coordinator)
                && self.state.role() != Role::Electing
            {
                debug!(
                    target: "hrd_cluster::failure",
                    coordinator = %coordinator,
                    "Recorded coordinator still suspected"
                );
                let _ = self.events.send(ClusterEvent::CoordinatorLost(coordinator));
            }
        }

        if !suspected.is_empty() {
            self.publish_peer_gauges();
        }
        suspected
    }

    fn publish_peer_gauges(&self) {
        hrd_metrics::set_cluster_peers(
            self.peers.len() as u64,
            self.peers.alive_count() as u64,
        );
    }

    pub async fn run_sender(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.send_heartbeats().await {
                        warn!(target: "hrd_cluster::failure", error = %e, "Failed to build heartbeat");
                    }
                }
                _ = shutdown.recv() => {
                    debug!(target: "hrd_cluster::failure", "Heartbeat sender stopping");
                    break;
                }
            }
        }
    }

    pub async fn run_receiver(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => {
                        trace!(target: "hrd_cluster::failure", from = %from, len, "Datagram received");
                        self.handle_datagram(&buf[..len], Instant::now());
                    },
                    Err(e) => {
                        // ICMP unreachable from a dead peer surfaces here on some platforms.
                        debug!(target: "hrd_cluster::failure", error = %e, "Heartbeat receive failed");
                    },
                },
                _ = shutdown.recv() => {
                    debug!(target: "hrd_cluster::failure", "Heartbeat receiver stopping");
                    break;
                }
            }
        }
    }

    pub async fn run_evaluator(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.evaluate(Instant::now());
                }
                _ = shutdown.recv() => {
                    debug!(target: "hrd_cluster::failure", "Liveness evaluator stopping");
                    break;
                }
            }
        }
    }
}
