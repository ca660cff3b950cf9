//! Server module - TCP listener and orchestration
//!
//! Binds the broker's TCP listener and the heartbeat UDP socket on the same
//! port, loads the topic store from the durable log, and runs the accept loop
//! alongside the cluster tasks.

mod command_handlers;
mod connection;

pub use connection::handle_connection;

use crate::config::Config;
use crate::health::{ClusterView, HealthState, Phase};
use crate::subscription::SubscriptionRegistry;
use crate::topic::TopicStore;
use crate::topic_log::TopicLog;
use hrd_cluster::ClusterNode;
use hrd_core::{PeerAddress, Result, canonical_topic};
use hrd_network::StatusReport;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// State shared by every connection of one broker.
pub struct BrokerState {
    pub store: Arc<TopicStore>,
    pub registry: SubscriptionRegistry,
    pub log: Arc<dyn TopicLog>,
    pub cluster: ClusterNode,
    pub queue_depth: usize,
    next_connection_id: AtomicU64,
    /// Held across put, persist and notify so the log and subscribers see
    /// updates in the order the store applied them.
    apply_lock: Mutex<()>,
}

impl BrokerState {
    pub fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Put, then persist and notify if the value changed.
    ///
    /// Local publishes and gossiped updates both go through here. A failed
    /// persist is logged; the in-memory value stands. Lock order is apply,
    /// then store or registry, never the reverse.
    pub fn apply_update(&self, topic: &str, message: &str) -> bool {
        let _applying = self.apply_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.store.put(topic, message) {
            return false;
        }

        let topic = canonical_topic(topic);
        if let Err(e) = self.log.persist(&topic, message) {
            hrd_metrics::increment_persist_failures();
            error!(
                target: "herald::server",
                topic = %topic,
                error = %e,
                "Failed to persist topic update"
            );
        }

        self.registry.notify(&topic, message);
        true
    }
}

impl ClusterView for BrokerState {
    fn cluster_status(&self) -> StatusReport {
        self.cluster.status(self.store.len())
    }
}

pub struct Broker {
    listener: TcpListener,
    state: Arc<BrokerState>,
}

impl Broker {
    /// Bind sockets and load persisted topics. Nothing runs until [`Broker::run`].
    pub async fn bind(config: &Config, log: Arc<dyn TopicLog>) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let bound = listener.local_addr()?;

        // Heartbeats travel over UDP on the same port as the TCP listener.
        let socket = UdpSocket::bind(SocketAddr::new(bound.ip(), bound.port())).await?;

        let mut local = config.advertise_address()?;
        if local.port == 0 {
            local.port = bound.port();
        }

        let store = Arc::new(TopicStore::new());
        let loaded = store.load(log.load_all()?);

        let peers = config.initial_peers(&local)?;
        info!(
            target: "herald::server",
            node = %local,
            listen = %bound,
            peers = peers.len(),
            topics = loaded,
            "Broker bound"
        );

        let cluster = ClusterNode::new(
            config.cluster_config(local),
            peers,
            socket,
            Arc::clone(&store) as Arc<dyn hrd_cluster::SnapshotSource>,
        );

        let state = Arc::new(BrokerState {
            store,
            registry: SubscriptionRegistry::new(),
            log,
            cluster,
            queue_depth: config.subscriber_queue_depth,
            next_connection_id: AtomicU64::new(1),
            apply_lock: Mutex::new(()),
        });

        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn address(&self) -> &PeerAddress {
        self.state.cluster.local()
    }

    pub fn state(&self) -> Arc<BrokerState> {
        Arc::clone(&self.state)
    }

    /// Serve until shutdown. The listener and heartbeat socket are released
    /// when this returns.
    pub async fn run(
        self,
        shutdown_tx: broadcast::Sender<()>,
        health: Arc<HealthState>,
    ) -> Result<()> {
        let Self { listener, state } = self;
        let mut shutdown_rx = shutdown_tx.subscribe();
        let mut cluster_tasks = state.cluster.spawn(&shutdown_tx);

        health.enter(Phase::Serving);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(target: "herald::server", peer = %addr, "Accepted connection");
                        let state = Arc::clone(&state);
                        let rx = shutdown_tx.subscribe();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, state, rx).await {
                                debug!(
                                    target: "herald::server",
                                    peer = %addr,
                                    error = %e,
                                    "Connection ended with error"
                                );
                            }
                        });
                    },
                    Err(e) => {
                        warn!(target: "herald::server", error = %e, "Accept failed");
                    },
                },
                _ = shutdown_rx.recv() => {
                    info!(target: "herald::server", "Server shutting down");
                    break;
                }
            }
        }

        health.enter(Phase::Draining);
        drop(listener);

        while let Some(result) = cluster_tasks.join_next().await {
            if let Err(e) = result {
                warn!(target: "herald::server", error = %e, "Cluster task failed");
            }
        }

        info!(target: "herald::server", node = %state.cluster.local(), "Server stopped");
        Ok(())
    }
}
