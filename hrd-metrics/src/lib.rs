#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

// Topic traffic
pub static PUBLISHES_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static PUBLISHES_UNCHANGED: AtomicU64 = AtomicU64::new(0);
pub static SUBSCRIPTIONS_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static NOTIFICATIONS_DELIVERED: AtomicU64 = AtomicU64::new(0);
pub static SUBSCRIBERS_PRUNED: AtomicU64 = AtomicU64::new(0);
pub static PERSIST_FAILURES: AtomicU64 = AtomicU64::new(0);

// Connections
pub static CONNECTIONS_ACTIVE: AtomicU64 = AtomicU64::new(0);
pub static CONNECTIONS_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static PROTOCOL_ERRORS: AtomicU64 = AtomicU64::new(0);

// Gossip
pub static GOSSIP_PUSHES_SENT: AtomicU64 = AtomicU64::new(0);
pub static GOSSIP_PUSHES_FAILED: AtomicU64 = AtomicU64::new(0);
pub static SYNC_TOPICS_MERGED: AtomicU64 = AtomicU64::new(0);

// Failure detection
pub static HEARTBEATS_SENT: AtomicU64 = AtomicU64::new(0);
pub static HEARTBEATS_RECEIVED: AtomicU64 = AtomicU64::new(0);
pub static HEARTBEAT_SEND_FAILURES: AtomicU64 = AtomicU64::new(0);
pub static PEERS_SUSPECTED: AtomicU64 = AtomicU64::new(0);

// Election
pub static ELECTIONS_STARTED: AtomicU64 = AtomicU64::new(0);
pub static ELECTIONS_WON: AtomicU64 = AtomicU64::new(0);
pub static COORDINATOR_CHANGES: AtomicU64 = AtomicU64::new(0);

// Cluster gauges
pub static CLUSTER_IS_COORDINATOR: AtomicU64 = AtomicU64::new(0);
pub static CLUSTER_PEER_COUNT: AtomicU64 = AtomicU64::new(0);
pub static CLUSTER_PEERS_ALIVE: AtomicU64 = AtomicU64::new(0);

#[inline]
pub fn increment_publishes() {
    PUBLISHES_TOTAL.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_publishes_unchanged() {
    PUBLISHES_UNCHANGED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_subscriptions() {
    SUBSCRIPTIONS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_notifications_delivered(count: u64) {
    NOTIFICATIONS_DELIVERED.fetch_add(count, Ordering::Relaxed);
}

#[inline]
pub fn increment_subscribers_pruned(count: u64) {
    SUBSCRIBERS_PRUNED.fetch_add(count, Ordering::Relaxed);
}

#[inline]
pub fn increment_persist_failures() {
    PERSIST_FAILURES.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_connections() {
    CONNECTIONS_ACTIVE.fetch_add(1, Ordering::Relaxed);
    CONNECTIONS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn decrement_connections() {
    CONNECTIONS_ACTIVE.fetch_sub(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_protocol_errors() {
    PROTOCOL_ERRORS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_gossip_sent() {
    GOSSIP_PUSHES_SENT.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_gossip_failed() {
    GOSSIP_PUSHES_FAILED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_sync_topics_merged(count: u64) {
    SYNC_TOPICS_MERGED.fetch_add(count, Ordering::Relaxed);
}

#[inline]
pub fn increment_heartbeats_sent() {
    HEARTBEATS_SENT.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_heartbeats_received() {
    HEARTBEATS_RECEIVED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_heartbeat_send_failures() {
    HEARTBEAT_SEND_FAILURES.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_peers_suspected() {
    PEERS_SUSPECTED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_elections_started() {
    ELECTIONS_STARTED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_elections_won() {
    ELECTIONS_WON.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_coordinator_changes() {
    COORDINATOR_CHANGES.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn set_cluster_is_coordinator(is_coordinator: bool) {
    CLUSTER_IS_COORDINATOR.store(u64::from(is_coordinator), Ordering::Relaxed);
}

#[inline]
pub fn set_cluster_peers(total: u64, alive: u64) {
    CLUSTER_PEER_COUNT.store(total, Ordering::Relaxed);
    CLUSTER_PEERS_ALIVE.store(alive, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub publishes_total: u64,
    pub publishes_unchanged: u64,
    pub subscriptions_total: u64,
    pub notifications_delivered: u64,
    pub subscribers_pruned: u64,
    pub persist_failures: u64,
    pub connections_active: u64,
    pub connections_total: u64,
    pub protocol_errors: u64,
    pub gossip_pushes_sent: u64,
    pub gossip_pushes_failed: u64,
    pub sync_topics_merged: u64,
    pub heartbeats_sent: u64,
    pub heartbeats_received: u64,
    pub heartbeat_send_failures: u64,
    pub peers_suspected: u64,
    pub elections_started: u64,
    pub elections_won: u64,
    pub coordinator_changes: u64,
    pub cluster_is_coordinator: u64,
    pub cluster_peer_count: u64,
    pub cluster_peers_alive: u64,
}

impl MetricsSnapshot {
    pub fn capture() -> Self {
        Self {
            publishes_total: PUBLISHES_TOTAL.load(Ordering::Relaxed),
            publishes_unchanged: PUBLISHES_UNCHANGED.load(Ordering::Relaxed),
            subscriptions_total: SUBSCRIPTIONS_TOTAL.load(Ordering::Relaxed),
            notifications_delivered: NOTIFICATIONS_DELIVERED.load(Ordering::Relaxed),
            subscribers_pruned: SUBSCRIBERS_PRUNED.load(Ordering::Relaxed),
            persist_failures: PERSIST_FAILURES.load(Ordering::Relaxed),
            connections_active: CONNECTIONS_ACTIVE.load(Ordering::Relaxed),
            connections_total: CONNECTIONS_TOTAL.load(Ordering::Relaxed),
            protocol_errors: PROTOCOL_ERRORS.load(Ordering::Relaxed),
            gossip_pushes_sent: GOSSIP_PUSHES_SENT.load(Ordering::Relaxed),
            gossip_pushes_failed: GOSSIP_PUSHES_FAILED.load(Ordering::Relaxed),
            sync_topics_merged: SYNC_TOPICS_MERGED.load(Ordering::Relaxed),
            heartbeats_sent: HEARTBEATS_SENT.load(Ordering::Relaxed),
            heartbeats_received: HEARTBEATS_RECEIVED.load(Ordering::Relaxed),
            heartbeat_send_failures: HEARTBEAT_SEND_FAILURES.load(Ordering::Relaxed),
            peers_suspected: PEERS_SUSPECTED.load(Ordering::Relaxed),
            elections_started: ELECTIONS_STARTED.load(Ordering::Relaxed),
            elections_won: ELECTIONS_WON.load(Ordering::Relaxed),
            coordinator_changes: COORDINATOR_CHANGES.load(Ordering::Relaxed),
            cluster_is_coordinator: CLUSTER_IS_COORDINATOR.load(Ordering::Relaxed),
            cluster_peer_count: CLUSTER_PEER_COUNT.load(Ordering::Relaxed),
            cluster_peers_alive: CLUSTER_PEERS_ALIVE.load(Ordering::Relaxed),
        }
    }
}

pub fn init_prometheus_exporter(
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    builder.with_http_listener(addr).install()?;

    metrics::describe_counter!("herald_publishes_total", "Publish requests accepted");
    metrics::describe_counter!(
        "herald_publishes_unchanged_total",
        "Publishes whose value matched the stored value"
    );
    metrics::describe_counter!("herald_subscriptions_total", "Subscriptions registered");
    metrics::describe_counter!(
        "herald_notifications_delivered_total",
        "Updates delivered to subscribers"
    );
    metrics::describe_counter!(
        "herald_subscribers_pruned_total",
        "Subscribers removed after a failed delivery"
    );
    metrics::describe_counter!(
        "herald_persist_failures_total",
        "Topic log writes that failed"
    );
    metrics::describe_gauge!("herald_connections_active", "Open client and peer connections");
    metrics::describe_counter!("herald_connections_total", "Connections ever accepted");
    metrics::describe_counter!(
        "herald_protocol_errors_total",
        "Frames or datagrams rejected by the decoder"
    );

    metrics::describe_counter!("herald_gossip_pushes_sent_total", "Sync snapshots pushed");
    metrics::describe_counter!(
        "herald_gossip_pushes_failed_total",
        "Sync pushes that failed or timed out"
    );
    metrics::describe_counter!(
        "herald_sync_topics_merged_total",
        "Topics changed by incoming sync snapshots"
    );

    metrics::describe_counter!("herald_heartbeats_sent_total", "Heartbeat datagrams sent");
    metrics::describe_counter!(
        "herald_heartbeats_received_total",
        "Heartbeats received from recognized peers"
    );
    metrics::describe_counter!(
        "herald_heartbeat_send_failures_total",
        "Heartbeat sends that failed"
    );
    metrics::describe_counter!(
        "herald_peers_suspected_total",
        "Alive to suspected transitions"
    );

    metrics::describe_counter!("herald_elections_started_total", "Elections started");
    metrics::describe_counter!("herald_elections_won_total", "Elections won");
    metrics::describe_counter!(
        "herald_coordinator_changes_total",
        "Coordinator announcements applied"
    );

    metrics::describe_gauge!(
        "herald_cluster_is_coordinator",
        "Whether this node is the coordinator (1=yes, 0=no)"
    );
    metrics::describe_gauge!("herald_cluster_peer_count", "Known peers");
    metrics::describe_gauge!("herald_cluster_peers_alive", "Peers not currently suspected");

    Ok(())
}

pub fn export_to_prometheus() {
    let snapshot = MetricsSnapshot::capture();

    metrics::counter!("herald_publishes_total").absolute(snapshot.publishes_total);
    metrics::counter!("herald_publishes_unchanged_total").absolute(snapshot.publishes_unchanged);
    metrics::counter!("herald_subscriptions_total").absolute(snapshot.subscriptions_total);
    metrics::counter!("herald_notifications_delivered_total")
        .absolute(snapshot.notifications_delivered);
    metrics::counter!("herald_subscribers_pruned_total").absolute(snapshot.subscribers_pruned);
    metrics::counter!("herald_persist_failures_total").absolute(snapshot.persist_failures);
    metrics::gauge!("herald_connections_active").set(snapshot.connections_active as f64);
    metrics::counter!("herald_connections_total").absolute(snapshot.connections_total);
    metrics::counter!("herald_protocol_errors_total").absolute(snapshot.protocol_errors);

    metrics::counter!("herald_gossip_pushes_sent_total").absolute(snapshot.gossip_pushes_sent);
    metrics::counter!("herald_gossip_pushes_failed_total").absolute(snapshot.gossip_pushes_failed);
    metrics::counter!("herald_sync_topics_merged_total").absolute(snapshot.sync_topics_merged);

    metrics::counter!("herald_heartbeats_sent_total").absolute(snapshot.heartbeats_sent);
    metrics::counter!("herald_heartbeats_received_total").absolute(snapshot.heartbeats_received);
    metrics::counter!("herald_heartbeat_send_failures_total")
        .absolute(snapshot.heartbeat_send_failures);
    metrics::counter!("herald_peers_suspected_total").absolute(snapshot.peers_suspected);

    metrics::counter!("herald_elections_started_total").absolute(snapshot.elections_started);
    metrics::counter!("herald_elections_won_total").absolute(snapshot.elections_won);
    metrics::counter!("herald_coordinator_changes_total").absolute(snapshot.coordinator_changes);

    metrics::gauge!("herald_cluster_is_coordinator").set(snapshot.cluster_is_coordinator as f64);
    metrics::gauge!("herald_cluster_peer_count").set(snapshot.cluster_peer_count as f64);
    metrics::gauge!("herald_cluster_peers_alive").set(snapshot.cluster_peers_alive as f64);
}
