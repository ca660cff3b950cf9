//! Request handlers, one per message kind.
//!
//! `dispatch` routes a decoded request to its handler and returns the direct
//! reply, if any. Subscriptions are the only requests without a direct reply:
//! their first `Update` goes out through the subscriber's own queue.

use super::BrokerState;
use crate::subscription::Subscriber;
use hrd_core::canonical_topic;
use hrd_network::Message;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Context passed to all handlers
pub struct CommandContext<'a> {
    pub state: &'a BrokerState,
    /// Handle onto the calling connection's outbound queue
    pub connection: &'a Subscriber,
}

pub fn dispatch(ctx: &CommandContext<'_>, message: Message) -> Option<Message> {
    match message {
        Message::Publish { topic, message } => Some(handle_publish(ctx.state, &topic, &message)),
        Message::Subscribe { topic } => handle_subscribe(ctx, &topic),
        Message::Sync { topics } => Some(handle_sync(ctx.state, topics)),
        Message::Fetch { topic } => Some(handle_fetch(ctx.state, &topic)),
        Message::Status {} => Some(handle_status(ctx.state)),

        // Peer management and election belong to the cluster layer.
        message @ (Message::AddPeer { .. }
        | Message::Election { .. }
        | Message::Coordinator { .. }) => ctx.state.cluster.handle(message),

        Message::Heartbeat { sender } => {
            debug!(target: "herald::server", sender = %sender, "Heartbeat received over TCP");
            Some(Message::error("heartbeats are only accepted over UDP"))
        },

        // Server-only messages - invalid from clients
        other => Some(handle_invalid_request(&other)),
    }
}

fn empty_topic() -> Message {
    Message::error("topic name must not be empty")
}

pub fn handle_publish(state: &BrokerState, topic: &str, message: &str) -> Message {
    if topic.is_empty() {
        return empty_topic();
    }

    hrd_metrics::increment_publishes();
    let changed = state.apply_update(topic, message);
    if !changed {
        hrd_metrics::increment_publishes_unchanged();
    }

    debug!(target: "herald::server", topic = %canonical_topic(topic), changed, "Publish");
    Message::Ack { changed }
}

pub fn handle_subscribe(ctx: &CommandContext<'_>, topic: &str) -> Option<Message> {
    if topic.is_empty() {
        return Some(empty_topic());
    }

    let state = ctx.state;
    if !state
        .registry
        .subscribe(topic, ctx.connection.clone(), &state.store)
    {
        // Initial delivery failed; the connection is going away.
        debug!(
            target: "herald::server",
            topic = %canonical_topic(topic),
            connection = ctx.connection.id,
            "Subscribe dropped, connection queue unavailable"
        );
    }
    None
}

/// Merge a peer's snapshot through the same path as a local publish.
pub fn handle_sync(state: &BrokerState, topics: BTreeMap<String, String>) -> Message {
    let received = topics.len();
    let mut merged = 0u64;

    for (topic, message) in topics {
        if topic.is_empty() {
            continue;
        }
        if state.apply_update(&topic, &message) {
            merged += 1;
        }
    }

    if merged > 0 {
        hrd_metrics::increment_sync_topics_merged(merged);
        debug!(target: "herald::server", received, merged, "Sync merged topics");
    }

    Message::Ack { changed: merged > 0 }
}

pub fn handle_fetch(state: &BrokerState, topic: &str) -> Message {
    if topic.is_empty() {
        return empty_topic();
    }

    let topic = canonical_topic(topic);
    let message = state.store.get(&topic);
    Message::Update { topic, message }
}

pub fn handle_status(state: &BrokerState) -> Message {
    Message::StatusReport(state.cluster.status(state.store.len()))
}

pub fn handle_invalid_request(message: &Message) -> Message {
    hrd_metrics::increment_protocol_errors();
    warn!(
        target: "herald::server",
        kind = message.kind().name(),
        "Client sent a response-only message"
    );
    Message::error(format!("{} is not a request", message.kind().name()))
}
