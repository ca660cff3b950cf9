//! Connection handling
//!
//! Each connection has a reader loop (this task) and a writer task. Replies
//! and subscription updates share one bounded outbound queue; the writer owns
//! the socket's write half. A subscriber that stops reading fills its queue
//! and is pruned by the registry instead of stalling publishers.

use super::BrokerState;
use super::command_handlers::{self, CommandContext};
use crate::shutdown::{connection_closed, connection_opened, is_shutdown_requested};
use crate::subscription::Subscriber;
use hrd_core::Result;
use hrd_network::{Message, read_message_idle, write_message};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

/// Once a frame starts arriving, the rest of it must arrive within this.
const FRAME_READ_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve one client or peer connection until EOF, a protocol error or
/// shutdown.
pub async fn handle_connection(
    stream: TcpStream,
    state: Arc<BrokerState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let _ = stream.set_nodelay(true);
    let (mut reader, writer) = stream.into_split();

    let (outbound_tx, outbound_rx) = mpsc::channel(state.queue_depth);
    let connection = Subscriber {
        id: state.next_connection_id(),
        sender: outbound_tx,
    };

    connection_opened();
    hrd_metrics::increment_connections();
    debug!(target: "herald::server", connection = connection.id, peer = ?peer, "Connection opened");

    let writer_task = tokio::spawn(write_loop(writer, outbound_rx, connection.id));

    let result = loop {
        if is_shutdown_requested() {
            debug!(target: "herald::server", "Shutdown requested, closing connection");
            break Ok(());
        }

        let read = tokio::select! {
            read = read_message_idle(&mut reader, FRAME_READ_TIMEOUT) => read,
            _ = shutdown_rx.recv() => break Ok(()),
        };

        let request = match read {
            Ok(Some(request)) => request,
            Ok(None) => break Ok(()),
            Err(e) if e.is_transient() => {
                debug!(
                    target: "herald::server",
                    connection = connection.id,
                    error = %e,
                    "Connection read failed"
                );
                break Err(e);
            },
            Err(e) => {
                hrd_metrics::increment_protocol_errors();
                warn!(
                    target: "herald::server",
                    connection = connection.id,
                    error = %e,
                    "Dropping connection after bad frame"
                );
                let _ = connection.sender.try_send(Message::error(e.to_string()));
                break Err(e);
            },
        };

        trace!(
            target: "herald::server",
            connection = connection.id,
            kind = request.kind().name(),
            "Request"
        );

        let ctx = CommandContext {
            state: &state,
            connection: &connection,
        };

        if let Some(reply) = command_handlers::dispatch(&ctx, request) {
            if connection.sender.send(reply).await.is_err() {
                // Writer is gone, so is the socket.
                break Ok(());
            }
        }
    };

    state.registry.remove_connection(connection.id);
    drop(connection);

    // The writer drains what is queued, then exits once every sender is gone.
    if let Err(e) = writer_task.await {
        warn!(target: "herald::server", error = %e, "Connection writer task failed");
    }

    connection_closed();
    hrd_metrics::decrement_connections();
    debug!(target: "herald::server", peer = ?peer, "Connection closed");

    result
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound_rx: mpsc::Receiver<Message>,
    connection: u64,
) {
    while let Some(message) = outbound_rx.recv().await {
        if let Err(e) = write_message(&mut writer, &message, WRITE_TIMEOUT).await {
            debug!(
                target: "herald::server",
                connection,
                error = %e,
                "Write failed, closing outbound queue"
            );
            return;
        }
    }
}
