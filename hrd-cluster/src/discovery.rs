//! Static peer discovery.
//!
//! Peers come from two places: a `host:port` list given in configuration and
//! an optional roster file. The roster is a CSV with a header line followed by
//! one `host,port` line per broker; it may list the local broker too, which is
//! filtered out so every node can share the same file.

use hrd_core::{HeraldError, PeerAddress, Result};
use std::path::Path;
use tracing::{debug, warn};

/// Parse a list of `host:port` strings, skipping the local address.
pub fn parse_peer_list(local: &PeerAddress, entries: &[String]) -> Result<Vec<PeerAddress>> {
    let mut peers = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.trim().is_empty() {
            continue;
        }
        let peer: PeerAddress = entry.parse()?;
        if peer != *local && !peers.contains(&peer) {
            peers.push(peer);
        }
    }
    Ok(peers)
}

/// Parse roster file contents.
pub fn parse_roster(local: &PeerAddress, content: &str) -> Result<Vec<PeerAddress>> {
    let mut peers = Vec::new();

    for (line_no, line) in content.lines().enumerate().skip(1) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (host, port) = line.split_once(',').ok_or_else(|| {
            HeraldError::Config(format!("Roster line {}: expected host,port", line_no + 1))
        })?;

        let port = port.trim().parse::<u16>().map_err(|e| {
            HeraldError::Config(format!("Roster line {}: invalid port: {}", line_no + 1, e))
        })?;

        let peer = PeerAddress::new(host.trim(), port);
        if peer == *local {
            debug!(target: "hrd_cluster::discovery", peer = %peer, "Skipping local roster entry");
            continue;
        }
        if !peers.contains(&peer) {
            peers.push(peer);
        }
    }

    Ok(peers)
}

/// Load peers from a roster file.
pub fn load_roster(path: &Path, local: &PeerAddress) -> Result<Vec<PeerAddress>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        warn!(
            target: "hrd_cluster::discovery",
            path = %path.display(),
            error = %e,
            "Failed to read roster file"
        );
        HeraldError::Config(format!("Cannot read roster {}: {}", path.display(), e))
    })?;

    let peers = parse_roster(local, &content)?;
    debug!(
        target: "hrd_cluster::discovery",
        path = %path.display(),
        peers = peers.len(),
        "Loaded roster"
    );
    Ok(peers)
}
