#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod address;
mod error;
mod role;
mod topic;

use std::time::Duration;

pub use address::PeerAddress;
pub use error::{HeraldError, Result};
pub use role::Role;
pub use topic::canonical_topic;

pub const DEFAULT_PORT: u16 = 7000;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);
pub const FAILURE_THRESHOLD: Duration = Duration::from_secs(5);
pub const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_secs(1);
pub const GOSSIP_INTERVAL: Duration = Duration::from_secs(2);
pub const ELECTION_TIMEOUT: Duration = Duration::from_secs(5);
pub const GOSSIP_TIMEOUT: Duration = Duration::from_secs(5);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
