#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod client;
mod error;

pub use client::{BrokerClient, ClientConfig, Subscription, Update};
pub use error::{ClientError, Result};
pub use hrd_core::PeerAddress;
pub use hrd_network::{PeerStatus, StatusReport};
