#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]

mod connection;
mod frame;
mod protocol;

pub use connection::{read_message, read_message_idle, write_message};
pub use frame::{FrameHeader, decode_datagram, encode_frame, parse_frame};
pub use protocol::{Message, MessageKind, PROTOCOL_VERSION, PeerStatus, StatusReport};

pub const HERALD_MAGIC: [u8; 4] = *b"HRLD";
pub const FRAME_HEADER_SIZE: usize = 16;
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;
/// Largest heartbeat datagram accepted on the UDP socket.
pub const MAX_DATAGRAM_SIZE: usize = 1024;
