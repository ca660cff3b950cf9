use hrd_core::{HeraldError, PeerAddress, Result, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PROTOCOL_VERSION: u8 = 1;

/// Message tag carried in byte 5 of every frame header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    // Requests (0x01-0x7F)
    Publish = 0x01,
    Subscribe = 0x02,
    Sync = 0x03,
    AddPeer = 0x04,
    Election = 0x05,
    Coordinator = 0x06,
    Heartbeat = 0x07,
    Fetch = 0x08,
    Status = 0x09,

    // Responses (0x80+)
    Ack = 0x80,
    Update = 0x81,
    ElectionAck = 0x82,
    StatusReport = 0x83,
    Error = 0xFF,
}

impl MessageKind {
    /// Variant name used as the serde enum key.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Publish => "Publish",
            Self::Subscribe => "Subscribe",
            Self::Sync => "Sync",
            Self::AddPeer => "AddPeer",
            Self::Election => "Election",
            Self::Coordinator => "Coordinator",
            Self::Heartbeat => "Heartbeat",
            Self::Fetch => "Fetch",
            Self::Status => "Status",
            Self::Ack => "Ack",
            Self::Update => "Update",
            Self::ElectionAck => "ElectionAck",
            Self::StatusReport => "StatusReport",
            Self::Error => "Error",
        }
    }

    #[must_use]
    pub fn is_response(self) -> bool {
        (self as u8) & 0x80 != 0
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = HeraldError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Publish),
            0x02 => Ok(Self::Subscribe),
            0x03 => Ok(Self::Sync),
            0x04 => Ok(Self::AddPeer),
            0x05 => Ok(Self::Election),
            0x06 => Ok(Self::Coordinator),
            0x07 => Ok(Self::Heartbeat),
            0x08 => Ok(Self::Fetch),
            0x09 => Ok(Self::Status),
            0x80 => Ok(Self::Ack),
            0x81 => Ok(Self::Update),
            0x82 => Ok(Self::ElectionAck),
            0x83 => Ok(Self::StatusReport),
            0xFF => Ok(Self::Error),
            other => Err(HeraldError::UnknownTag(other)),
        }
    }
}

/// Liveness of one peer as seen by the reporting node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStatus {
    pub address: PeerAddress,
    pub alive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub node: PeerAddress,
    pub role: Role,
    pub coordinator: Option<PeerAddress>,
    pub peers: Vec<PeerStatus>,
    pub topic_count: usize,
}

/// Every message exchanged between clients, brokers and peers.
///
/// The frame tag selects the variant; the payload is the JSON body of that
/// variant without the variant name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Publish {
        topic: String,
        message: String,
    },
    Subscribe {
        topic: String,
    },
    Sync {
        topics: BTreeMap<String, String>,
    },
    AddPeer {
        host: String,
        port: u16,
    },
    Election {
        sender: PeerAddress,
    },
    Coordinator {
        sender: PeerAddress,
    },
    Heartbeat {
        sender: PeerAddress,
    },
    Fetch {
        topic: String,
    },
    Status {},
    Ack {
        changed: bool,
    },
    /// Current value of a topic. `None` means no value has been published yet.
    Update {
        topic: String,
        message: Option<String>,
    },
    ElectionAck {
        sender: PeerAddress,
    },
    StatusReport(StatusReport),
    Error {
        message: String,
    },
}

impl Message {
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Publish { .. } => MessageKind::Publish,
            Self::Subscribe { .. } => MessageKind::Subscribe,
            Self::Sync { .. } => MessageKind::Sync,
            Self::AddPeer { .. } => MessageKind::AddPeer,
            Self::Election { .. } => MessageKind::Election,
            Self::Coordinator { .. } => MessageKind::Coordinator,
            Self::Heartbeat { .. } => MessageKind::Heartbeat,
            Self::Fetch { .. } => MessageKind::Fetch,
            Self::Status {} => MessageKind::Status,
            Self::Ack { .. } => MessageKind::Ack,
            Self::Update { .. } => MessageKind::Update,
            Self::ElectionAck { .. } => MessageKind::ElectionAck,
            Self::StatusReport(_) => MessageKind::StatusReport,
            Self::Error { .. } => MessageKind::Error,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn add_peer(peer: &PeerAddress) -> Self {
        Self::AddPeer {
            host: peer.host.clone(),
            port: peer.port,
        }
    }

    /// Serialize the variant body (without the variant key).
    pub fn encode_body(&self) -> Result<Vec<u8>> {
        let kind = self.kind();
        let value = serde_json::to_value(self)
            .map_err(|e| HeraldError::Protocol(format!("Encode {}: {}", kind.name(), e)))?;

        let body = match value {
            serde_json::Value::Object(mut map) => map.remove(kind.name()),
            _ => None,
        }
        .ok_or_else(|| HeraldError::Internal(format!("No body for {}", kind.name())))?;

        serde_json::to_vec(&body)
            .map_err(|e| HeraldError::Protocol(format!("Encode {}: {}", kind.name(), e)))
    }

    /// Parse a variant body for the given tag. Bodies that do not match the
    /// tag's schema are rejected.
    pub fn decode_body(kind: MessageKind, body: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| HeraldError::Protocol(format!("Malformed {} body: {}", kind.name(), e)))?;

        let mut map = serde_json::Map::with_capacity(1);
        map.insert(kind.name().to_string(), value);

        serde_json::from_value(serde_json::Value::Object(map))
            .map_err(|e| HeraldError::Protocol(format!("Invalid {} body: {}", kind.name(), e)))
    }
}
