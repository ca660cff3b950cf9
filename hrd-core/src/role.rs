use serde::{Deserialize, Serialize};
use std::fmt;

/// Election role of a broker.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Follower = 0,
    Electing = 1,
    Coordinator = 2,
}

impl Role {
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Electing,
            2 => Self::Coordinator,
            _ => Self::Follower,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Follower => write!(f, "follower"),
            Self::Electing => write!(f, "electing"),
            Self::Coordinator => write!(f, "coordinator"),
        }
    }
}
