use std::fmt;

use serde::{Deserialize, Serialize};

/// Mask of the 48 significant bits of a node identity.
pub const NODE_ID_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// Mask of the 12 significant bits of an alias.
pub const ALIAS_MASK: u16 = 0x0FFF;

/// Monotonic timestamp in nanoseconds
pub type Timestamp = u64;

/// 48-bit globally unique node identity.
///
/// The value zero is used as the "unknown" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    pub const UNKNOWN: NodeId = NodeId(0);

    /// Creates a node identity, discarding anything above bit 47.
    pub const fn new(raw: u64) -> Self {
        Self(raw & NODE_ID_MASK)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_unknown(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02X}.{:02X}.{:02X}.{:02X}.{:02X}.{:02X}",
            b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

/// 12-bit CAN alias standing in for a [`NodeId`] on the wire.
///
/// Zero is reserved and marks an unknown or invalid alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct NodeAlias(u16);

impl NodeAlias {
    pub const UNKNOWN: NodeAlias = NodeAlias(0);

    /// Creates an alias, discarding anything above bit 11.
    pub const fn new(raw: u16) -> Self {
        Self(raw & ALIAS_MASK)
    }

    pub const fn get(self) -> u16 {
        self.0
    }

    pub const fn is_unknown(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03X}", self.0)
    }
}

/// Addressing information of a node as seen in a message.
///
/// Either half may be unknown (zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeHandle {
    pub id: NodeId,
    pub alias: NodeAlias,
}

impl NodeHandle {
    pub const fn new(id: NodeId, alias: NodeAlias) -> Self {
        Self { id, alias }
    }

    pub const fn from_id(id: NodeId) -> Self {
        Self {
            id,
            alias: NodeAlias::UNKNOWN,
        }
    }

    /// True when neither the identity nor the alias is known.
    pub const fn is_empty(&self) -> bool {
        self.id.is_unknown() && self.alias.is_unknown()
    }
}

/// Configuration trait that must be implemented by all component configurations
pub trait Config: Send + Sync {
    fn validate(&self) -> crate::error::Result<()>;
}
