//! Node identifiers and block references.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one process participating in the cluster.
///
/// Ordering matters: on every link the lower id takes the creator/listener
/// role, the higher id the attacher/dialer role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u16);

impl NodeId {
    /// Create a node id.
    #[inline]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Raw numeric value.
    #[inline]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}", self.0)
    }
}

impl From<u16> for NodeId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

/// Address of a block instance: `(node << 16) | block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockRef(u32);

impl BlockRef {
    /// Compose a reference from node and block number.
    #[inline]
    pub const fn new(node: NodeId, block: u16) -> Self {
        Self(((node.get() as u32) << 16) | block as u32)
    }

    /// Reinterpret a raw wire word.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw wire word.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Node part.
    #[inline]
    pub const fn node(self) -> NodeId {
        NodeId::new((self.0 >> 16) as u16)
    }

    /// Block number part.
    #[inline]
    pub const fn block(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}
