//! Stable ID newtypes for graph entities.
//!
//! Block and connection IDs are distinct newtype wrappers over `u32`, so a
//! `BlockId` cannot be accidentally used where a `ConnectionId` is expected.
//! [`PortRef`] addresses one port of one block and is the non-owning handle an
//! input port keeps to the upstream output it observes.

use std::fmt;

use petgraph::graph::{EdgeIndex, NodeIndex};
use serde::{Deserialize, Serialize};

/// Stable block identifier. Maps to a petgraph `NodeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// Stable connection identifier. Maps to a petgraph `EdgeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

/// A single port of a single block.
///
/// Held by input ports to name the upstream output they observe. The handle
/// carries no ownership: it is resolved through the graph on every read, and
/// the graph clears it when the referenced output goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub block: BlockId,
    pub index: usize,
}

impl PortRef {
    pub fn new(block: BlockId, index: usize) -> Self {
        PortRef { block, index }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.index)
    }
}

// Bridges between the ID newtypes and petgraph's indices.

impl From<NodeIndex<u32>> for BlockId {
    fn from(idx: NodeIndex<u32>) -> Self {
        BlockId(idx.index() as u32)
    }
}

impl From<BlockId> for NodeIndex<u32> {
    fn from(id: BlockId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}

impl From<EdgeIndex<u32>> for ConnectionId {
    fn from(idx: EdgeIndex<u32>) -> Self {
        ConnectionId(idx.index() as u32)
    }
}

impl From<ConnectionId> for EdgeIndex<u32> {
    fn from(id: ConnectionId) -> Self {
        EdgeIndex::new(id.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_to_node_index_roundtrip() {
        let idx = NodeIndex::<u32>::new(42);
        let block = BlockId::from(idx);
        assert_eq!(block.0, 42);

        let back: NodeIndex<u32> = block.into();
        assert_eq!(back.index(), 42);
    }

    #[test]
    fn connection_id_to_edge_index_roundtrip() {
        let id = ConnectionId(9);
        let idx: EdgeIndex<u32> = id.into();
        assert_eq!(ConnectionId::from(idx), id);
    }

    #[test]
    fn port_ref_display() {
        assert_eq!(format!("{}", PortRef::new(BlockId(3), 1)), "3:1");
    }

    #[test]
    fn port_refs_order_by_block_then_index() {
        let a = PortRef::new(BlockId(1), 5);
        let b = PortRef::new(BlockId(2), 0);
        let c = PortRef::new(BlockId(2), 1);
        assert!(a < b);
        assert!(b < c);
    }
}
