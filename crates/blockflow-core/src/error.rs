//! Core error types for blockflow-core.
//!
//! Every variant is a structural invariant violation: a caller asked for a
//! block, port or position that does not exist, or tried to wire the graph in
//! a way the port model cannot represent. Recoverable connection problems
//! (type or signature mismatches) are not errors; they are reported by the
//! validator in `blockflow-check`.

use crate::id::{BlockId, ConnectionId, PortRef};
use crate::port::{Direction, PortKind};
use thiserror::Error;

/// Core errors produced by the blockflow-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A block handle was not found in the graph.
    #[error("block not found: BlockId({id})", id = id.0)]
    BlockNotFound { id: BlockId },

    /// A connection handle was not found in the graph.
    #[error("connection not found: ConnectionId({id})", id = id.0)]
    ConnectionNotFound { id: ConnectionId },

    /// A port index is outside the block's port list.
    #[error("{direction:?} port {port} out of range (block has {count})")]
    PortOutOfRange {
        direction: Direction,
        port: PortRef,
        count: usize,
    },

    /// A signature position is outside the signature.
    #[error("signature position {position} out of range (length {len})")]
    PositionOutOfRange { position: usize, len: usize },

    /// A port of the wrong kind was addressed.
    #[error("port {port} carries {actual:?}, expected {expected:?}")]
    PortKindMismatch {
        port: PortRef,
        expected: PortKind,
        actual: PortKind,
    },

    /// The block kind does not allow changing this port count.
    #[error("block {block} does not allow resizing its {direction:?} {kind:?} ports")]
    PortCountFixed {
        block: BlockId,
        direction: Direction,
        kind: PortKind,
    },

    /// A resize would drop below the block kind's minimum.
    #[error("block {block} needs at least {min} {direction:?} ports, got {requested}")]
    PortCountBelowMinimum {
        block: BlockId,
        direction: Direction,
        min: usize,
        requested: usize,
    },

    /// The block has no port of the requested kind left to remove.
    #[error("block {block} has no {direction:?} {kind:?} port to remove")]
    NoPortOfKind {
        block: BlockId,
        direction: Direction,
        kind: PortKind,
    },

    /// An imported function artifact cannot be attached.
    #[error("invalid function artifact: {reason}")]
    InvalidFunction { reason: String },

    /// The operation does not apply to this block kind.
    #[error("operation '{operation}' is not supported by block {block}")]
    UnsupportedOperation {
        block: BlockId,
        operation: &'static str,
    },

    /// An edge failed structural validation.
    #[error("invalid edge: {reason}")]
    InvalidEdge { reason: String },
}
