//! Connection validation and graph validity for blockflow graphs.
//!
//! - [`connection`]: per-kind policies judging a proposed edge, the override
//!   flow that merges type ids, and drag-time provisional edges.
//! - [`validity`]: the pre-execution check that every block can run.
//!
//! Every graph edit, overrides included, goes through
//! [`blockflow_core::FlowGraph`].

pub mod connection;
pub mod validity;

pub use connection::{
    ChainSide, Confirm, ConfirmationLatch, ConnectionAttempt, ConnectionError, ConnectionPolicy,
    Decline, Gesture, OverridePrompt, PositionMismatch, Validator, Verdict,
};
pub use validity::{validate_graph, GraphDiagnostic};
