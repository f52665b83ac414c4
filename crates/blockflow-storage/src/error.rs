//! Storage error types for blockflow-storage.
//!
//! [`StorageError`] covers the failure modes of persisting and restoring a
//! graph: I/O, JSON, unknown records and graph edits refused while a
//! document is replayed.

use blockflow_core::error::CoreError;
use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reading or writing a file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The graph refused an edit while a document was replayed.
    #[error("graph error: {0}")]
    Graph(#[from] CoreError),

    /// No document is stored under this name.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// A block record names a kind this build does not know.
    #[error("unknown block kind '{name}' (record {id})")]
    UnknownBlockKind { id: u32, name: String },

    /// A connection record refers to a block id no record defines.
    #[error("connection refers to unknown block record {id}")]
    UnknownBlockRecord { id: u32 },

    /// The block cannot export a function.
    #[error("block '{caption}' has no function to export")]
    NothingToExport { caption: String },

    /// The exported function still has untyped positions.
    #[error("function reaching '{caption}' has untyped positions: {signature}")]
    UntypedSignature { caption: String, signature: String },

    /// Failed to rebuild a FlowGraph from stored data.
    #[error("reconstruction error: {reason}")]
    ReconstructionError { reason: String },
}
