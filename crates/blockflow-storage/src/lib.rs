//! Persistence for blockflow graphs.
//!
//! Graphs are stored as JSON [`GraphDocument`]s that keep tags, not type
//! ids; loading replays the graph through the normal editing operations.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: document and record shapes
//! - [`convert`]: FlowGraph decompose/recompose functions
//! - [`artifact`]: function artifact export/import with blake3 hashes
//! - [`traits`]: DocumentStore trait definition
//! - [`memory`]: InMemoryStore implementation
//! - [`file`]: FileStore implementation and single-file helpers

pub mod artifact;
pub mod convert;
pub mod error;
pub mod file;
pub mod memory;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic use.
pub use artifact::{document_hash, export_function, import_artifact, ArtifactSignature, FunctionArtifact};
pub use convert::{decompose, recompose};
pub use error::StorageError;
pub use file::{read_document, write_document, FileStore};
pub use memory::InMemoryStore;
pub use traits::DocumentStore;
pub use types::{BlockRecord, ConnectionRecord, GraphDocument, InputPortRecord, OutputPortRecord};
