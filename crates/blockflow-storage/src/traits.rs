//! The [`DocumentStore`] trait defining the storage contract for graphs.
//!
//! Backends only move [`GraphDocument`]s in and out. The provided
//! `save_graph`/`load_graph` methods convert through [`crate::convert`], so
//! every backend restores graphs the same way.

use blockflow_core::graph::FlowGraph;

use crate::convert::{decompose, recompose};
use crate::error::StorageError;
use crate::types::GraphDocument;

/// The storage contract for graph documents.
///
/// Synchronous, like everything else in the editing core.
pub trait DocumentStore {
    /// Stores `document` under `name`, replacing any previous version.
    fn save_document(&mut self, name: &str, document: &GraphDocument)
        -> Result<(), StorageError>;

    fn load_document(&self, name: &str) -> Result<GraphDocument, StorageError>;

    fn delete_document(&mut self, name: &str) -> Result<(), StorageError>;

    /// Names of all stored documents, sorted.
    fn list_documents(&self) -> Result<Vec<String>, StorageError>;

    fn save_graph(&mut self, name: &str, graph: &FlowGraph) -> Result<(), StorageError> {
        self.save_document(name, &decompose(graph))
    }

    fn load_graph(&self, name: &str) -> Result<FlowGraph, StorageError> {
        recompose(&self.load_document(name)?)
    }
}
