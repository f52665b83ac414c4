//! In-memory implementation of [`DocumentStore`].
//!
//! [`InMemoryStore`] keeps serialized JSON, not live documents, so a round
//! trip through it exercises the same encoding as the file backend.

use std::collections::BTreeMap;

use crate::error::StorageError;
use crate::traits::DocumentStore;
use crate::types::GraphDocument;

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    documents: BTreeMap<String, String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for InMemoryStore {
    fn save_document(
        &mut self,
        name: &str,
        document: &GraphDocument,
    ) -> Result<(), StorageError> {
        let json = serde_json::to_string(document)?;
        self.documents.insert(name.to_string(), json);
        Ok(())
    }

    fn load_document(&self, name: &str) -> Result<GraphDocument, StorageError> {
        let json = self
            .documents
            .get(name)
            .ok_or_else(|| StorageError::DocumentNotFound(name.to_string()))?;
        Ok(serde_json::from_str(json)?)
    }

    fn delete_document(&mut self, name: &str) -> Result<(), StorageError> {
        self.documents
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::DocumentNotFound(name.to_string()))
    }

    fn list_documents(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.documents.keys().cloned().collect())
    }
}
