//! JSON files on disk.
//!
//! [`FileStore`] keeps one `<name>.json` per document under a root
//! directory. [`read_document`] and [`write_document`] work on single paths
//! for tools that are handed a file directly.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::traits::DocumentStore;
use crate::types::GraphDocument;

const EXTENSION: &str = "json";

pub fn read_document(path: &Path) -> Result<GraphDocument, StorageError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Writes `document` as pretty-printed JSON.
pub fn write_document(path: &Path, document: &GraphDocument) -> Result<(), StorageError> {
    let text = serde_json::to_string_pretty(document)?;
    fs::write(path, text)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (and creates if needed) the directory `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(FileStore { root })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name).with_extension(EXTENSION)
    }
}

impl DocumentStore for FileStore {
    fn save_document(
        &mut self,
        name: &str,
        document: &GraphDocument,
    ) -> Result<(), StorageError> {
        write_document(&self.path(name), document)
    }

    fn load_document(&self, name: &str) -> Result<GraphDocument, StorageError> {
        let path = self.path(name);
        if !path.exists() {
            return Err(StorageError::DocumentNotFound(name.to_string()));
        }
        read_document(&path)
    }

    fn delete_document(&mut self, name: &str) -> Result<(), StorageError> {
        let path = self.path(name);
        if !path.exists() {
            return Err(StorageError::DocumentNotFound(name.to_string()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    fn list_documents(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockflow_core::block::BlockKind;
    use blockflow_core::graph::FlowGraph;

    #[test]
    fn documents_live_in_json_files() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("documents");
        let mut store = FileStore::open(&dir).unwrap();
        let mut graph = FlowGraph::new();
        graph.add_block(BlockKind::Composer);

        store.save_graph("pipeline", &graph).unwrap();
        assert!(dir.join("pipeline.json").exists());
        assert_eq!(store.list_documents().unwrap(), vec!["pipeline".to_string()]);
        assert_eq!(store.load_graph("pipeline").unwrap().block_count(), 1);

        store.delete_document("pipeline").unwrap();
        assert!(store.list_documents().unwrap().is_empty());
    }

    #[test]
    fn missing_document_is_reported_by_name() {
        let temp = tempfile::tempdir().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        match store.load_document("nope") {
            Err(StorageError::DocumentNotFound(name)) => assert_eq!(name, "nope"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
