//! Exported function artifacts.
//!
//! A `func_out` block exports the function flowing into it as a
//! [`FunctionArtifact`]: the signature with raw type ids plus a
//! `file_hash` identifying the document it came from. Importing into a
//! `func_source` block maps the raw ids through the registry's load cache,
//! so every import of the same artifact lands on the same live types.

use blockflow_core::block::{BlockKind, ImportedFunction};
use blockflow_core::error::CoreError;
use blockflow_core::graph::FlowGraph;
use blockflow_core::id::{BlockId, PortRef};
use blockflow_core::port::PortValue;
use blockflow_core::signature::Signature;
use blockflow_core::type_id::TypeId;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Length of the hex prefix kept as `file_hash`.
const HASH_LEN: usize = 10;

/// Raw signature ids as written to an artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSignature {
    pub input: Vec<i64>,
    pub output: Vec<i64>,
}

/// Metadata written next to an exported function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionArtifact {
    pub function_name: String,
    pub function_signature: ArtifactSignature,
    pub file_hash: String,
}

impl FunctionArtifact {
    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, StorageError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn to_imported(&self) -> ImportedFunction {
        ImportedFunction {
            name: self.function_name.clone(),
            file_hash: self.file_hash.clone(),
            inputs: self.function_signature.input.clone(),
            outputs: self.function_signature.output.clone(),
        }
    }
}

/// Hash identifying the document at `origin`.
///
/// The path is normalized (separators, case, trailing slash) before hashing
/// so the same document always yields the same hash.
pub fn document_hash(origin: &str) -> String {
    let normalized = origin.trim().replace('\\', "/").to_lowercase();
    let normalized = normalized.trim_end_matches('/');
    let hash = blake3::hash(normalized.as_bytes());
    hash.to_hex()[..HASH_LEN].to_uppercase()
}

/// Exports the function reaching `func_out` block `block`. `origin` names
/// the document the graph was loaded from.
pub fn export_function(
    graph: &FlowGraph,
    block: BlockId,
    origin: &str,
) -> Result<FunctionArtifact, StorageError> {
    let current = graph
        .block(block)
        .ok_or(CoreError::BlockNotFound { id: block })?;
    let nothing = || StorageError::NothingToExport {
        caption: current.caption().to_string(),
    };
    if current.kind() != BlockKind::FuncOut {
        return Err(nothing());
    }
    let signature = graph
        .input_value(PortRef::new(block, 0))
        .and_then(PortValue::as_function)
        .map(|f| f.signature())
        .filter(|s| !s.is_empty())
        .ok_or_else(nothing)?;
    if !signature.is_valid() {
        return Err(StorageError::UntypedSignature {
            caption: current.caption().to_string(),
            signature: signature.to_string(),
        });
    }

    let raw = |ids: &[TypeId]| -> Vec<i64> { ids.iter().map(|id| i64::from(id.0)).collect() };
    let artifact = FunctionArtifact {
        function_name: current.caption().to_string(),
        function_signature: ArtifactSignature {
            input: raw(&signature.inputs),
            output: raw(&signature.outputs),
        },
        file_hash: document_hash(origin),
    };
    tracing::debug!(block = %block, %signature, hash = %artifact.file_hash, "exported function");
    Ok(artifact)
}

/// Imports `artifact` into `func_source` block `block`.
pub fn import_artifact(
    graph: &mut FlowGraph,
    block: BlockId,
    artifact: &FunctionArtifact,
) -> Result<Signature, StorageError> {
    Ok(graph.import_function(block, artifact.to_imported())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trained_graph() -> (FlowGraph, BlockId) {
        let mut graph = FlowGraph::new();
        let x = graph.add_block(BlockKind::DataSource);
        graph.attach_source(x, "x.csv").unwrap();
        let y = graph.add_block(BlockKind::DataSource);
        graph.attach_source(y, "y.csv").unwrap();
        let trainer = graph.add_block(BlockKind::Trainer);
        graph
            .connect(PortRef::new(x, 0), PortRef::new(trainer, 0))
            .unwrap();
        graph
            .connect(PortRef::new(y, 0), PortRef::new(trainer, 1))
            .unwrap();
        let out = graph.add_block(BlockKind::FuncOut);
        graph
            .connect(PortRef::new(trainer, 0), PortRef::new(out, 0))
            .unwrap();
        (graph, out)
    }

    #[test]
    fn document_hash_ignores_case_and_separators() {
        let a = document_hash("C:\\Projects\\Iris.json");
        let b = document_hash("c:/projects/iris.json");
        assert_eq!(a, b);
        assert_eq!(a.len(), HASH_LEN);
        assert!(a.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert_ne!(a, document_hash("c:/projects/other.json"));
    }

    #[test]
    fn export_writes_raw_signature_ids() {
        let (graph, out) = trained_graph();
        let artifact = export_function(&graph, out, "iris.json").unwrap();
        assert_eq!(artifact.function_name, "func_out");
        assert_eq!(
            artifact.function_signature,
            ArtifactSignature {
                input: vec![0],
                output: vec![1],
            }
        );
    }

    #[test]
    fn export_needs_a_connected_function() {
        let mut graph = FlowGraph::new();
        let out = graph.add_block(BlockKind::FuncOut);
        assert!(matches!(
            export_function(&graph, out, "g.json"),
            Err(StorageError::NothingToExport { .. })
        ));
        let sink = graph.add_block(BlockKind::DataOut);
        assert!(matches!(
            export_function(&graph, sink, "g.json"),
            Err(StorageError::NothingToExport { .. })
        ));
    }

    #[test]
    fn export_refuses_untyped_positions() {
        let mut graph = FlowGraph::new();
        let x = graph.add_block(BlockKind::DataSource);
        graph.attach_source(x, "x.csv").unwrap();
        let trainer = graph.add_block(BlockKind::Trainer);
        graph
            .connect(PortRef::new(x, 0), PortRef::new(trainer, 0))
            .unwrap();
        let out = graph.add_block(BlockKind::FuncOut);
        graph
            .connect(PortRef::new(trainer, 0), PortRef::new(out, 0))
            .unwrap();

        assert!(matches!(
            export_function(&graph, out, "g.json"),
            Err(StorageError::UntypedSignature { .. })
        ));
    }

    #[test]
    fn importing_twice_reuses_live_ids() {
        let (graph, out) = trained_graph();
        let artifact = export_function(&graph, out, "iris.json").unwrap();

        let mut target = FlowGraph::new();
        let first = target.add_block(BlockKind::FuncSource);
        let second = target.add_block(BlockKind::FuncSource);
        let a = import_artifact(&mut target, first, &artifact).unwrap();
        let b = import_artifact(&mut target, second, &artifact).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, Signature::new([TypeId(0)], [TypeId(1)]));
        assert_eq!(target.registry().len(), 2);
    }

    #[test]
    fn artifact_json_round_trips() {
        let json = r#"{
            "function_name": "predict",
            "function_signature": { "input": [3, 4], "output": [5] },
            "file_hash": "0A1B2C3D4E"
        }"#;
        let artifact = FunctionArtifact::from_json(json).unwrap();
        assert_eq!(artifact.function_signature.input, vec![3, 4]);
        let again = FunctionArtifact::from_json(&artifact.to_json().unwrap()).unwrap();
        assert_eq!(again, artifact);
    }
}
