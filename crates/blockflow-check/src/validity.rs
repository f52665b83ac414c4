//! Whole-graph validity check run before execution.
//!
//! [`validate_graph`] is pure: it reads the graph and reports every block
//! that cannot run, without stopping at the first problem.

use blockflow_core::block::{Attachment, BlockKind};
use blockflow_core::graph::FlowGraph;
use blockflow_core::id::BlockId;
use serde::{Deserialize, Serialize};

/// A reason a block cannot run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphDiagnostic {
    #[error("input port {port} of block '{caption}' is not connected")]
    UnconnectedInput {
        block: BlockId,
        caption: String,
        port: usize,
    },

    #[error("data source '{caption}' has no file set")]
    MissingSourceFile { block: BlockId, caption: String },

    #[error("function source '{caption}' has no imported function")]
    MissingFunction { block: BlockId, caption: String },
}

impl GraphDiagnostic {
    pub fn block(&self) -> BlockId {
        match self {
            GraphDiagnostic::UnconnectedInput { block, .. }
            | GraphDiagnostic::MissingSourceFile { block, .. }
            | GraphDiagnostic::MissingFunction { block, .. } => *block,
        }
    }
}

/// Reports every block in `graph` that cannot run. Empty means valid.
pub fn validate_graph(graph: &FlowGraph) -> Vec<GraphDiagnostic> {
    let mut diagnostics = Vec::new();

    for (id, block) in graph.blocks() {
        let caption = block.caption().to_string();
        match block.kind() {
            BlockKind::DataSource => {
                if !matches!(block.attachment(), Some(Attachment::File(_))) {
                    diagnostics.push(GraphDiagnostic::MissingSourceFile { block: id, caption });
                }
            }
            BlockKind::FuncSource => {
                if !matches!(block.attachment(), Some(Attachment::Function(_))) {
                    diagnostics.push(GraphDiagnostic::MissingFunction { block: id, caption });
                }
            }
            _ => {
                for (port, input) in block.inputs().iter().enumerate() {
                    if !input.is_connected() {
                        diagnostics.push(GraphDiagnostic::UnconnectedInput {
                            block: id,
                            caption: caption.clone(),
                            port,
                        });
                    }
                }
            }
        }
    }

    if !diagnostics.is_empty() {
        tracing::warn!(count = diagnostics.len(), "graph is not executable");
    }
    diagnostics
}
