//! Persisted record shapes.
//!
//! A [`GraphDocument`] is the JSON form of a flow graph: one
//! [`BlockRecord`] per block and one [`ConnectionRecord`] per edge. Type ids
//! are not stored; data outputs keep their tag and annotation, and loading
//! derives fresh ids from them.

use blockflow_core::block::ImportedFunction;
use blockflow_core::port::PortKind;
use serde::{Deserialize, Serialize};

/// A whole graph as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub blocks: Vec<BlockRecord>,
    pub connections: Vec<ConnectionRecord>,
}

/// One block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Document-local id, referenced by connections.
    pub id: u32,
    /// Block kind name, e.g. `split_data`.
    pub name: String,
    pub caption: String,
    /// Trainers only: `(inputs, outputs)` of the produced model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arity: Option<(usize, usize)>,
    pub input_ports: Vec<InputPortRecord>,
    pub output_ports: Vec<OutputPortRecord>,
    /// Data sources: the attached file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Function sources: the imported function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<ImportedFunction>,
}

/// An input port; only its kind is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPortRecord {
    pub index: usize,
    pub type_id: PortKind,
}

/// An output port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputPortRecord {
    Data {
        index: usize,
        type_tag: String,
        annotation: String,
    },
    Function {
        index: usize,
        caption: String,
    },
}

impl OutputPortRecord {
    pub fn index(&self) -> usize {
        match self {
            OutputPortRecord::Data { index, .. } | OutputPortRecord::Function { index, .. } => {
                *index
            }
        }
    }
}

/// One edge, by document-local block ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub out_block: u32,
    pub out_port: usize,
    pub in_block: u32,
    pub in_port: usize,
}
