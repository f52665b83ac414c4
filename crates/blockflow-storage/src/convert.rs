//! Decompose/recompose conversions between FlowGraph and GraphDocument.
//!
//! [`decompose`] captures a graph as records. [`recompose`] rebuilds a graph
//! from records in four passes:
//!
//! 1. create every block by kind name and restore its port layout,
//!    caption and attachment;
//! 2. replay the connections through the normal propagation path;
//! 3. move every live type that has to change its tag, or that holds a
//!    tag some other saved port needs, to a free temporary tag, so ids
//!    created while loading cannot capture a saved tag;
//! 4. re-bind every saved output tag and annotation, and restore function
//!    output captions.
//!
//! Saved outputs sharing a tag were one type when saved, so pass 4 merges
//! them into one type again.

use std::collections::{BTreeSet, HashMap};

use blockflow_core::block::{Attachment, BlockKind};
use blockflow_core::graph::FlowGraph;
use blockflow_core::id::{BlockId, PortRef};
use blockflow_core::naming::next_free;
use blockflow_core::port::{Direction, PortKind, PortValue};
use blockflow_core::type_id::{TypeId, NONE_TAG};

use crate::error::StorageError;
use crate::types::{
    BlockRecord, ConnectionRecord, GraphDocument, InputPortRecord, OutputPortRecord,
};

/// Captures `graph` as a document.
pub fn decompose(graph: &FlowGraph) -> GraphDocument {
    let registry = graph.registry();
    let blocks = graph
        .blocks()
        .map(|(id, block)| BlockRecord {
            id: id.0,
            name: block.kind().name().to_string(),
            caption: block.caption().to_string(),
            arity: block
                .kind()
                .is_trainer()
                .then(|| block.signature().arity()),
            input_ports: block
                .inputs()
                .iter()
                .enumerate()
                .map(|(index, port)| InputPortRecord {
                    index,
                    type_id: port.kind(),
                })
                .collect(),
            output_ports: block
                .outputs()
                .iter()
                .enumerate()
                .map(|(index, port)| match port.value() {
                    PortValue::Data(data) => OutputPortRecord::Data {
                        index,
                        type_tag: registry.tag(data.type_id()).to_string(),
                        annotation: data.annotation().to_string(),
                    },
                    PortValue::Function(function) => OutputPortRecord::Function {
                        index,
                        caption: function.name().to_string(),
                    },
                })
                .collect(),
            source: match block.attachment() {
                Some(Attachment::File(path)) => Some(path.clone()),
                _ => None,
            },
            function: match block.attachment() {
                Some(Attachment::Function(function)) => Some(function.clone()),
                _ => None,
            },
        })
        .collect();

    // Edge slots are reused after removals, so slot order says nothing
    // about the order the edges were drawn in.
    let mut connections: Vec<ConnectionRecord> = graph
        .connections()
        .map(|c| ConnectionRecord {
            out_block: c.source.block.0,
            out_port: c.source.index,
            in_block: c.target.block.0,
            in_port: c.target.index,
        })
        .collect();
    connections.sort_by_key(|c| (c.in_block, c.in_port, c.out_block, c.out_port));

    GraphDocument {
        blocks,
        connections,
    }
}

/// Rebuilds a graph from `document`.
pub fn recompose(document: &GraphDocument) -> Result<FlowGraph, StorageError> {
    let mut graph = FlowGraph::new();
    let mut ids: HashMap<u32, BlockId> = HashMap::new();

    for record in &document.blocks {
        let kind = BlockKind::from_name(&record.name).ok_or_else(|| {
            StorageError::UnknownBlockKind {
                id: record.id,
                name: record.name.clone(),
            }
        })?;
        let id = graph.add_block(kind);
        if ids.insert(record.id, id).is_some() {
            return Err(StorageError::ReconstructionError {
                reason: format!("duplicate block record id {}", record.id),
            });
        }
        restore_layout(&mut graph, id, kind, record)?;
        graph.set_caption(id, &record.caption)?;
    }

    let lookup = |record_id: u32| {
        ids.get(&record_id)
            .copied()
            .ok_or(StorageError::UnknownBlockRecord { id: record_id })
    };
    let pending = document
        .connections
        .iter()
        .map(|c| {
            Ok((
                PortRef::new(lookup(c.out_block)?, c.out_port),
                PortRef::new(lookup(c.in_block)?, c.in_port),
            ))
        })
        .collect::<Result<Vec<_>, StorageError>>()?;
    replay_connections(&mut graph, pending)?;

    restore_output_names(&mut graph, document, &ids)?;
    graph.take_events();

    tracing::debug!(
        blocks = graph.block_count(),
        connections = graph.connection_count(),
        types = graph.registry().len(),
        "recomposed graph"
    );
    Ok(graph)
}

/// Connects every pending edge. Some ports only exist once another edge
/// arrives (a `process` block grows its data inputs from the connected
/// function), so edges whose ports are missing wait for a later round.
fn replay_connections(
    graph: &mut FlowGraph,
    mut pending: Vec<(PortRef, PortRef)>,
) -> Result<(), StorageError> {
    while !pending.is_empty() {
        let before = pending.len();
        let mut deferred = Vec::new();
        for (source, target) in pending {
            if has_port(graph, source, Direction::Output) && has_port(graph, target, Direction::Input)
            {
                graph.connect(source, target)?;
            } else {
                deferred.push((source, target));
            }
        }
        if deferred.len() == before {
            // No edge made progress; connecting reports the missing port.
            for (source, target) in deferred {
                graph.connect(source, target)?;
            }
            break;
        }
        pending = deferred;
    }
    Ok(())
}

fn has_port(graph: &FlowGraph, port: PortRef, direction: Direction) -> bool {
    graph
        .block(port.block)
        .is_some_and(|b| port.index < b.port_count(direction))
}

/// Brings a freshly created block to the port layout the record describes.
fn restore_layout(
    graph: &mut FlowGraph,
    id: BlockId,
    kind: BlockKind,
    record: &BlockRecord,
) -> Result<(), StorageError> {
    match kind {
        BlockKind::Composer | BlockKind::Transform | BlockKind::Reduce => {
            let count = record.input_ports.len();
            if count >= 1 {
                graph.set_input_count(id, count)?;
            }
        }
        BlockKind::Trainer | BlockKind::TorchTrainer => {
            if let Some((inputs, outputs)) = record.arity {
                graph.set_trainer_arity(id, inputs, outputs)?;
            }
        }
        BlockKind::DataSource => {
            // One output per attached file; the attachment itself only
            // remembers the latest file, whose output comes last.
            let earlier = match record.source {
                Some(_) => record.output_ports.len().saturating_sub(1),
                None => record.output_ports.len(),
            };
            for port in &record.output_ports[..earlier] {
                let tag = match port {
                    OutputPortRecord::Data { type_tag, .. } => type_tag.as_str(),
                    OutputPortRecord::Function { .. } => NONE_TAG,
                };
                graph.add_port(id, Direction::Output, PortKind::Data, Some(tag))?;
            }
            if let Some(path) = &record.source {
                graph.attach_source(id, path)?;
            }
        }
        BlockKind::FuncSource => {
            if let Some(function) = &record.function {
                graph.import_function(id, function.clone())?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn restore_output_names(
    graph: &mut FlowGraph,
    document: &GraphDocument,
    ids: &HashMap<u32, BlockId>,
) -> Result<(), StorageError> {
    let mut tags: Vec<(PortRef, &str, &str)> = Vec::new();
    let mut captions: Vec<(PortRef, &str)> = Vec::new();
    for record in &document.blocks {
        let Some(&block) = ids.get(&record.id) else {
            continue;
        };
        for port in &record.output_ports {
            let live = PortRef::new(block, port.index());
            match port {
                OutputPortRecord::Data {
                    type_tag,
                    annotation,
                    ..
                } => {
                    let typed = graph
                        .output_value(live)
                        .and_then(PortValue::as_data)
                        .is_some_and(|data| !data.type_id().is_none());
                    if typed && type_tag != NONE_TAG {
                        tags.push((live, type_tag, annotation));
                    } else if type_tag != NONE_TAG {
                        tracing::debug!(port = %live, tag = %type_tag, "saved tag has no live type");
                    }
                }
                OutputPortRecord::Function { caption, .. } => captions.push((live, caption)),
            }
        }
    }

    let saved: BTreeSet<&str> = tags.iter().map(|(_, tag, _)| *tag).collect();
    let mut settled = BTreeSet::new();
    let mut moving = BTreeSet::new();
    for (port, tag, _) in &tags {
        let Some(id) = graph.output_value(*port).map(PortValue::type_id) else {
            continue;
        };
        if graph.registry().tag(id) == *tag {
            settled.insert(id);
        } else {
            moving.insert(id);
        }
    }
    // Types only seen inside function signatures may hold a saved tag too.
    moving.extend(
        graph
            .registry()
            .entries()
            .filter(|(id, tag)| saved.contains(tag) && !settled.contains(id))
            .map(|(id, _)| id),
    );
    for id in moving {
        let registry = graph.registry();
        let temporary = next_free("loading", |t| registry.uid(t) != TypeId::NONE);
        graph.bind(id, &temporary);
    }

    for (port, tag, annotation) in tags {
        graph.set_output_tag(port, tag, annotation)?;
    }
    for (port, caption) in captions {
        let current = graph.output_value(port).map(PortValue::name);
        if current.is_some_and(|name| name != caption) {
            graph.rename_output(port, caption)?;
        }
    }
    Ok(())
}
