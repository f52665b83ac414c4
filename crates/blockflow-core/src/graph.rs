//! FlowGraph: the block graph container and its consistency engine.
//!
//! [`FlowGraph`] is the single entry point for editing a block graph. It owns
//! the blocks (as a petgraph `StableGraph<Block, Connection>`), the
//! [`IdentityRegistry`] that gives data types their tags, and the
//! [`UniquenessIndex`] that keeps block and output captions distinct.
//!
//! # Propagation
//!
//! Every top-level edit (connect, disconnect, bind, port resize, ...) first
//! applies its direct effect, then drains an internal propagation queue:
//! when an input is set, reset or removed the owning block recomputes its
//! outputs; every output whose value changed queues its downstream inputs in
//! turn. Connections form a DAG, so the queue reaches a fixed point. After
//! the queue is empty every invariant holds again, and debug builds check
//! that they do.

use std::collections::VecDeque;
use std::path::Path;

use petgraph::algo::has_path_connecting;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::stable_graph::StableGraph;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction::{Incoming, Outgoing};
use petgraph::Directed;
use serde::{Deserialize, Serialize};

use crate::block::{Attachment, Block, BlockKind, ImportedFunction, InputChange, PortEvent};
use crate::error::CoreError;
use crate::id::{BlockId, ConnectionId, PortRef};
use crate::naming::{sanitize_caption, UniquenessIndex};
use crate::port::{Direction, InputPort, OutputPort, PortKind, PortValue};
use crate::signature::Signature;
use crate::type_id::{BindOutcome, IdentityRegistry, TypeId};

/// Edge weight: which output feeds which input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub source_port: usize,
    pub target_port: usize,
    /// Committed during a drag gesture and not yet re-validated.
    pub provisional: bool,
}

/// A connection as seen from outside the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub source: PortRef,
    pub target: PortRef,
    pub provisional: bool,
}

/// Change notifications for a host (editor, persistence layer).
///
/// Collected in order and handed out by [`FlowGraph::take_events`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphEvent {
    BlockAdded { block: BlockId },
    BlockRemoved { block: BlockId },
    CaptionChanged { block: BlockId, caption: String },
    OutputCaptionChanged { port: PortRef, caption: String },
    PortsChanged { block: BlockId },
    Connected { connection: ConnectionId },
    Disconnected { source: PortRef, target: PortRef },
    TagRenamed { id: TypeId, old: String, new: String },
    TypesMerged { kept: TypeId, removed: TypeId },
}

/// Pending work for the propagation queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Propagation {
    InputSet(PortRef),
    InputReset(PortRef),
    InputRemoved(BlockId),
    OutputChanged(PortRef),
}

/// The block graph.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    graph: StableGraph<Block, Connection, Directed, u32>,
    registry: IdentityRegistry,
    captions: UniquenessIndex,
    queue: VecDeque<Propagation>,
    events: Vec<GraphEvent>,
}

impl FlowGraph {
    /// Creates an empty graph with its own registry and caption index.
    pub fn new() -> Self {
        FlowGraph {
            graph: StableGraph::new(),
            registry: IdentityRegistry::new(),
            captions: UniquenessIndex::new(),
            queue: VecDeque::new(),
            events: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    pub fn captions(&self) -> &UniquenessIndex {
        &self.captions
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.graph.node_weight(id.into())
    }

    /// Iterates over all live blocks in id order.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.graph
            .node_indices()
            .map(move |idx| (BlockId::from(idx), &self.graph[idx]))
    }

    pub fn block_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn block_by_caption(&self, caption: &str) -> Option<BlockId> {
        self.captions.block_by_caption(caption)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let idx: EdgeIndex<u32> = id.into();
        let (from, to) = self.graph.edge_endpoints(idx)?;
        let weight = self.graph.edge_weight(idx)?;
        Some(ConnectionInfo {
            id,
            source: PortRef::new(from.into(), weight.source_port),
            target: PortRef::new(to.into(), weight.target_port),
            provisional: weight.provisional,
        })
    }

    pub fn connections(&self) -> impl Iterator<Item = ConnectionInfo> + '_ {
        self.graph.edge_references().map(|edge| ConnectionInfo {
            id: edge.id().into(),
            source: PortRef::new(edge.source().into(), edge.weight().source_port),
            target: PortRef::new(edge.target().into(), edge.weight().target_port),
            provisional: edge.weight().provisional,
        })
    }

    pub fn connection_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// The connection feeding input `target`, if any.
    pub fn connection_into(&self, target: PortRef) -> Option<ConnectionId> {
        self.graph
            .edges_directed(target.block.into(), Incoming)
            .find(|edge| edge.weight().target_port == target.index)
            .map(|edge| edge.id().into())
    }

    pub fn provisional_connections(&self) -> Vec<ConnectionId> {
        self.connections()
            .filter(|c| c.provisional)
            .map(|c| c.id)
            .collect()
    }

    pub fn output_value(&self, port: PortRef) -> Option<&PortValue> {
        self.block(port.block)?.output(port.index).map(OutputPort::value)
    }

    /// The value input `target` observes: its upstream output's value while
    /// connected, `None` otherwise.
    pub fn input_value(&self, target: PortRef) -> Option<&PortValue> {
        let source = self.block(target.block)?.input(target.index)?.source()?;
        self.output_value(source)
    }

    /// Caption shown for a port. A connected input shows the upstream
    /// output's current name, anything else shows its own name.
    pub fn port_caption(&self, block: BlockId, direction: Direction, index: usize) -> Option<&str> {
        let port = PortRef::new(block, index);
        if direction == Direction::Input {
            if let Some(value) = self.input_value(port) {
                return Some(value.name());
            }
        }
        self.block(block)?.own_caption(direction, index)
    }

    /// Drains the change notifications collected since the last call.
    pub fn take_events(&mut self) -> Vec<GraphEvent> {
        std::mem::take(&mut self.events)
    }

    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    /// Adds a block of `kind` with its default ports and a unique caption.
    pub fn add_block(&mut self, kind: BlockKind) -> BlockId {
        let block = Block::new(kind, &mut self.registry);
        let id: BlockId = self.graph.add_node(block).into();
        let caption = self.captions.claim_block_caption(id, kind.name());
        self.graph[NodeIndex::from(id)].set_caption(caption);
        self.sync_output_captions(id);
        self.events.push(GraphEvent::BlockAdded { block: id });
        tracing::debug!(block = %id, kind = kind.name(), "added block");

        #[cfg(debug_assertions)]
        self.assert_consistency();

        id
    }

    /// Removes a block. Every downstream input it fed is reset.
    pub fn remove_block(&mut self, id: BlockId) -> Result<Block, CoreError> {
        let idx: NodeIndex<u32> = id.into();
        if self.graph.node_weight(idx).is_none() {
            return Err(CoreError::BlockNotFound { id });
        }

        let incoming: Vec<(NodeIndex<u32>, Connection)> = self
            .graph
            .edges_directed(idx, Incoming)
            .map(|edge| (edge.source(), *edge.weight()))
            .collect();
        for (source, conn) in incoming {
            let upstream = PortRef::new(source.into(), conn.source_port);
            if let Some(output) = self.output_port_mut(upstream) {
                output.connections = output.connections.saturating_sub(1);
            }
        }

        let outgoing: Vec<(NodeIndex<u32>, Connection)> = self
            .graph
            .edges_directed(idx, Outgoing)
            .map(|edge| (edge.target(), *edge.weight()))
            .collect();
        for (target, conn) in outgoing {
            let downstream = PortRef::new(target.into(), conn.target_port);
            if let Some(input) = self.input_port_mut(downstream) {
                input.source = None;
            }
            self.events.push(GraphEvent::Disconnected {
                source: PortRef::new(id, conn.source_port),
                target: downstream,
            });
            self.enqueue(Propagation::InputReset(downstream));
        }

        let block = self
            .graph
            .remove_node(idx)
            .ok_or(CoreError::BlockNotFound { id })?;
        self.captions.release_block(id);
        self.events.push(GraphEvent::BlockRemoved { block: id });
        tracing::debug!(block = %id, "removed block");
        self.drain();

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(block)
    }

    /// Sets a block caption, made unique within the graph. Returns the
    /// caption actually granted.
    pub fn set_caption(&mut self, id: BlockId, caption: &str) -> Result<String, CoreError> {
        let current = self
            .block(id)
            .ok_or(CoreError::BlockNotFound { id })?
            .caption()
            .to_string();
        let mut proposed = sanitize_caption(caption);
        if proposed.is_empty() {
            proposed = current.clone();
        }
        let granted = self.captions.claim_block_caption(id, &proposed);
        if granted != current {
            self.graph[NodeIndex::from(id)].set_caption(granted.clone());
            self.events.push(GraphEvent::CaptionChanged {
                block: id,
                caption: granted.clone(),
            });
        }

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(granted)
    }

    // -----------------------------------------------------------------------
    // Ports
    // -----------------------------------------------------------------------

    /// Appends a port of `kind` and returns its index.
    pub fn add_port(
        &mut self,
        block: BlockId,
        direction: Direction,
        kind: PortKind,
        name: Option<&str>,
    ) -> Result<usize, CoreError> {
        self.require_free_layout(block, "add_port")?;
        let index = self
            .update_block(block, |b, registry, events| {
                b.add_port(direction, kind, name, registry, events)
            })
            .ok_or(CoreError::BlockNotFound { id: block })?;
        self.drain();

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(index)
    }

    /// Removes the most recently added port of `kind` and returns the index
    /// it actually had. Connections on that port are dropped.
    pub fn remove_port(
        &mut self,
        block: BlockId,
        direction: Direction,
        kind: PortKind,
    ) -> Result<usize, CoreError> {
        self.require_free_layout(block, "remove_port")?;
        let removed = self
            .update_block(block, |b, _, events| b.remove_port(direction, kind, events))
            .ok_or(CoreError::BlockNotFound { id: block })?;
        self.drain();

        #[cfg(debug_assertions)]
        self.assert_consistency();

        removed.ok_or(CoreError::NoPortOfKind {
            block,
            direction,
            kind,
        })
    }

    /// Adds or removes ports of `kind` until exactly `count` exist.
    pub fn set_port_count(
        &mut self,
        block: BlockId,
        direction: Direction,
        kind: PortKind,
        count: usize,
    ) -> Result<(), CoreError> {
        self.require_free_layout(block, "set_port_count")?;
        self.update_block(block, |b, registry, events| {
            b.set_port_count(direction, kind, count, registry, events)
        })
        .ok_or(CoreError::BlockNotFound { id: block })?;
        self.drain();

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(())
    }

    /// User-facing input resize, checked against the block kind's rules.
    pub fn set_input_count(&mut self, block: BlockId, count: usize) -> Result<(), CoreError> {
        let kind = self
            .block(block)
            .ok_or(CoreError::BlockNotFound { id: block })?
            .kind();
        let Some((port_kind, min)) = kind.resizable_inputs() else {
            return Err(CoreError::PortCountFixed {
                block,
                direction: Direction::Input,
                kind: PortKind::Data,
            });
        };
        if count < min {
            return Err(CoreError::PortCountBelowMinimum {
                block,
                direction: Direction::Input,
                min,
                requested: count,
            });
        }
        self.set_port_count(block, Direction::Input, port_kind, count)
    }

    /// Sets how many inputs and outputs a trainer's model has. The trainer
    /// gets one data input per signature position.
    pub fn set_trainer_arity(
        &mut self,
        block: BlockId,
        inputs: usize,
        outputs: usize,
    ) -> Result<(), CoreError> {
        let kind = self
            .block(block)
            .ok_or(CoreError::BlockNotFound { id: block })?
            .kind();
        if !kind.is_trainer() {
            return Err(CoreError::UnsupportedOperation {
                block,
                operation: "set_trainer_arity",
            });
        }
        if inputs == 0 {
            return Err(CoreError::PortCountBelowMinimum {
                block,
                direction: Direction::Input,
                min: 1,
                requested: inputs,
            });
        }
        if outputs == 0 {
            return Err(CoreError::PortCountBelowMinimum {
                block,
                direction: Direction::Output,
                min: 1,
                requested: outputs,
            });
        }
        let upstream = self.upstream_values(block);
        self.update_block(block, |b, registry, events| {
            b.set_trainer_arity(inputs, outputs, &upstream, registry, events)
        });
        self.drain();

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(())
    }

    /// Overwrites the display name of a function output port. Returns the
    /// caption actually granted.
    ///
    /// Data outputs are named after their type's tag and annotation; rename
    /// those through [`FlowGraph::set_output_tag`].
    pub fn rename_output(&mut self, port: PortRef, caption: &str) -> Result<String, CoreError> {
        let kind = self.require_output(port)?;
        if kind != PortKind::Function {
            return Err(CoreError::PortKindMismatch {
                port,
                expected: PortKind::Function,
                actual: kind,
            });
        }
        let caption = sanitize_caption(caption);
        if caption.is_empty() {
            return Ok(self
                .output_value(port)
                .map(|v| v.name().to_string())
                .unwrap_or_default());
        }
        self.update_block(port.block, |b, _, _| {
            if let Some(value) = b.output_value_mut(port.index) {
                value.set_name(&caption);
            }
        });
        self.drain();

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(self
            .output_value(port)
            .map(|v| v.name().to_string())
            .unwrap_or_default())
    }

    /// Retags the data type carried by output `port` and sets its
    /// annotation. Renaming to a tag another type already uses merges the two
    /// types graph-wide. An untyped output has no tag to change and keeps its
    /// placeholder caption.
    pub fn set_output_tag(
        &mut self,
        port: PortRef,
        tag: &str,
        annotation: &str,
    ) -> Result<BindOutcome, CoreError> {
        let kind = self.require_output(port)?;
        if kind != PortKind::Data {
            return Err(CoreError::PortKindMismatch {
                port,
                expected: PortKind::Data,
                actual: kind,
            });
        }
        let type_id = self.output_value(port).map(PortValue::type_id).unwrap_or(TypeId::NONE);
        let outcome = self.apply_bind(type_id, tag);
        self.update_block(port.block, |b, registry, _| {
            if let Some(data) = b.output_value_mut(port.index).and_then(PortValue::as_data_mut) {
                data.set_annotation(annotation, registry);
            }
        });
        self.drain();

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Sources
    // -----------------------------------------------------------------------

    /// Attaches a data file to a `data_source` block. Each new file adds an
    /// output whose type is tagged with the file stem.
    pub fn attach_source(&mut self, block: BlockId, path: &str) -> Result<(), CoreError> {
        let current = self.block(block).ok_or(CoreError::BlockNotFound { id: block })?;
        if current.kind() != BlockKind::DataSource {
            return Err(CoreError::UnsupportedOperation {
                block,
                operation: "attach_source",
            });
        }
        let path = path.trim();
        if path.is_empty() || current.attachment() == Some(&Attachment::File(path.to_string())) {
            return Ok(());
        }
        let stem = Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.update_block(block, |b, registry, events| {
            b.set_attachment(Attachment::File(path.to_string()));
            b.add_port(Direction::Output, PortKind::Data, Some(&stem), registry, events);
        });
        self.drain();

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(())
    }

    /// Imports an exported function into a `func_source` block. Artifact ids
    /// are mapped to live ids through the registry's load cache, so the same
    /// artifact always maps to the same types.
    pub fn import_function(
        &mut self,
        block: BlockId,
        function: ImportedFunction,
    ) -> Result<Signature, CoreError> {
        let current = self.block(block).ok_or(CoreError::BlockNotFound { id: block })?;
        if current.kind() != BlockKind::FuncSource {
            return Err(CoreError::UnsupportedOperation {
                block,
                operation: "import_function",
            });
        }
        if function.file_hash.trim().is_empty() {
            return Err(CoreError::InvalidFunction {
                reason: "file_hash missing".into(),
            });
        }
        if function.inputs.is_empty() || function.outputs.is_empty() {
            return Err(CoreError::InvalidFunction {
                reason: "function signature needs at least one input and one output".into(),
            });
        }

        let hash = function.file_hash.trim().to_string();
        let signature = Signature::new(
            function
                .inputs
                .iter()
                .map(|id| self.registry.get_or_create_uid_on_load(&hash, *id))
                .collect::<Vec<_>>(),
            function
                .outputs
                .iter()
                .map(|id| self.registry.get_or_create_uid_on_load(&hash, *id))
                .collect::<Vec<_>>(),
        );
        tracing::debug!(block = %block, %signature, "imported function");

        let imported = signature.clone();
        self.update_block(block, |b, registry, events| {
            if b.port_count(Direction::Output) == 0 {
                b.add_port(Direction::Output, PortKind::Function, None, registry, events);
            }
            if let Some(value) = b.output_value_mut(0) {
                if let Some(port) = value.as_function_mut() {
                    port.set_signature(imported);
                }
                if !sanitize_caption(&function.name).is_empty() {
                    value.set_name(&function.name);
                }
            }
            b.set_attachment(Attachment::Function(function));
        });
        self.drain();

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(signature)
    }

    // -----------------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------------

    /// Structural checks a connection must pass before any type policy is
    /// consulted: both ports exist, carry the same kind, the input is free
    /// and the edge keeps the graph acyclic.
    pub fn check_connection(&self, source: PortRef, target: PortRef) -> Result<(), CoreError> {
        let from = self
            .block(source.block)
            .ok_or(CoreError::BlockNotFound { id: source.block })?;
        let to = self
            .block(target.block)
            .ok_or(CoreError::BlockNotFound { id: target.block })?;
        let output = from.output(source.index).ok_or(CoreError::PortOutOfRange {
            direction: Direction::Output,
            port: source,
            count: from.port_count(Direction::Output),
        })?;
        let input = to.input(target.index).ok_or(CoreError::PortOutOfRange {
            direction: Direction::Input,
            port: target,
            count: to.port_count(Direction::Input),
        })?;
        if output.kind() != input.kind() {
            return Err(CoreError::PortKindMismatch {
                port: target,
                expected: output.kind(),
                actual: input.kind(),
            });
        }
        if input.is_connected() {
            return Err(CoreError::InvalidEdge {
                reason: format!("input {} is already connected", target),
            });
        }
        if has_path_connecting(&self.graph, target.block.into(), source.block.into(), None) {
            return Err(CoreError::InvalidEdge {
                reason: format!("connecting {} -> {} would create a cycle", source, target),
            });
        }
        Ok(())
    }

    /// Commits a connection and propagates the new value downstream.
    pub fn connect(&mut self, source: PortRef, target: PortRef) -> Result<ConnectionId, CoreError> {
        self.insert_connection(source, target, false)
    }

    /// Commits a connection during a drag gesture. It propagates like any
    /// other connection but stays marked until confirmed or removed.
    pub fn connect_provisional(
        &mut self,
        source: PortRef,
        target: PortRef,
    ) -> Result<ConnectionId, CoreError> {
        self.insert_connection(source, target, true)
    }

    /// Clears the provisional mark of a connection.
    pub fn confirm_connection(&mut self, id: ConnectionId) -> Result<(), CoreError> {
        let weight = self
            .graph
            .edge_weight_mut(id.into())
            .ok_or(CoreError::ConnectionNotFound { id })?;
        weight.provisional = false;
        Ok(())
    }

    /// Removes a connection and resets the input it fed.
    pub fn disconnect(&mut self, id: ConnectionId) -> Result<(), CoreError> {
        let info = self.connection(id).ok_or(CoreError::ConnectionNotFound { id })?;
        self.graph.remove_edge(id.into());
        if let Some(output) = self.output_port_mut(info.source) {
            output.connections = output.connections.saturating_sub(1);
        }
        if let Some(input) = self.input_port_mut(info.target) {
            input.source = None;
        }
        self.events.push(GraphEvent::Disconnected {
            source: info.source,
            target: info.target,
        });
        self.enqueue(Propagation::InputReset(info.target));
        self.drain();

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Type identity
    // -----------------------------------------------------------------------

    /// Binds `tag` to `id` and cascades the result through the graph.
    ///
    /// A merge rewrites every reference to the removed id: data ports,
    /// function signatures and block-internal state. Any rename or merge
    /// refreshes data port names and re-runs output caption uniqueness.
    pub fn bind(&mut self, id: TypeId, tag: &str) -> BindOutcome {
        let outcome = self.apply_bind(id, tag);
        self.drain();

        #[cfg(debug_assertions)]
        self.assert_consistency();

        outcome
    }

    fn apply_bind(&mut self, id: TypeId, tag: &str) -> BindOutcome {
        let outcome = self.registry.bind(id, tag);
        match &outcome {
            BindOutcome::Renamed { old, new } => self.events.push(GraphEvent::TagRenamed {
                id,
                old: old.clone(),
                new: new.clone(),
            }),
            BindOutcome::Merged { kept, removed } => {
                self.events.push(GraphEvent::TypesMerged {
                    kept: *kept,
                    removed: *removed,
                });
            }
            _ => {}
        }
        if !outcome.changes_display() {
            return outcome;
        }

        let merge = match outcome {
            BindOutcome::Merged { kept, removed } => Some((removed, kept)),
            _ => None,
        };
        let ids: Vec<BlockId> = self.graph.node_indices().map(BlockId::from).collect();
        for block in ids {
            self.update_block(block, |b, registry, _| {
                if let Some((removed, kept)) = merge {
                    b.replace_type(removed, kept);
                }
                for output in &mut b.outputs {
                    if let Some(data) = output.value.as_data_mut() {
                        if !data.type_id().is_none() {
                            data.refresh_name(registry);
                        }
                    }
                }
            });
        }
        outcome
    }

    // -----------------------------------------------------------------------
    // Propagation internals
    // -----------------------------------------------------------------------

    fn insert_connection(
        &mut self,
        source: PortRef,
        target: PortRef,
        provisional: bool,
    ) -> Result<ConnectionId, CoreError> {
        self.check_connection(source, target)?;
        let edge = self.graph.add_edge(
            source.block.into(),
            target.block.into(),
            Connection {
                source_port: source.index,
                target_port: target.index,
                provisional,
            },
        );
        let id: ConnectionId = edge.into();
        if let Some(output) = self.output_port_mut(source) {
            output.connections += 1;
        }
        if let Some(input) = self.input_port_mut(target) {
            input.source = Some(source);
        }
        self.events.push(GraphEvent::Connected { connection: id });
        self.enqueue(Propagation::InputSet(target));
        self.drain();

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(id)
    }

    fn enqueue(&mut self, item: Propagation) {
        if !self.queue.contains(&item) {
            self.queue.push_back(item);
        }
    }

    /// Runs queued propagation until nothing changes any more.
    fn drain(&mut self) {
        while let Some(item) = self.queue.pop_front() {
            match item {
                Propagation::InputSet(target) => {
                    self.run_input_change(target.block, InputChange::Set(target.index))
                }
                Propagation::InputReset(target) => {
                    self.run_input_change(target.block, InputChange::Reset(target.index))
                }
                Propagation::InputRemoved(block) => {
                    self.run_input_change(block, InputChange::Removed)
                }
                Propagation::OutputChanged(port) => {
                    let targets: Vec<PortRef> = self
                        .graph
                        .edges_directed(port.block.into(), Outgoing)
                        .filter(|edge| edge.weight().source_port == port.index)
                        .map(|edge| PortRef::new(edge.target().into(), edge.weight().target_port))
                        .collect();
                    for target in targets {
                        self.enqueue(Propagation::InputSet(target));
                    }
                }
            }
        }
    }

    fn run_input_change(&mut self, block: BlockId, change: InputChange) {
        let upstream = self.upstream_values(block);
        self.update_block(block, |b, registry, events| {
            b.apply_input_change(change, &upstream, registry, events)
        });
    }

    /// Snapshot of what each input of `block` currently observes.
    fn upstream_values(&self, block: BlockId) -> Vec<Option<PortValue>> {
        let Some(b) = self.block(block) else {
            return Vec::new();
        };
        b.inputs()
            .iter()
            .map(|input| {
                input
                    .source()
                    .and_then(|source| self.output_value(source))
                    .cloned()
            })
            .collect()
    }

    /// Runs `f` on one block, then repairs edges for any ports it removed,
    /// re-claims output captions and queues downstream work for every output
    /// whose value changed.
    fn update_block<R>(
        &mut self,
        id: BlockId,
        f: impl FnOnce(&mut Block, &mut IdentityRegistry, &mut Vec<PortEvent>) -> R,
    ) -> Option<R> {
        let block = self.graph.node_weight_mut(id.into())?;
        let before: Vec<PortValue> = block.outputs.iter().map(|p| p.value.clone()).collect();
        let mut port_events = Vec::new();
        let result = f(block, &mut self.registry, &mut port_events);

        self.apply_port_events(id, &port_events);
        self.sync_output_captions(id);

        let changed: Vec<usize> = self
            .block(id)
            .map(|b| {
                before
                    .iter()
                    .zip(b.outputs())
                    .enumerate()
                    .filter(|(_, (old, new))| *old != new.value())
                    .map(|(index, _)| index)
                    .collect()
            })
            .unwrap_or_default();
        for index in changed {
            self.enqueue(Propagation::OutputChanged(PortRef::new(id, index)));
        }
        Some(result)
    }

    fn apply_port_events(&mut self, block: BlockId, events: &[PortEvent]) {
        for event in events {
            match *event {
                PortEvent::InputAdded(_) | PortEvent::OutputAdded(_) => {}
                PortEvent::InputRemoved(index) => self.detach_removed_input(block, index),
                PortEvent::OutputRemoved(index) => self.detach_removed_output(block, index),
            }
        }
        if !events.is_empty() {
            self.events.push(GraphEvent::PortsChanged { block });
        }
    }

    fn detach_removed_input(&mut self, block: BlockId, index: usize) {
        let incoming: Vec<(EdgeIndex<u32>, NodeIndex<u32>, Connection)> = self
            .graph
            .edges_directed(block.into(), Incoming)
            .map(|edge| (edge.id(), edge.source(), *edge.weight()))
            .collect();
        for (edge, source, conn) in incoming {
            if conn.target_port == index {
                self.graph.remove_edge(edge);
                let upstream = PortRef::new(source.into(), conn.source_port);
                if let Some(output) = self.output_port_mut(upstream) {
                    output.connections = output.connections.saturating_sub(1);
                }
                self.events.push(GraphEvent::Disconnected {
                    source: upstream,
                    target: PortRef::new(block, index),
                });
            } else if conn.target_port > index {
                if let Some(weight) = self.graph.edge_weight_mut(edge) {
                    weight.target_port -= 1;
                }
            }
        }
        self.enqueue(Propagation::InputRemoved(block));
    }

    fn detach_removed_output(&mut self, block: BlockId, index: usize) {
        self.captions.remove_output(block, index);
        let outgoing: Vec<(EdgeIndex<u32>, NodeIndex<u32>, Connection)> = self
            .graph
            .edges_directed(block.into(), Outgoing)
            .map(|edge| (edge.id(), edge.target(), *edge.weight()))
            .collect();
        for (edge, target, conn) in outgoing {
            let downstream = PortRef::new(target.into(), conn.target_port);
            if conn.source_port == index {
                self.graph.remove_edge(edge);
                if let Some(input) = self.input_port_mut(downstream) {
                    input.source = None;
                }
                self.events.push(GraphEvent::Disconnected {
                    source: PortRef::new(block, index),
                    target: downstream,
                });
                self.enqueue(Propagation::InputReset(downstream));
            } else if conn.source_port > index {
                let moved = conn.source_port - 1;
                if let Some(weight) = self.graph.edge_weight_mut(edge) {
                    weight.source_port = moved;
                }
                if let Some(input) = self.input_port_mut(downstream) {
                    input.source = Some(PortRef::new(block, moved));
                }
            }
        }
    }

    /// Makes every output caption of `block` unique, writing any suffix back
    /// into the port name. Stale captions are released before any port
    /// claims a new one.
    fn sync_output_captions(&mut self, block: BlockId) {
        let names: Vec<String> = match self.block(block) {
            Some(b) => b.outputs().iter().map(|p| p.value().name().to_string()).collect(),
            None => return,
        };
        let stale: Vec<(usize, Option<String>)> = names
            .iter()
            .enumerate()
            .filter_map(|(index, name)| {
                let registered = self.captions.port_caption(PortRef::new(block, index));
                (registered != Some(name.as_str()))
                    .then(|| (index, registered.map(str::to_string)))
            })
            .collect();
        for (index, _) in &stale {
            self.captions.release_port(PortRef::new(block, *index));
        }

        for (index, previous) in stale {
            let port = PortRef::new(block, index);
            let name = &names[index];
            let granted = self.captions.claim_port_caption(port, name);
            if granted != *name {
                if let Some(value) = self
                    .graph
                    .node_weight_mut(block.into())
                    .and_then(|b| b.output_value_mut(index))
                {
                    value.set_name(&granted);
                }
            }
            if previous.as_deref() != Some(granted.as_str()) {
                self.events.push(GraphEvent::OutputCaptionChanged {
                    port,
                    caption: granted,
                });
            }
        }
    }

    fn input_port_mut(&mut self, port: PortRef) -> Option<&mut InputPort> {
        self.graph
            .node_weight_mut(port.block.into())?
            .inputs
            .get_mut(port.index)
    }

    fn output_port_mut(&mut self, port: PortRef) -> Option<&mut OutputPort> {
        self.graph
            .node_weight_mut(port.block.into())?
            .outputs
            .get_mut(port.index)
    }

    /// Trainers keep one input per signature position, so their ports only
    /// change through [`FlowGraph::set_trainer_arity`].
    fn require_free_layout(&self, block: BlockId, operation: &'static str) -> Result<(), CoreError> {
        let kind = self
            .block(block)
            .ok_or(CoreError::BlockNotFound { id: block })?
            .kind();
        if kind.is_trainer() {
            return Err(CoreError::UnsupportedOperation { block, operation });
        }
        Ok(())
    }

    fn require_output(&self, port: PortRef) -> Result<PortKind, CoreError> {
        let block = self
            .block(port.block)
            .ok_or(CoreError::BlockNotFound { id: port.block })?;
        block
            .port_kind(Direction::Output, port.index)
            .ok_or(CoreError::PortOutOfRange {
                direction: Direction::Output,
                port,
                count: block.port_count(Direction::Output),
            })
    }

    // -----------------------------------------------------------------------
    // Consistency
    // -----------------------------------------------------------------------

    /// Checks every graph-wide invariant, returning the first violation.
    pub fn check_consistency(&self) -> Result<(), String> {
        if !self.registry.is_consistent() {
            return Err("identity registry maps are not inverse".into());
        }
        if !self.captions.is_consistent() {
            return Err("caption index halves disagree".into());
        }

        for (id, block) in self.blocks() {
            if self.captions.block_caption(id) != Some(block.caption()) {
                return Err(format!("block {} caption '{}' is not indexed", id, block.caption()));
            }
            for (index, output) in block.outputs().iter().enumerate() {
                let port = PortRef::new(id, index);
                if self.captions.port_caption(port) != Some(output.value().name()) {
                    return Err(format!(
                        "output {} caption '{}' is not indexed",
                        port,
                        output.value().name()
                    ));
                }
                let edges = self
                    .graph
                    .edges_directed(id.into(), Outgoing)
                    .filter(|e| e.weight().source_port == index)
                    .count();
                if edges != output.connection_count() {
                    return Err(format!(
                        "output {} counts {} connections, graph has {}",
                        port,
                        output.connection_count(),
                        edges
                    ));
                }
                if let Some(unbound) = unbound_type(&self.registry, output.value()) {
                    return Err(format!("output {} references unbound {}", port, unbound));
                }
            }
            if block.kind().is_trainer() && block.inputs().len() != block.signature().len() {
                return Err(format!(
                    "trainer {} has {} inputs for a signature of {} positions",
                    id,
                    block.inputs().len(),
                    block.signature().len()
                ));
            }
            for (index, input) in block.inputs().iter().enumerate() {
                let port = PortRef::new(id, index);
                let edge_source = self
                    .graph
                    .edges_directed(id.into(), Incoming)
                    .find(|e| e.weight().target_port == index)
                    .map(|e| PortRef::new(e.source().into(), e.weight().source_port));
                if edge_source != input.source() {
                    return Err(format!(
                        "input {} observes {:?}, graph has {:?}",
                        port,
                        input.source(),
                        edge_source
                    ));
                }
            }
        }

        for conn in self.connections() {
            let source_kind = self
                .block(conn.source.block)
                .and_then(|b| b.port_kind(Direction::Output, conn.source.index));
            let target_kind = self
                .block(conn.target.block)
                .and_then(|b| b.port_kind(Direction::Input, conn.target.index));
            match (source_kind, target_kind) {
                (Some(a), Some(b)) if a == b => {}
                _ => {
                    return Err(format!(
                        "connection {} joins incompatible ports {} -> {}",
                        conn.id, conn.source, conn.target
                    ))
                }
            }
        }
        Ok(())
    }

    /// Returns `true` when every graph-wide invariant holds.
    pub fn is_consistent(&self) -> bool {
        self.check_consistency().is_ok()
    }

    /// Only called in debug builds (via `cfg(debug_assertions)`).
    #[cfg(debug_assertions)]
    fn assert_consistency(&self) {
        if let Err(violation) = self.check_consistency() {
            panic!("flow graph inconsistent: {}", violation);
        }
    }
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn unbound_type(registry: &IdentityRegistry, value: &PortValue) -> Option<TypeId> {
    match value {
        PortValue::Data(data) => Some(data.type_id()).filter(|id| !registry.contains(*id)),
        PortValue::Function(function) => {
            let sig = function.signature();
            sig.inputs
                .iter()
                .chain(&sig.outputs)
                .copied()
                .find(|id| !registry.contains(*id))
        }
    }
}
