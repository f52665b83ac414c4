//! Block kinds, their port layouts and their propagation rules.
//!
//! A [`Block`] owns its ports. It never sees the rest of the graph: the
//! [`FlowGraph`](crate::graph::FlowGraph) resolves the values its inputs
//! currently observe and hands them in as an `upstream` slice whenever an
//! input is set, reset or removed. Structural changes the block makes to its
//! own port lists are reported back as [`PortEvent`]s so the graph can fix
//! edges and captions afterwards.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::port::{DataPort, Direction, FunctionPort, InputPort, OutputPort, PortKind, PortValue};
use crate::signature::{Signature, TypeSeq};
use crate::type_id::{IdentityRegistry, TypeId};

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// The closed set of block kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    DataSource,
    FuncSource,
    DataOut,
    FuncOut,
    GraphFunction,
    SplitData,
    Difference,
    Score,
    SensitivityAnalysis,
    Process,
    Transform,
    Reduce,
    Trainer,
    #[serde(rename = "pytorch_trainer")]
    TorchTrainer,
    Composer,
}

/// Palette grouping of a block kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Data,
    Output,
    Processor,
    Coder,
    Trainer,
    Composer,
}

impl BlockKind {
    pub const ALL: [BlockKind; 15] = [
        BlockKind::DataSource,
        BlockKind::FuncSource,
        BlockKind::DataOut,
        BlockKind::FuncOut,
        BlockKind::GraphFunction,
        BlockKind::SplitData,
        BlockKind::Difference,
        BlockKind::Score,
        BlockKind::SensitivityAnalysis,
        BlockKind::Process,
        BlockKind::Transform,
        BlockKind::Reduce,
        BlockKind::Trainer,
        BlockKind::TorchTrainer,
        BlockKind::Composer,
    ];

    /// Registry name, also used as the default caption.
    pub fn name(self) -> &'static str {
        match self {
            BlockKind::DataSource => "data_source",
            BlockKind::FuncSource => "func_source",
            BlockKind::DataOut => "data_out",
            BlockKind::FuncOut => "func_out",
            BlockKind::GraphFunction => "graph_function",
            BlockKind::SplitData => "split_data",
            BlockKind::Difference => "difference",
            BlockKind::Score => "score",
            BlockKind::SensitivityAnalysis => "sensitivity_analysis",
            BlockKind::Process => "process",
            BlockKind::Transform => "transform",
            BlockKind::Reduce => "reduce",
            BlockKind::Trainer => "trainer",
            BlockKind::TorchTrainer => "pytorch_trainer",
            BlockKind::Composer => "composer",
        }
    }

    /// Looks a kind up by its registry name.
    pub fn from_name(name: &str) -> Option<BlockKind> {
        BlockKind::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn category(self) -> Category {
        match self {
            BlockKind::DataSource => Category::Data,
            BlockKind::FuncSource
            | BlockKind::DataOut
            | BlockKind::FuncOut
            | BlockKind::GraphFunction => Category::Output,
            BlockKind::SplitData
            | BlockKind::Difference
            | BlockKind::Score
            | BlockKind::SensitivityAnalysis
            | BlockKind::Process => Category::Processor,
            BlockKind::Transform | BlockKind::Reduce => Category::Coder,
            BlockKind::Trainer | BlockKind::TorchTrainer => Category::Trainer,
            BlockKind::Composer => Category::Composer,
        }
    }

    /// Port kind and minimum count of the inputs a user may resize, if any.
    pub fn resizable_inputs(self) -> Option<(PortKind, usize)> {
        match self {
            BlockKind::Composer => Some((PortKind::Function, 1)),
            BlockKind::Transform | BlockKind::Reduce => Some((PortKind::Data, 1)),
            _ => None,
        }
    }

    pub fn is_trainer(self) -> bool {
        self.category() == Category::Trainer
    }
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

/// A function imported from an exported artifact, with the ids exactly as
/// recorded in the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedFunction {
    pub name: String,
    pub file_hash: String,
    pub inputs: Vec<i64>,
    pub outputs: Vec<i64>,
}

/// External resource a source block reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attachment {
    File(String),
    Function(ImportedFunction),
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Structural change a block made to its own port lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PortEvent {
    InputAdded(usize),
    InputRemoved(usize),
    OutputAdded(usize),
    OutputRemoved(usize),
}

/// What happened to one of a block's inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputChange {
    Set(usize),
    Reset(usize),
    /// An input port was removed; the index no longer exists.
    Removed,
}

const SPLIT_TAGS: [&str; 2] = ["X", "Y"];
const SPLIT_ANNOTATIONS: [&str; 2] = ["train", "test"];
const DIFFERENCE_TAG: &str = "a";
const DIFFERENCE_ANNOTATIONS: [&str; 2] = ["1", "2"];
const SCORE_TAGS: [&str; 2] = ["Y_test", "Y_pred"];

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A node of the flow graph.
#[derive(Debug, Clone)]
pub struct Block {
    kind: BlockKind,
    caption: String,
    pub(crate) inputs: Vec<InputPort>,
    pub(crate) outputs: Vec<OutputPort>,
    /// Trainers: the signature of the produced model. Processors that take a
    /// function: the signature of that function.
    signature: Signature,
    /// Coders: input type tuple -> generated output types, so reconnecting
    /// the same inputs yields the same function types.
    type_cache: HashMap<TypeSeq, TypeSeq>,
    attachment: Option<Attachment>,
}

impl Block {
    /// Builds a block of `kind` with its default ports.
    pub(crate) fn new(kind: BlockKind, registry: &mut IdentityRegistry) -> Self {
        let mut block = Block {
            kind,
            caption: kind.name().to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            signature: Signature::default(),
            type_cache: HashMap::new(),
            attachment: None,
        };

        match kind {
            BlockKind::DataSource | BlockKind::FuncSource => {}
            BlockKind::DataOut => block.push_input(PortValue::Data(DataPort::untyped())),
            BlockKind::FuncOut => block.push_input(function("function")),
            BlockKind::GraphFunction => block.push_input(function("f")),
            BlockKind::SplitData => {
                for tag in SPLIT_TAGS {
                    block.push_input(PortValue::Data(DataPort::placeholder(tag, "")));
                }
                for tag in SPLIT_TAGS {
                    for annotation in SPLIT_ANNOTATIONS {
                        block.push_output(PortValue::Data(DataPort::placeholder(tag, annotation)));
                    }
                }
            }
            BlockKind::Difference => {
                for annotation in DIFFERENCE_ANNOTATIONS {
                    block.push_input(PortValue::Data(DataPort::placeholder(
                        DIFFERENCE_TAG,
                        annotation,
                    )));
                }
                block.push_output(PortValue::Data(DataPort::placeholder(DIFFERENCE_TAG, "diff")));
            }
            BlockKind::Score => {
                for tag in SCORE_TAGS {
                    block.push_input(PortValue::Data(DataPort::placeholder(tag, "")));
                }
                for tag in ["nrmse", "r2"] {
                    let id = registry.create_uid_with_tag(tag);
                    block.push_output(PortValue::Data(DataPort::typed(id, registry)));
                }
            }
            BlockKind::SensitivityAnalysis => block.push_input(function("model")),
            BlockKind::Process => block.push_input(function("function")),
            BlockKind::Transform => {
                block.push_input(PortValue::Data(DataPort::untyped()));
                block.push_output(function("encode"));
                block.push_output(function("decode"));
            }
            BlockKind::Reduce => {
                block.push_input(PortValue::Data(DataPort::untyped()));
                block.push_output(function("reduce"));
                block.push_output(function("inv_reduce"));
            }
            BlockKind::Trainer | BlockKind::TorchTrainer => {
                block.signature = Signature::untyped(1, 1);
                for tag in SPLIT_TAGS {
                    block.push_input(PortValue::Data(DataPort::placeholder(tag, "")));
                }
                let name = if kind == BlockKind::Trainer { "predict" } else { "model" };
                let mut port = FunctionPort::new(name);
                port.set_signature(block.signature.clone());
                block.push_output(PortValue::Function(port));
            }
            BlockKind::Composer => {
                block.push_input(function("function"));
                block.push_output(function("f_out"));
            }
        }
        block
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }

    pub(crate) fn set_caption(&mut self, caption: String) {
        self.caption = caption;
    }

    pub fn inputs(&self) -> &[InputPort] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputPort] {
        &self.outputs
    }

    pub fn input(&self, index: usize) -> Option<&InputPort> {
        self.inputs.get(index)
    }

    pub fn output(&self, index: usize) -> Option<&OutputPort> {
        self.outputs.get(index)
    }

    pub fn port_count(&self, direction: Direction) -> usize {
        match direction {
            Direction::Input => self.inputs.len(),
            Direction::Output => self.outputs.len(),
        }
    }

    /// Number of ports of `kind` on one side.
    pub fn count_of_kind(&self, direction: Direction, kind: PortKind) -> usize {
        match direction {
            Direction::Input => self.inputs.iter().filter(|p| p.kind() == kind).count(),
            Direction::Output => self.outputs.iter().filter(|p| p.kind() == kind).count(),
        }
    }

    /// Kind of the port at `index`, if it exists.
    pub fn port_kind(&self, direction: Direction, index: usize) -> Option<PortKind> {
        match direction {
            Direction::Input => self.inputs.get(index).map(InputPort::kind),
            Direction::Output => self.outputs.get(index).map(OutputPort::kind),
        }
    }

    /// Internal signature state (trainers and function-driven processors).
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    pub(crate) fn set_attachment(&mut self, attachment: Attachment) {
        self.attachment = Some(attachment);
    }

    /// The caption a port shows on its own, ignoring any upstream connection.
    pub fn own_caption(&self, direction: Direction, index: usize) -> Option<&str> {
        match direction {
            Direction::Input => self.inputs.get(index).map(|p| p.value.name()),
            Direction::Output => self.outputs.get(index).map(|p| p.value.name()),
        }
    }

    // -----------------------------------------------------------------------
    // Port list edits
    // -----------------------------------------------------------------------

    /// Appends a port and returns its index.
    ///
    /// A named data output gets a fresh type id tagged with `name`; a named
    /// data input only shows `name` as a placeholder.
    pub(crate) fn add_port(
        &mut self,
        direction: Direction,
        kind: PortKind,
        name: Option<&str>,
        registry: &mut IdentityRegistry,
        events: &mut Vec<PortEvent>,
    ) -> usize {
        let value = match (kind, name) {
            (PortKind::Data, None) => PortValue::Data(DataPort::untyped()),
            (PortKind::Data, Some(name)) if direction == Direction::Output => {
                let id = registry.create_uid_with_tag(name);
                PortValue::Data(DataPort::typed(id, registry))
            }
            (PortKind::Data, Some(name)) => PortValue::Data(DataPort::placeholder(name, "")),
            (PortKind::Function, name) => function(name.unwrap_or("function")),
        };
        match direction {
            Direction::Input => {
                self.push_input(value);
                let index = self.inputs.len() - 1;
                events.push(PortEvent::InputAdded(index));
                index
            }
            Direction::Output => {
                self.push_output(value);
                let index = self.outputs.len() - 1;
                events.push(PortEvent::OutputAdded(index));
                index
            }
        }
    }

    /// Removes the most recently added port of `kind` and returns the index
    /// it had, or `None` when the block has no such port.
    pub(crate) fn remove_port(
        &mut self,
        direction: Direction,
        kind: PortKind,
        events: &mut Vec<PortEvent>,
    ) -> Option<usize> {
        match direction {
            Direction::Input => {
                let index = self.inputs.iter().rposition(|p| p.kind() == kind)?;
                self.inputs.remove(index);
                events.push(PortEvent::InputRemoved(index));
                Some(index)
            }
            Direction::Output => {
                let index = self.outputs.iter().rposition(|p| p.kind() == kind)?;
                self.outputs.remove(index);
                events.push(PortEvent::OutputRemoved(index));
                Some(index)
            }
        }
    }

    /// Adds or removes ports of `kind` until exactly `count` exist.
    pub(crate) fn set_port_count(
        &mut self,
        direction: Direction,
        kind: PortKind,
        count: usize,
        registry: &mut IdentityRegistry,
        events: &mut Vec<PortEvent>,
    ) {
        while self.count_of_kind(direction, kind) < count {
            self.add_port(direction, kind, None, registry, events);
        }
        while self.count_of_kind(direction, kind) > count {
            if self.remove_port(direction, kind, events).is_none() {
                break;
            }
        }
    }

    pub(crate) fn output_value_mut(&mut self, index: usize) -> Option<&mut PortValue> {
        self.outputs.get_mut(index).map(|p| &mut p.value)
    }

    /// Rewrites every stored reference to `removed` into `kept`.
    pub(crate) fn replace_type(&mut self, removed: TypeId, kept: TypeId) {
        for input in &mut self.inputs {
            input.value.replace_type(removed, kept);
        }
        for output in &mut self.outputs {
            output.value.replace_type(removed, kept);
        }
        self.signature.replace(removed, kept);

        let needs_rekey = self
            .type_cache
            .iter()
            .any(|(key, value)| key.contains(&removed) || value.contains(&removed));
        if needs_rekey {
            let rewrite = |seq: &TypeSeq| -> TypeSeq {
                seq.iter()
                    .map(|id| if *id == removed { kept } else { *id })
                    .collect()
            };
            self.type_cache = self
                .type_cache
                .iter()
                .map(|(key, value)| (rewrite(key), rewrite(value)))
                .collect();
        }
    }

    // -----------------------------------------------------------------------
    // Propagation
    // -----------------------------------------------------------------------

    /// Reacts to an input being set, reset or removed.
    ///
    /// `upstream[i]` is the value input `i` currently observes, `None` when
    /// it is not connected.
    pub(crate) fn apply_input_change(
        &mut self,
        change: InputChange,
        upstream: &[Option<PortValue>],
        registry: &mut IdentityRegistry,
        events: &mut Vec<PortEvent>,
    ) {
        match (self.kind, change) {
            (BlockKind::SplitData, InputChange::Set(index)) => {
                self.split_outputs(index, data_type(upstream, index), registry)
            }
            (BlockKind::SplitData, InputChange::Reset(index)) => {
                self.split_outputs(index, TypeId::NONE, registry)
            }
            (BlockKind::Difference, change) => {
                if let InputChange::Reset(index) = change {
                    if let Some(port) = self.input_data_mut(index) {
                        let annotation = DIFFERENCE_ANNOTATIONS.get(index).copied().unwrap_or("");
                        port.set_placeholder(DIFFERENCE_TAG, annotation);
                    }
                }
                // The first connected input decides, whatever order the
                // edges arrived in.
                let type_id = (0..DIFFERENCE_ANNOTATIONS.len())
                    .map(|index| data_type(upstream, index))
                    .find(|id| !id.is_none())
                    .unwrap_or(TypeId::NONE);
                self.difference_output(type_id, registry);
            }
            (BlockKind::Score, InputChange::Reset(index)) => {
                if let (Some(port), Some(tag)) = (self.input_data_mut(index), SCORE_TAGS.get(index))
                {
                    port.set_placeholder(tag, "");
                }
            }
            (BlockKind::SensitivityAnalysis, InputChange::Set(0) | InputChange::Reset(0)) => {
                self.signature = function_signature(upstream, 0).cloned().unwrap_or_default();
                self.sensitivity_outputs(registry, events);
            }
            (BlockKind::Process, InputChange::Set(0) | InputChange::Reset(0)) => {
                self.signature = function_signature(upstream, 0).cloned().unwrap_or_default();
                self.process_ports(registry, events);
            }
            (BlockKind::Process, InputChange::Reset(index)) => {
                if let Some(id) = self.signature.inputs.get(index - 1).copied() {
                    let tag = registry.tag(id).to_string();
                    if let Some(port) = self.input_data_mut(index) {
                        port.set_placeholder(&tag, "");
                    }
                }
            }
            (BlockKind::Transform | BlockKind::Reduce, _) => self.recode(upstream, registry),
            (BlockKind::Trainer | BlockKind::TorchTrainer, change) => {
                if let InputChange::Reset(index) = change {
                    let tag = self.trainer_tag(index);
                    if let Some(port) = self.input_data_mut(index) {
                        port.set_placeholder(tag, "");
                    }
                }
                self.update_trainer_signature(upstream);
            }
            (BlockKind::Composer, _) => self.recompose(upstream),
            _ => {}
        }
    }

    /// Resizes a trainer to `inputs` model inputs and `outputs` model
    /// outputs, one data port per signature position.
    pub(crate) fn set_trainer_arity(
        &mut self,
        inputs: usize,
        outputs: usize,
        upstream: &[Option<PortValue>],
        registry: &mut IdentityRegistry,
        events: &mut Vec<PortEvent>,
    ) {
        self.signature.inputs.resize(inputs, TypeId::NONE);
        self.signature.outputs.resize(outputs, TypeId::NONE);
        let before = self.inputs.len();
        self.set_port_count(Direction::Input, PortKind::Data, inputs + outputs, registry, events);
        for index in 0..self.inputs.len() {
            if index >= before || upstream.get(index).and_then(Option::as_ref).is_none() {
                let tag = self.trainer_tag(index);
                if let Some(port) = self.input_data_mut(index) {
                    port.set_placeholder(tag, "");
                }
            }
        }
        self.update_trainer_signature(upstream);
    }

    // -----------------------------------------------------------------------
    // Per-kind rules
    // -----------------------------------------------------------------------

    fn split_outputs(&mut self, input: usize, type_id: TypeId, registry: &IdentityRegistry) {
        let Some(tag) = SPLIT_TAGS.get(input).copied() else {
            return;
        };
        for (offset, annotation) in SPLIT_ANNOTATIONS.into_iter().enumerate() {
            let Some(port) = self
                .output_value_mut(2 * input + offset)
                .and_then(PortValue::as_data_mut)
            else {
                continue;
            };
            port.set_type(type_id, registry);
            port.set_annotation(annotation, registry);
            if type_id.is_none() {
                port.set_placeholder(tag, annotation);
            }
        }
        if type_id.is_none() {
            if let Some(port) = self.input_data_mut(input) {
                port.set_placeholder(tag, "");
            }
        }
    }

    fn difference_output(&mut self, type_id: TypeId, registry: &IdentityRegistry) {
        if let Some(port) = self.output_value_mut(0).and_then(PortValue::as_data_mut) {
            port.set_type(type_id, registry);
            if type_id.is_none() {
                port.set_placeholder(DIFFERENCE_TAG, "diff");
            }
        }
    }

    fn sensitivity_outputs(&mut self, registry: &mut IdentityRegistry, events: &mut Vec<PortEvent>) {
        let count = self.signature.len() * 2;
        self.set_port_count(Direction::Output, PortKind::Data, count, registry, events);
        let input = self.signature.inputs.first().copied();
        let output = self.signature.outputs.first().copied();
        let mut index = 0;
        if let Some(id) = input {
            while index < 2 {
                self.set_output_type(index, id, registry);
                index += 1;
            }
        }
        if let Some(id) = output {
            while index < 4 {
                self.set_output_type(index, id, registry);
                index += 1;
            }
        }
    }

    fn process_ports(&mut self, registry: &mut IdentityRegistry, events: &mut Vec<PortEvent>) {
        let (inputs, outputs) = self.signature.arity();
        self.set_port_count(Direction::Input, PortKind::Data, inputs, registry, events);
        self.set_port_count(Direction::Output, PortKind::Data, outputs, registry, events);
        let tags: Vec<String> = self
            .signature
            .inputs
            .iter()
            .map(|id| registry.tag(*id).to_string())
            .collect();
        for (i, tag) in tags.iter().enumerate() {
            if let Some(port) = self.input_data_mut(i + 1) {
                port.set_placeholder(tag, "");
            }
        }
        let types: Vec<TypeId> = self.signature.outputs.to_vec();
        for (i, id) in types.into_iter().enumerate() {
            self.set_output_type(i, id, registry);
        }
    }

    fn recode(&mut self, upstream: &[Option<PortValue>], registry: &mut IdentityRegistry) {
        let inputs: TypeSeq = upstream
            .iter()
            .flatten()
            .filter_map(PortValue::as_data)
            .map(DataPort::type_id)
            .collect();
        let outputs = if inputs.is_empty() {
            TypeSeq::new()
        } else if let Some(cached) = self.type_cache.get(&inputs) {
            cached.clone()
        } else {
            let fresh: TypeSeq = match self.kind {
                BlockKind::Reduce => std::iter::once(registry.create_uid()).collect(),
                _ => inputs.iter().map(|_| registry.create_uid()).collect(),
            };
            self.type_cache.insert(inputs.clone(), fresh.clone());
            fresh
        };
        let forward = Signature { inputs, outputs };
        let inverse = forward.inverted();
        self.set_function_signature(0, forward);
        self.set_function_signature(1, inverse);
    }

    /// Input `i` feeds signature position `i`; the inputs come first.
    fn update_trainer_signature(&mut self, upstream: &[Option<PortValue>]) {
        let arity = self.signature.inputs.len();
        for (index, slot) in self.signature.inputs.iter_mut().enumerate() {
            *slot = data_type(upstream, index);
        }
        for (index, slot) in self.signature.outputs.iter_mut().enumerate() {
            *slot = data_type(upstream, arity + index);
        }
        let signature = self.signature.clone();
        self.set_function_signature(0, signature);
    }

    fn recompose(&mut self, upstream: &[Option<PortValue>]) {
        let chain: Vec<&Signature> = upstream
            .iter()
            .flatten()
            .filter_map(PortValue::as_function)
            .map(FunctionPort::signature)
            .collect();
        self.set_function_signature(0, Signature::compose(chain));
    }

    fn trainer_tag(&self, index: usize) -> &'static str {
        if index < self.signature.inputs.len() {
            SPLIT_TAGS[0]
        } else {
            SPLIT_TAGS[1]
        }
    }

    fn set_output_type(&mut self, index: usize, type_id: TypeId, registry: &IdentityRegistry) {
        if let Some(port) = self.output_value_mut(index).and_then(PortValue::as_data_mut) {
            port.set_type(type_id, registry);
        }
    }

    fn set_function_signature(&mut self, index: usize, signature: Signature) {
        if let Some(port) = self.output_value_mut(index).and_then(PortValue::as_function_mut) {
            port.set_signature(signature);
        }
    }

    fn input_data_mut(&mut self, index: usize) -> Option<&mut DataPort> {
        self.inputs.get_mut(index).and_then(|p| p.value.as_data_mut())
    }

    fn push_input(&mut self, value: PortValue) {
        self.inputs.push(InputPort::new(value));
    }

    fn push_output(&mut self, value: PortValue) {
        self.outputs.push(OutputPort::new(value));
    }
}

fn function(name: &str) -> PortValue {
    PortValue::Function(FunctionPort::new(name))
}

fn data_type(upstream: &[Option<PortValue>], index: usize) -> TypeId {
    upstream
        .get(index)
        .and_then(Option::as_ref)
        .map(PortValue::type_id)
        .unwrap_or(TypeId::NONE)
}

fn function_signature(upstream: &[Option<PortValue>], index: usize) -> Option<&Signature> {
    upstream
        .get(index)
        .and_then(Option::as_ref)
        .and_then(PortValue::as_function)
        .map(FunctionPort::signature)
}
