//! Port payloads for both port kinds.
//!
//! A port carries either a data value ([`DataPort`]: a [`TypeId`] plus a
//! free-text annotation) or a function ([`FunctionPort`]: a [`Signature`]).
//! The two are a closed set, so [`PortValue`] is a plain enum and callers
//! match on it instead of probing for a kind at runtime.

use serde::{Deserialize, Serialize};

use crate::id::PortRef;
use crate::naming::sanitize_caption;
use crate::signature::Signature;
use crate::type_id::{IdentityRegistry, TypeId, NONE_TAG};

/// Which side of a block a port sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

/// What a port carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    #[serde(rename = "DataNode")]
    Data,
    #[serde(rename = "FunctionNode")]
    Function,
}

/// Joins a tag and an annotation into a display name.
pub fn display_name(tag: &str, annotation: &str) -> String {
    if annotation.is_empty() {
        tag.to_string()
    } else {
        format!("{}_{}", tag, annotation)
    }
}

/// A data-carrying port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPort {
    type_id: TypeId,
    /// Tag of `type_id` as of the last refresh.
    tag: String,
    annotation: String,
    /// Current display name. Usually `tag` or `tag_annotation`, but may hold
    /// a placeholder or a uniqueness suffix.
    name: String,
}

impl DataPort {
    /// An untyped port displayed as `data_none`.
    pub fn untyped() -> Self {
        DataPort {
            type_id: TypeId::NONE,
            tag: NONE_TAG.to_string(),
            annotation: String::new(),
            name: NONE_TAG.to_string(),
        }
    }

    /// An untyped port displaying a placeholder caption.
    pub fn placeholder(tag: &str, annotation: &str) -> Self {
        let mut port = DataPort::untyped();
        port.set_placeholder(tag, annotation);
        port
    }

    /// A port bound to an existing type id.
    pub fn typed(type_id: TypeId, registry: &IdentityRegistry) -> Self {
        let mut port = DataPort::untyped();
        port.set_type(type_id, registry);
        port
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn annotation(&self) -> &str {
        &self.annotation
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Points the port at `type_id`, taking over that id's current tag.
    pub fn set_type(&mut self, type_id: TypeId, registry: &IdentityRegistry) {
        self.type_id = type_id;
        self.refresh_name(registry);
    }

    /// Sets the annotation. An untyped port keeps its placeholder caption;
    /// the annotation shows once the port gets a type.
    pub fn set_annotation(&mut self, annotation: &str, registry: &IdentityRegistry) {
        self.annotation = sanitize_caption(annotation);
        if !self.type_id.is_none() {
            self.refresh_name(registry);
        }
    }

    /// Recomputes tag and display name from the registry. Returns `true` if
    /// the display name changed.
    pub fn refresh_name(&mut self, registry: &IdentityRegistry) -> bool {
        self.tag = registry.tag(self.type_id).to_string();
        let name = display_name(&self.tag, &self.annotation);
        if name == self.name {
            return false;
        }
        self.name = name;
        true
    }

    /// Shows `tag_annotation` without touching the type id.
    pub fn set_placeholder(&mut self, tag: &str, annotation: &str) {
        self.annotation = annotation.to_string();
        self.name = display_name(tag, annotation);
    }
}

/// A function-carrying port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionPort {
    signature: Signature,
    name: String,
    default_name: String,
}

impl FunctionPort {
    pub fn new(name: &str) -> Self {
        let name = sanitize_caption(name);
        FunctionPort {
            signature: Signature::default(),
            name: name.clone(),
            default_name: name,
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn set_signature(&mut self, signature: Signature) {
        self.signature = signature;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }
}

/// Payload of a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortValue {
    Data(DataPort),
    Function(FunctionPort),
}

impl PortValue {
    /// The default payload for a fresh port of `kind`.
    pub fn of_kind(kind: PortKind) -> Self {
        match kind {
            PortKind::Data => PortValue::Data(DataPort::untyped()),
            PortKind::Function => PortValue::Function(FunctionPort::new("function")),
        }
    }

    pub fn kind(&self) -> PortKind {
        match self {
            PortValue::Data(_) => PortKind::Data,
            PortValue::Function(_) => PortKind::Function,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PortValue::Data(port) => port.name(),
            PortValue::Function(port) => port.name(),
        }
    }

    /// Overwrites the display name (sanitized).
    pub fn set_name(&mut self, name: &str) {
        let name = sanitize_caption(name);
        match self {
            PortValue::Data(port) => port.name = name,
            PortValue::Function(port) => port.name = name,
        }
    }

    pub fn as_data(&self) -> Option<&DataPort> {
        match self {
            PortValue::Data(port) => Some(port),
            PortValue::Function(_) => None,
        }
    }

    pub fn as_data_mut(&mut self) -> Option<&mut DataPort> {
        match self {
            PortValue::Data(port) => Some(port),
            PortValue::Function(_) => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionPort> {
        match self {
            PortValue::Function(port) => Some(port),
            PortValue::Data(_) => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut FunctionPort> {
        match self {
            PortValue::Function(port) => Some(port),
            PortValue::Data(_) => None,
        }
    }

    /// Type id of a data payload; NONE for functions.
    pub fn type_id(&self) -> TypeId {
        self.as_data().map(DataPort::type_id).unwrap_or(TypeId::NONE)
    }

    /// Rewrites every reference to `removed` into `kept`. Returns `true` if
    /// anything changed.
    pub fn replace_type(&mut self, removed: TypeId, kept: TypeId) -> bool {
        match self {
            PortValue::Data(port) if port.type_id == removed => {
                port.type_id = kept;
                true
            }
            PortValue::Data(_) => false,
            PortValue::Function(port) => port.signature.replace(removed, kept),
        }
    }
}

/// An input port: its own placeholder payload plus the upstream output it
/// currently observes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPort {
    pub(crate) value: PortValue,
    pub(crate) source: Option<PortRef>,
}

impl InputPort {
    pub fn new(value: PortValue) -> Self {
        InputPort {
            value,
            source: None,
        }
    }

    pub fn kind(&self) -> PortKind {
        self.value.kind()
    }

    /// The port's own payload, shown while nothing is connected.
    pub fn own_value(&self) -> &PortValue {
        &self.value
    }

    /// The upstream output this input observes.
    pub fn source(&self) -> Option<PortRef> {
        self.source
    }

    pub fn is_connected(&self) -> bool {
        self.source.is_some()
    }
}

/// An output port and the number of connections drawing from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPort {
    pub(crate) value: PortValue,
    pub(crate) connections: usize,
}

impl OutputPort {
    pub fn new(value: PortValue) -> Self {
        OutputPort {
            value,
            connections: 0,
        }
    }

    pub fn kind(&self) -> PortKind {
        self.value.kind()
    }

    pub fn value(&self) -> &PortValue {
        &self.value
    }

    /// `true` while at least one input is connected to this output.
    pub fn in_use(&self) -> bool {
        self.connections > 0
    }

    pub fn connection_count(&self) -> usize {
        self.connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_joins_annotation() {
        assert_eq!(display_name("X", ""), "X");
        assert_eq!(display_name("X", "train"), "X_train");
    }

    #[test]
    fn typed_port_takes_registry_tag() {
        let mut reg = IdentityRegistry::new();
        let id = reg.create_uid_with_tag("features");
        let mut port = DataPort::typed(id, &reg);
        assert_eq!(port.name(), "features");

        port.set_annotation("scaled", &reg);
        assert_eq!(port.name(), "features_scaled");
        assert_eq!(port.tag(), "features");
    }

    #[test]
    fn refresh_reports_changes_only() {
        let mut reg = IdentityRegistry::new();
        let id = reg.create_uid_with_tag("a");
        let mut port = DataPort::typed(id, &reg);
        assert!(!port.refresh_name(&reg));

        reg.bind(id, "b");
        assert!(port.refresh_name(&reg));
        assert_eq!(port.name(), "b");
    }

    #[test]
    fn placeholder_keeps_port_untyped() {
        let port = DataPort::placeholder("Y", "test");
        assert_eq!(port.type_id(), TypeId::NONE);
        assert_eq!(port.name(), "Y_test");
    }

    #[test]
    fn replace_type_touches_data_and_signatures() {
        let mut data = PortValue::Data(DataPort::untyped());
        assert!(data.replace_type(TypeId::NONE, TypeId(0)));
        assert_eq!(data.type_id(), TypeId(0));

        let mut function = FunctionPort::new("f");
        function.set_signature(Signature::new([TypeId(2)], [TypeId(3)]));
        let mut value = PortValue::Function(function);
        assert!(value.replace_type(TypeId(3), TypeId(1)));
        assert_eq!(
            value.as_function().unwrap().signature(),
            &Signature::new([TypeId(2)], [TypeId(1)])
        );
    }

    #[test]
    fn function_port_names_are_sanitized() {
        let port = FunctionPort::new("inv reduce");
        assert_eq!(port.name(), "invreduce");
        assert_eq!(port.default_name(), "invreduce");
    }

    #[test]
    fn port_kind_serializes_with_legacy_names() {
        assert_eq!(serde_json::to_string(&PortKind::Data).unwrap(), "\"DataNode\"");
        assert_eq!(
            serde_json::to_string(&PortKind::Function).unwrap(),
            "\"FunctionNode\""
        );
    }
}
