//! Per-kind connection policies.
//!
//! Each block kind maps to one [`ConnectionPolicy`]. A policy reads the
//! graph and the proposed [`ConnectionAttempt`] and either accepts it or
//! returns the [`ConnectionError`] the block would report. Policies never
//! mutate anything.

use blockflow_core::block::BlockKind;
use blockflow_core::error::CoreError;
use blockflow_core::graph::FlowGraph;
use blockflow_core::id::PortRef;
use blockflow_core::port::{Direction, PortValue};
use blockflow_core::signature::Signature;
use blockflow_core::type_id::{IdentityRegistry, TypeId, NONE_TAG};

use super::diagnostics::{compare_sequences, ChainSide, ConnectionError};

/// A proposed edge, captured fresh for each validation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionAttempt {
    pub source: PortRef,
    pub target: PortRef,
    pub source_caption: String,
    pub target_caption: String,
    /// Type id the output carries (NONE for functions).
    pub received: TypeId,
    /// Signature the output carries, for function ports.
    pub received_signature: Option<Signature>,
}

impl ConnectionAttempt {
    /// Captures the attempt `source -> target`. Fails only when either block
    /// or the output port does not exist.
    pub fn new(graph: &FlowGraph, source: PortRef, target: PortRef) -> Result<Self, CoreError> {
        let from = graph
            .block(source.block)
            .ok_or(CoreError::BlockNotFound { id: source.block })?;
        let to = graph
            .block(target.block)
            .ok_or(CoreError::BlockNotFound { id: target.block })?;
        let value = graph
            .output_value(source)
            .ok_or(CoreError::PortOutOfRange {
                direction: Direction::Output,
                port: source,
                count: from.outputs().len(),
            })?;
        Ok(ConnectionAttempt {
            source,
            target,
            source_caption: from.caption().to_string(),
            target_caption: to.caption().to_string(),
            received: value.type_id(),
            received_signature: value.as_function().map(|f| f.signature().clone()),
        })
    }
}

/// How a block kind judges incoming connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPolicy {
    /// Everything that passes the structural checks.
    AcceptAll,
    /// Both data inputs must carry the same type (difference, score).
    MatchingPair,
    /// Adjacent function inputs must chain (composer).
    FunctionChain,
    /// Only unary functions (sensitivity analysis).
    SingularFunction,
    /// Data inputs must match the function's declared inputs by position
    /// (external processor). Never overridable.
    PositionalArguments,
}

impl ConnectionPolicy {
    pub fn for_kind(kind: BlockKind) -> Self {
        match kind {
            BlockKind::Difference | BlockKind::Score => ConnectionPolicy::MatchingPair,
            BlockKind::Composer => ConnectionPolicy::FunctionChain,
            BlockKind::SensitivityAnalysis => ConnectionPolicy::SingularFunction,
            BlockKind::Process => ConnectionPolicy::PositionalArguments,
            _ => ConnectionPolicy::AcceptAll,
        }
    }

    /// Judges `attempt` against the current graph.
    pub fn evaluate(
        self,
        graph: &FlowGraph,
        attempt: &ConnectionAttempt,
    ) -> Result<(), ConnectionError> {
        match self {
            ConnectionPolicy::AcceptAll => Ok(()),
            ConnectionPolicy::MatchingPair => matching_pair(graph, attempt),
            ConnectionPolicy::FunctionChain => function_chain(graph, attempt),
            ConnectionPolicy::SingularFunction => singular_function(attempt),
            ConnectionPolicy::PositionalArguments => positional_arguments(graph, attempt),
        }
    }
}

/// An override is only offered when both sides carry a real tag.
fn can_override(registry: &IdentityRegistry, expected: TypeId, received: TypeId) -> bool {
    registry.tag(expected) != NONE_TAG && registry.tag(received) != NONE_TAG
}

fn matching_pair(graph: &FlowGraph, attempt: &ConnectionAttempt) -> Result<(), ConnectionError> {
    let target = attempt.target;
    let other = PortRef::new(target.block, if target.index == 0 { 1 } else { 0 });
    let expected = match graph.input_value(other).and_then(PortValue::as_data) {
        Some(data) => data.type_id(),
        None => return Ok(()),
    };
    if expected == attempt.received {
        return Ok(());
    }
    Err(ConnectionError::TypeMismatch {
        target,
        expected,
        received: attempt.received,
        overridable: can_override(graph.registry(), expected, attempt.received),
    })
}

fn function_chain(graph: &FlowGraph, attempt: &ConnectionAttempt) -> Result<(), ConnectionError> {
    let Some(received) = &attempt.received_signature else {
        return Ok(());
    };
    let target = attempt.target;
    let neighbour = |index: usize| {
        graph
            .input_value(PortRef::new(target.block, index))
            .and_then(PortValue::as_function)
            .map(|f| f.signature().clone())
            .filter(Signature::is_complete)
    };

    if target.index > 0 {
        if let Some(prev) = neighbour(target.index - 1) {
            check_chain(graph, target, ChainSide::Previous, &prev.outputs, &received.inputs)?;
        }
    }
    if let Some(next) = neighbour(target.index + 1) {
        check_chain(graph, target, ChainSide::Next, &next.inputs, &received.outputs)?;
    }
    Ok(())
}

fn check_chain(
    graph: &FlowGraph,
    target: PortRef,
    side: ChainSide,
    expected: &[TypeId],
    received: &[TypeId],
) -> Result<(), ConnectionError> {
    let registry = graph.registry();
    let Some(mismatches) =
        compare_sequences(expected, received, |e, r| can_override(registry, e, r))
    else {
        return Ok(());
    };
    let overridable = mismatches.first().is_some_and(|m| m.overridable);
    Err(ConnectionError::SignatureMismatch {
        target,
        side,
        expected: expected.iter().copied().collect(),
        received: received.iter().copied().collect(),
        mismatches,
        overridable,
    })
}

fn singular_function(attempt: &ConnectionAttempt) -> Result<(), ConnectionError> {
    match &attempt.received_signature {
        Some(signature) if !signature.is_singular() => {
            Err(ConnectionError::SingularSignatureRequired {
                target: attempt.target,
                signature: signature.clone(),
            })
        }
        _ => Ok(()),
    }
}

fn positional_arguments(
    graph: &FlowGraph,
    attempt: &ConnectionAttempt,
) -> Result<(), ConnectionError> {
    let target = attempt.target;
    // Port 0 takes the function itself.
    if target.index == 0 {
        return Ok(());
    }
    let Some(block) = graph.block(target.block) else {
        return Ok(());
    };
    let signature = block.signature();
    if signature.is_empty() {
        return Ok(());
    }
    match signature.inputs.get(target.index - 1) {
        Some(&expected) if expected != attempt.received => Err(ConnectionError::TypeMismatch {
            target,
            expected,
            received: attempt.received,
            overridable: false,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockflow_core::id::BlockId;

    fn out(block: BlockId, index: usize) -> PortRef {
        PortRef::new(block, index)
    }

    fn input(block: BlockId, index: usize) -> PortRef {
        PortRef::new(block, index)
    }

    fn source(graph: &mut FlowGraph, file: &str) -> BlockId {
        let id = graph.add_block(BlockKind::DataSource);
        graph.attach_source(id, file).unwrap();
        id
    }

    fn judge(graph: &FlowGraph, from: PortRef, to: PortRef) -> Result<(), ConnectionError> {
        let attempt = ConnectionAttempt::new(graph, from, to).unwrap();
        let kind = graph.block(to.block).unwrap().kind();
        ConnectionPolicy::for_kind(kind).evaluate(graph, &attempt)
    }

    #[test]
    fn policies_follow_block_kind() {
        assert_eq!(
            ConnectionPolicy::for_kind(BlockKind::Score),
            ConnectionPolicy::MatchingPair
        );
        assert_eq!(
            ConnectionPolicy::for_kind(BlockKind::Composer),
            ConnectionPolicy::FunctionChain
        );
        assert_eq!(
            ConnectionPolicy::for_kind(BlockKind::SplitData),
            ConnectionPolicy::AcceptAll
        );
    }

    #[test]
    fn attempt_captures_both_ends() {
        let mut graph = FlowGraph::new();
        let src = source(&mut graph, "iris.csv");
        let sink = graph.add_block(BlockKind::DataOut);
        let attempt = ConnectionAttempt::new(&graph, out(src, 0), input(sink, 0)).unwrap();
        assert_eq!(attempt.source_caption, "data_source");
        assert_eq!(attempt.target_caption, "data_out");
        assert_eq!(graph.registry().tag(attempt.received), "iris");
        assert!(attempt.received_signature.is_none());
    }

    #[test]
    fn matching_pair_compares_with_the_other_input() {
        let mut graph = FlowGraph::new();
        let a = source(&mut graph, "a.csv");
        let b = source(&mut graph, "b.csv");
        let diff = graph.add_block(BlockKind::Difference);

        // Nothing on the other side yet.
        assert!(judge(&graph, out(a, 0), input(diff, 0)).is_ok());
        graph.connect(out(a, 0), input(diff, 0)).unwrap();

        let err = judge(&graph, out(b, 0), input(diff, 1)).unwrap_err();
        assert!(err.overridable());
        assert_eq!(err.merges().len(), 1);
    }

    #[test]
    fn untagged_side_cannot_be_overridden() {
        let mut graph = FlowGraph::new();
        let a = source(&mut graph, "a.csv");
        let split = graph.add_block(BlockKind::SplitData);
        let score = graph.add_block(BlockKind::Score);
        graph.connect(out(a, 0), input(score, 0)).unwrap();

        // split_data's outputs stay untyped while its inputs are free.
        let err = judge(&graph, out(split, 0), input(score, 1)).unwrap_err();
        assert!(!err.overridable());
    }

    #[test]
    fn singular_policy_rejects_wide_functions() {
        let mut graph = FlowGraph::new();
        let a = source(&mut graph, "a.csv");
        let b = source(&mut graph, "b.csv");
        let transform = graph.add_block(BlockKind::Transform);
        graph.set_input_count(transform, 2).unwrap();
        graph.connect(out(a, 0), input(transform, 0)).unwrap();
        graph.connect(out(b, 0), input(transform, 1)).unwrap();
        let sensitivity = graph.add_block(BlockKind::SensitivityAnalysis);

        let err = judge(&graph, out(transform, 0), input(sensitivity, 0)).unwrap_err();
        assert!(matches!(err, ConnectionError::SingularSignatureRequired { .. }));
        assert!(!err.overridable());
    }

    #[test]
    fn positional_arguments_check_declared_inputs() {
        let mut graph = FlowGraph::new();
        let a = source(&mut graph, "a.csv");
        let b = source(&mut graph, "b.csv");
        let transform = graph.add_block(BlockKind::Transform);
        graph.connect(out(a, 0), input(transform, 0)).unwrap();
        let process = graph.add_block(BlockKind::Process);
        graph.connect(out(transform, 0), input(process, 0)).unwrap();

        assert!(judge(&graph, out(a, 0), input(process, 1)).is_ok());
        let err = judge(&graph, out(b, 0), input(process, 1)).unwrap_err();
        assert!(matches!(err, ConnectionError::TypeMismatch { .. }));
        assert!(!err.overridable());
    }

    #[test]
    fn chain_reports_previous_and_next_mismatches() {
        let mut graph = FlowGraph::new();
        let a = source(&mut graph, "a.csv");
        let b = source(&mut graph, "b.csv");
        let ta = graph.add_block(BlockKind::Transform);
        let tb = graph.add_block(BlockKind::Transform);
        graph.connect(out(a, 0), input(ta, 0)).unwrap();
        graph.connect(out(b, 0), input(tb, 0)).unwrap();
        let composer = graph.add_block(BlockKind::Composer);
        graph.set_input_count(composer, 3).unwrap();

        // encode(a) then decode(a) chains cleanly.
        graph.connect(out(ta, 0), input(composer, 0)).unwrap();
        assert!(judge(&graph, out(ta, 1), input(composer, 1)).is_ok());

        // encode(b) after encode(a) does not.
        let err = judge(&graph, out(tb, 0), input(composer, 1)).unwrap_err();
        match &err {
            ConnectionError::SignatureMismatch {
                side, mismatches, ..
            } => {
                assert_eq!(*side, ChainSide::Previous);
                assert_eq!(mismatches.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.overridable());

        // decode(b) below the free slot: decode(a) no longer feeds it.
        graph.connect(out(tb, 1), input(composer, 2)).unwrap();
        let err = judge(&graph, out(ta, 1), input(composer, 1)).unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::SignatureMismatch {
                side: ChainSide::Next,
                ..
            }
        ));
    }
}
