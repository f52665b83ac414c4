//! Connection validation for interactive editing.
//!
//! [`Validator::propose`] runs when the user draws an edge. Structural
//! problems (missing ports, kind mismatch, occupied input, cycles) are
//! returned as [`CoreError`]s. Everything else becomes a [`Verdict`]:
//!
//! - while the pointer is still held the edge is committed provisionally;
//! - on release (or for a non-drag edit) the target block's
//!   [`ConnectionPolicy`] judges the edge;
//! - a refusal that can be overridden is put to the user through the
//!   [`Confirm`] channel, and an accepted override binds the mismatched ids
//!   through [`FlowGraph::bind`] before the edge is committed;
//! - a signature mismatch is confirmed position by position. Each accepted
//!   position is bound at once; the first refusal, or a position without a
//!   real tag, rejects the edge and leaves the earlier binds in place.
//!
//! [`Validator::release`] re-validates a provisional edge once the gesture
//! ends and removes it if the block refuses.

pub mod confirm;
pub mod diagnostics;
pub mod policy;

pub use confirm::{Confirm, ConfirmationLatch, Decline, OverridePrompt};
pub use diagnostics::{ChainSide, ConnectionError, PositionMismatch};
pub use policy::{ConnectionAttempt, ConnectionPolicy};

use std::collections::HashMap;

use blockflow_core::error::CoreError;
use blockflow_core::graph::FlowGraph;
use blockflow_core::id::{ConnectionId, PortRef};
use blockflow_core::type_id::{BindOutcome, TypeId};

/// State of the pointer gesture that produced a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    /// The button is still held.
    Dragging,
    /// The gesture has ended, or the edit did not come from a drag.
    Released,
}

/// Outcome of a connection proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted {
        connection: ConnectionId,
    },
    /// Committed during a drag; call [`Validator::release`] when it ends.
    Provisional {
        connection: ConnectionId,
    },
    AcceptedWithOverride {
        connection: ConnectionId,
        merges: Vec<BindOutcome>,
    },
    /// Nothing was committed (or a provisional edge was rolled back).
    Rejected {
        error: ConnectionError,
        /// Binds of signature positions accepted before the refusal.
        merges: Vec<BindOutcome>,
    },
}

impl Verdict {
    /// The committed connection, if any.
    pub fn connection(&self) -> Option<ConnectionId> {
        match self {
            Verdict::Accepted { connection }
            | Verdict::Provisional { connection }
            | Verdict::AcceptedWithOverride { connection, .. } => Some(*connection),
            Verdict::Rejected { .. } => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Verdict::Rejected { .. })
    }
}

/// Judges and commits connections, holding the single confirmation latch.
#[derive(Debug, Default)]
pub struct Validator {
    latch: ConfirmationLatch,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latch(&self) -> &ConfirmationLatch {
        &self.latch
    }

    /// Proposes `source -> target`.
    pub fn propose(
        &self,
        graph: &mut FlowGraph,
        source: PortRef,
        target: PortRef,
        gesture: Gesture,
        confirm: &mut dyn Confirm,
    ) -> Result<Verdict, CoreError> {
        graph.check_connection(source, target)?;

        if gesture == Gesture::Dragging {
            let connection = graph.connect_provisional(source, target)?;
            tracing::debug!(%source, %target, %connection, "provisionally connected");
            return Ok(Verdict::Provisional { connection });
        }

        let attempt = ConnectionAttempt::new(graph, source, target)?;
        match self.judge(graph, attempt, confirm) {
            Ok(merges) => {
                let connection = graph.connect(source, target)?;
                Ok(accepted(connection, merges))
            }
            Err(Refusal { error, merges }) => Ok(Verdict::Rejected { error, merges }),
        }
    }

    /// Re-validates a connection committed during a drag. A refused edge is
    /// disconnected again.
    pub fn release(
        &self,
        graph: &mut FlowGraph,
        connection: ConnectionId,
        confirm: &mut dyn Confirm,
    ) -> Result<Verdict, CoreError> {
        let info = graph
            .connection(connection)
            .ok_or(CoreError::ConnectionNotFound { id: connection })?;
        let attempt = ConnectionAttempt::new(graph, info.source, info.target)?;
        match self.judge(graph, attempt, confirm) {
            Ok(merges) => {
                graph.confirm_connection(connection)?;
                Ok(accepted(connection, merges))
            }
            Err(Refusal { error, merges }) => {
                graph.disconnect(connection)?;
                tracing::warn!(
                    source = %info.source,
                    target = %info.target,
                    %error,
                    "rolled back provisional connection"
                );
                Ok(Verdict::Rejected { error, merges })
            }
        }
    }

    /// Releases every provisional connection in the graph.
    pub fn release_all(
        &self,
        graph: &mut FlowGraph,
        confirm: &mut dyn Confirm,
    ) -> Result<Vec<Verdict>, CoreError> {
        let mut verdicts = Vec::new();
        for connection in graph.provisional_connections() {
            if graph.connection(connection).is_some() {
                verdicts.push(self.release(graph, connection, confirm)?);
            }
        }
        Ok(verdicts)
    }

    /// Runs the target's policy and, for an overridable refusal, asks the
    /// user. Returns the binds an accepted override performed.
    fn judge(
        &self,
        graph: &mut FlowGraph,
        attempt: ConnectionAttempt,
        confirm: &mut dyn Confirm,
    ) -> Result<Vec<BindOutcome>, Refusal> {
        let policy = graph
            .block(attempt.target.block)
            .map(|block| ConnectionPolicy::for_kind(block.kind()))
            .unwrap_or(ConnectionPolicy::AcceptAll);
        let error = match policy.evaluate(graph, &attempt) {
            Ok(()) => return Ok(Vec::new()),
            Err(error) => error,
        };
        if !error.overridable() {
            tracing::warn!(target = %attempt.target, %error, "connection rejected");
            return Err(Refusal::new(error));
        }
        if let ConnectionError::SignatureMismatch { mismatches, .. } = &error {
            let mismatches = mismatches.clone();
            return self.judge_positions(graph, attempt, error, &mismatches, confirm);
        }

        let prompt = OverridePrompt::new(attempt, error, graph.registry());
        if !self.latch.ask(confirm, &prompt) {
            tracing::info!(target = %prompt.attempt.target, "override declined");
            return Err(Refusal::new(prompt.error));
        }
        let merges = apply_overrides(graph, &prompt.merges);
        tracing::info!(
            target = %prompt.attempt.target,
            binds = merges.len(),
            "override accepted"
        );
        Ok(merges)
    }

    /// Asks once per differing position, binding each accepted pair before
    /// the next question.
    fn judge_positions(
        &self,
        graph: &mut FlowGraph,
        attempt: ConnectionAttempt,
        error: ConnectionError,
        mismatches: &[PositionMismatch],
        confirm: &mut dyn Confirm,
    ) -> Result<Vec<BindOutcome>, Refusal> {
        let target = attempt.target;
        let mut overrides = Overrides::default();
        for mismatch in mismatches {
            let current = PositionMismatch {
                expected: overrides.resolve(mismatch.expected),
                received: overrides.resolve(mismatch.received),
                ..*mismatch
            };
            if current.expected == current.received {
                continue;
            }
            if !current.overridable {
                tracing::warn!(%target, position = current.position, %error, "connection rejected");
                return Err(overrides.refuse(error));
            }
            let prompt = OverridePrompt::for_position(
                attempt.clone(),
                error.clone(),
                current,
                graph.registry(),
            );
            if !self.latch.ask(confirm, &prompt) {
                tracing::info!(%target, position = current.position, "override declined");
                return Err(overrides.refuse(error));
            }
            overrides.bind(graph, current.received, current.expected);
        }
        tracing::info!(%target, binds = overrides.outcomes.len(), "override accepted");
        Ok(overrides.outcomes)
    }
}

/// A refused proposal and the binds already made on its behalf.
#[derive(Debug)]
struct Refusal {
    error: ConnectionError,
    merges: Vec<BindOutcome>,
}

impl Refusal {
    fn new(error: ConnectionError) -> Self {
        Refusal {
            error,
            merges: Vec::new(),
        }
    }
}

fn accepted(connection: ConnectionId, merges: Vec<BindOutcome>) -> Verdict {
    if merges.is_empty() {
        Verdict::Accepted { connection }
    } else {
        Verdict::AcceptedWithOverride { connection, merges }
    }
}

/// Binds performed so far. Earlier merges may remove ids named by later
/// pairs, so every id is resolved through them first.
#[derive(Debug, Default)]
struct Overrides {
    merged: HashMap<TypeId, TypeId>,
    outcomes: Vec<BindOutcome>,
}

impl Overrides {
    fn resolve(&self, mut id: TypeId) -> TypeId {
        while let Some(next) = self.merged.get(&id) {
            id = *next;
        }
        id
    }

    /// Gives `received` the tag of `expected`.
    fn bind(&mut self, graph: &mut FlowGraph, received: TypeId, expected: TypeId) {
        let received = self.resolve(received);
        let expected = self.resolve(expected);
        if received == expected {
            return;
        }
        let tag = graph.registry().tag(expected).to_string();
        let outcome = graph.bind(received, &tag);
        if let BindOutcome::Merged { kept, removed } = outcome {
            self.merged.insert(removed, kept);
        }
        self.outcomes.push(outcome);
    }

    fn refuse(self, error: ConnectionError) -> Refusal {
        Refusal {
            error,
            merges: self.outcomes,
        }
    }
}

/// Binds each received id to its expected id's tag, in order.
fn apply_overrides(graph: &mut FlowGraph, pairs: &[(TypeId, TypeId)]) -> Vec<BindOutcome> {
    let mut overrides = Overrides::default();
    for &(received, expected) in pairs {
        overrides.bind(graph, received, expected);
    }
    overrides.outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockflow_core::block::BlockKind;
    use blockflow_core::id::BlockId;

    fn port(block: BlockId, index: usize) -> PortRef {
        PortRef::new(block, index)
    }

    fn source(graph: &mut FlowGraph, file: &str) -> BlockId {
        let id = graph.add_block(BlockKind::DataSource);
        graph.attach_source(id, file).unwrap();
        id
    }

    /// Two sources feeding a difference block, the first already connected.
    fn difference_setup() -> (FlowGraph, BlockId, BlockId, BlockId) {
        let mut graph = FlowGraph::new();
        let a = source(&mut graph, "a.csv");
        let b = source(&mut graph, "b.csv");
        let diff = graph.add_block(BlockKind::Difference);
        graph.connect(port(a, 0), port(diff, 0)).unwrap();
        (graph, a, b, diff)
    }

    #[test]
    fn matching_edge_is_accepted() {
        let mut graph = FlowGraph::new();
        let a = source(&mut graph, "a.csv");
        let sink = graph.add_block(BlockKind::DataOut);
        let verdict = Validator::new()
            .propose(&mut graph, port(a, 0), port(sink, 0), Gesture::Released, &mut Decline)
            .unwrap();
        assert!(matches!(verdict, Verdict::Accepted { .. }));
        assert_eq!(graph.connection_count(), 1);
    }

    #[test]
    fn declined_override_commits_nothing() {
        let (mut graph, _, b, diff) = difference_setup();
        let verdict = Validator::new()
            .propose(&mut graph, port(b, 0), port(diff, 1), Gesture::Released, &mut Decline)
            .unwrap();
        assert!(verdict.is_rejected());
        assert_eq!(graph.connection_count(), 1);
        assert_eq!(graph.registry().tag(TypeId(1)), "b");
    }

    #[test]
    fn accepted_override_merges_then_connects() {
        let (mut graph, a, b, diff) = difference_setup();
        let mut yes = |_: &OverridePrompt| true;
        let verdict = Validator::new()
            .propose(&mut graph, port(b, 0), port(diff, 1), Gesture::Released, &mut yes)
            .unwrap();
        match verdict {
            Verdict::AcceptedWithOverride { merges, .. } => {
                assert_eq!(
                    merges,
                    vec![BindOutcome::Merged {
                        kept: TypeId(0),
                        removed: TypeId(1),
                    }]
                );
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(graph.output_value(port(a, 0)).unwrap().type_id(), TypeId(0));
        assert_eq!(graph.output_value(port(b, 0)).unwrap().type_id(), TypeId(0));
        assert_eq!(graph.connection_count(), 2);
    }

    #[test]
    fn drag_commits_provisionally_and_release_confirms() {
        let mut graph = FlowGraph::new();
        let a = source(&mut graph, "a.csv");
        let sink = graph.add_block(BlockKind::DataOut);
        let validator = Validator::new();
        let verdict = validator
            .propose(&mut graph, port(a, 0), port(sink, 0), Gesture::Dragging, &mut Decline)
            .unwrap();
        let connection = verdict.connection().unwrap();
        assert!(matches!(verdict, Verdict::Provisional { .. }));
        assert_eq!(graph.provisional_connections(), vec![connection]);

        let released = validator.release(&mut graph, connection, &mut Decline).unwrap();
        assert_eq!(released, Verdict::Accepted { connection });
        assert!(graph.provisional_connections().is_empty());
    }

    #[test]
    fn release_rolls_back_refused_edge() {
        let (mut graph, _, b, diff) = difference_setup();
        let validator = Validator::new();
        let verdict = validator
            .propose(&mut graph, port(b, 0), port(diff, 1), Gesture::Dragging, &mut Decline)
            .unwrap();
        // The drag-time edge propagates like any other.
        assert!(graph.input_value(port(diff, 1)).is_some());

        let verdicts = validator.release_all(&mut graph, &mut Decline).unwrap();
        assert_eq!(verdicts.len(), 1);
        assert!(verdicts[0].is_rejected());
        assert!(graph.connection(verdict.connection().unwrap()).is_none());
        assert!(graph.input_value(port(diff, 1)).is_none());
        assert_eq!(graph.connection_count(), 1);
    }

    #[test]
    fn structural_errors_are_not_verdicts() {
        let (mut graph, a, _, diff) = difference_setup();
        let err = Validator::new()
            .propose(&mut graph, port(a, 0), port(diff, 0), Gesture::Released, &mut Decline)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidEdge { .. }));
        let err = Validator::new()
            .propose(&mut graph, port(a, 3), port(diff, 1), Gesture::Dragging, &mut Decline)
            .unwrap_err();
        assert!(matches!(err, CoreError::PortOutOfRange { .. }));
    }

    #[test]
    fn singular_refusal_never_prompts() {
        let mut graph = FlowGraph::new();
        let a = source(&mut graph, "a.csv");
        let b = source(&mut graph, "b.csv");
        let transform = graph.add_block(BlockKind::Transform);
        graph.set_input_count(transform, 2).unwrap();
        graph.connect(port(a, 0), port(transform, 0)).unwrap();
        graph.connect(port(b, 0), port(transform, 1)).unwrap();
        let sensitivity = graph.add_block(BlockKind::SensitivityAnalysis);

        let mut prompted = false;
        let mut ask = |_: &OverridePrompt| {
            prompted = true;
            true
        };
        let verdict = Validator::new()
            .propose(
                &mut graph,
                port(transform, 0),
                port(sensitivity, 0),
                Gesture::Released,
                &mut ask,
            )
            .unwrap();
        assert!(verdict.is_rejected());
        assert!(!prompted);
    }

    #[test]
    fn overrides_follow_earlier_merges() {
        let mut graph = FlowGraph::new();
        source(&mut graph, "x.csv");
        source(&mut graph, "y.csv");
        let z = source(&mut graph, "z.csv");
        let (tx, ty, tz) = (TypeId(0), TypeId(1), TypeId(2));
        assert_eq!(graph.output_value(port(z, 0)).unwrap().type_id(), tz);

        // After y -> x merges, a later pair naming y must land on x.
        let outcomes = apply_overrides(&mut graph, &[(ty, tx), (tz, ty)]);
        assert_eq!(outcomes.len(), 2);
        assert!(!graph.registry().contains(tz));
        assert_eq!(graph.output_value(port(z, 0)).unwrap().type_id(), tx);
    }
}
