//! Recoverable connection diagnostics.
//!
//! A [`ConnectionError`] describes why a block refused a proposed edge. Type
//! and signature mismatches carry the id pairs an override would merge;
//! whether the user is offered that override is decided when the error is
//! built (see [`ConnectionError::overridable`]). Signature mismatches are
//! overridden one position at a time, so each [`PositionMismatch`] carries
//! its own flag.

use blockflow_core::id::PortRef;
use blockflow_core::signature::{Signature, TypeSeq};
use blockflow_core::type_id::{IdentityRegistry, TypeId};
use serde::{Deserialize, Serialize};

/// Which neighbour of a function chain disagreed with the new function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainSide {
    /// The function one port above: its outputs must equal our inputs.
    Previous,
    /// The function one port below: our outputs must equal its inputs.
    Next,
}

/// One differing position of a signature comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionMismatch {
    pub position: usize,
    pub expected: TypeId,
    pub received: TypeId,
    /// Both ids carried a real tag when the mismatch was found.
    pub overridable: bool,
}

/// Why a block refused a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ConnectionError {
    /// Two data flows expected to share a type do not.
    #[error("type mismatch at {target}: expected {expected}, received {received}")]
    TypeMismatch {
        target: PortRef,
        expected: TypeId,
        received: TypeId,
        /// `true` when the user may declare both types equal.
        overridable: bool,
    },

    /// Adjacent function signatures disagree.
    ///
    /// `mismatches` lists every differing position. It is empty when the two
    /// sequences differ in length, which can never be overridden.
    /// `overridable` is set when the first differing position may be
    /// overridden, i.e. when the user is asked at least once.
    #[error("signature mismatch at {target} ({side:?}): expected {expected:?}, received {received:?}")]
    SignatureMismatch {
        target: PortRef,
        side: ChainSide,
        expected: TypeSeq,
        received: TypeSeq,
        mismatches: Vec<PositionMismatch>,
        overridable: bool,
    },

    /// A function with more than one input or output reached a port that
    /// only accepts unary functions.
    #[error("{target} requires a singular function signature, received {signature}")]
    SingularSignatureRequired { target: PortRef, signature: Signature },
}

impl ConnectionError {
    /// The input port the refused edge pointed at.
    pub fn target(&self) -> PortRef {
        match self {
            ConnectionError::TypeMismatch { target, .. }
            | ConnectionError::SignatureMismatch { target, .. }
            | ConnectionError::SingularSignatureRequired { target, .. } => *target,
        }
    }

    pub fn overridable(&self) -> bool {
        match self {
            ConnectionError::TypeMismatch { overridable, .. }
            | ConnectionError::SignatureMismatch { overridable, .. } => *overridable,
            ConnectionError::SingularSignatureRequired { .. } => false,
        }
    }

    /// `(received, expected)` id pairs an accepted override binds together,
    /// in position order. A signature mismatch lists the positions up to the
    /// first one that cannot be overridden. Empty when the error cannot be
    /// overridden.
    pub fn merges(&self) -> Vec<(TypeId, TypeId)> {
        if !self.overridable() {
            return Vec::new();
        }
        match self {
            ConnectionError::TypeMismatch {
                expected, received, ..
            } => vec![(*received, *expected)],
            ConnectionError::SignatureMismatch { mismatches, .. } => mismatches
                .iter()
                .take_while(|m| m.overridable)
                .map(|m| (m.received, m.expected))
                .collect(),
            ConnectionError::SingularSignatureRequired { .. } => Vec::new(),
        }
    }

    /// Human-readable message using the registry's current tags.
    pub fn describe(&self, registry: &IdentityRegistry) -> String {
        match self {
            ConnectionError::TypeMismatch {
                expected, received, ..
            } => format!(
                "Failed to connect '{}'. The expected input is of type '{}'.",
                registry.tag(*received),
                registry.tag(*expected)
            ),
            ConnectionError::SignatureMismatch {
                expected, received, ..
            } => format!(
                "Failed to connect '{}'. The expected signature is '{}'.",
                registry.describe(received),
                registry.describe(expected)
            ),
            ConnectionError::SingularSignatureRequired { .. } => {
                "The expected function signature is singular. Please check the connection."
                    .to_string()
            }
        }
    }
}

/// Compares two id sequences position by position.
///
/// Returns `None` when they are equal, `Some(vec![])` when their lengths
/// differ and the list of differing positions otherwise. `overridable`
/// decides each position's flag.
pub fn compare_sequences(
    expected: &[TypeId],
    received: &[TypeId],
    overridable: impl Fn(TypeId, TypeId) -> bool,
) -> Option<Vec<PositionMismatch>> {
    if expected == received {
        return None;
    }
    if expected.len() != received.len() {
        return Some(Vec::new());
    }
    Some(
        expected
            .iter()
            .zip(received)
            .enumerate()
            .filter(|(_, (e, r))| e != r)
            .map(|(position, (e, r))| PositionMismatch {
                position,
                expected: *e,
                received: *r,
                overridable: overridable(*e, *r),
            })
            .collect(),
    )
}
