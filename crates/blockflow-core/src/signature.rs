//! Function signatures carried by function ports.
//!
//! A [`Signature`] is an ordered list of input [`TypeId`]s and an ordered list
//! of output [`TypeId`]s. Blocks address it with one flat position: positions
//! `0..inputs.len()` are inputs, the remaining ones are outputs.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::CoreError;
use crate::type_id::TypeId;

/// Sequence type used for both halves of a signature.
pub type TypeSeq = SmallVec<[TypeId; 4]>;

/// Input and output type identities of a function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub inputs: TypeSeq,
    pub outputs: TypeSeq,
}

impl Signature {
    pub fn new(inputs: impl IntoIterator<Item = TypeId>, outputs: impl IntoIterator<Item = TypeId>) -> Self {
        Signature {
            inputs: inputs.into_iter().collect(),
            outputs: outputs.into_iter().collect(),
        }
    }

    /// A signature with `inputs` and `outputs` positions, all set to NONE.
    pub fn untyped(inputs: usize, outputs: usize) -> Self {
        Signature {
            inputs: SmallVec::from_elem(TypeId::NONE, inputs),
            outputs: SmallVec::from_elem(TypeId::NONE, outputs),
        }
    }

    /// `(inputs, outputs)` lengths.
    pub fn arity(&self) -> (usize, usize) {
        (self.inputs.len(), self.outputs.len())
    }

    /// Total number of addressable positions.
    pub fn len(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }

    /// Writes `type_id` at flat `position`.
    pub fn update(&mut self, position: usize, type_id: TypeId) -> Result<(), CoreError> {
        let inputs = self.inputs.len();
        let slot = if position < inputs {
            self.inputs.get_mut(position)
        } else {
            self.outputs.get_mut(position - inputs)
        };
        match slot {
            Some(slot) => {
                *slot = type_id;
                Ok(())
            }
            None => Err(CoreError::PositionOutOfRange {
                position,
                len: self.len(),
            }),
        }
    }

    /// Swaps inputs and outputs, turning a forward function into its inverse.
    pub fn invert(&mut self) {
        std::mem::swap(&mut self.inputs, &mut self.outputs);
    }

    /// Returns the inverted copy of this signature.
    pub fn inverted(&self) -> Self {
        let mut inverse = self.clone();
        inverse.invert();
        inverse
    }

    /// Returns `true` when both halves are empty.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    /// Returns `true` when no position holds [`TypeId::NONE`].
    pub fn is_valid(&self) -> bool {
        self.inputs.iter().chain(&self.outputs).all(|id| !id.is_none())
    }

    /// Non-empty and valid: every position is known.
    pub fn is_complete(&self) -> bool {
        !self.is_empty() && self.is_valid()
    }

    /// At most one input and at most one output.
    pub fn is_singular(&self) -> bool {
        self.inputs.len() <= 1 && self.outputs.len() <= 1
    }

    /// Rewrites every occurrence of `removed` to `kept`. Returns `true` if
    /// anything changed.
    pub fn replace(&mut self, removed: TypeId, kept: TypeId) -> bool {
        let mut changed = false;
        for id in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            if *id == removed {
                *id = kept;
                changed = true;
            }
        }
        changed
    }

    /// Composes a chain of functions: inputs of the first, outputs of the
    /// last. An empty chain composes to the empty signature.
    pub fn compose<'a>(chain: impl IntoIterator<Item = &'a Signature>) -> Signature {
        let mut chain = chain.into_iter();
        let Some(first) = chain.next() else {
            return Signature::default();
        };
        let last = chain.last().unwrap_or(first);
        Signature {
            inputs: first.inputs.clone(),
            outputs: last.outputs.clone(),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |ids: &TypeSeq| {
            ids.iter()
                .map(|id| id.0.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "[{}] => [{}]", join(&self.inputs), join(&self.outputs))
    }
}
