//! The synchronous confirmation channel for overrides.
//!
//! The validator asks a [`Confirm`] implementation before merging ids. Any
//! `FnMut(&OverridePrompt) -> bool` closure works. A signature mismatch is
//! put to the user once per differing position. A [`ConfirmationLatch`]
//! keeps at most one prompt in flight: a prompt raised while another is
//! pending is answered "no" without reaching the user.

use std::cell::Cell;

use blockflow_core::type_id::{IdentityRegistry, TypeId};

use super::diagnostics::{ConnectionError, PositionMismatch};
use super::policy::ConnectionAttempt;

/// What the user is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverridePrompt {
    pub attempt: ConnectionAttempt,
    pub error: ConnectionError,
    /// The signature position being asked about.
    pub position: Option<usize>,
    /// Human-readable reason, with current tags.
    pub message: String,
    /// `(received, expected)` pairs that will be bound together.
    pub merges: Vec<(TypeId, TypeId)>,
}

impl OverridePrompt {
    pub fn new(
        attempt: ConnectionAttempt,
        error: ConnectionError,
        registry: &IdentityRegistry,
    ) -> Self {
        OverridePrompt {
            position: None,
            message: error.describe(registry),
            merges: error.merges(),
            attempt,
            error,
        }
    }

    /// Asks about one position of a signature mismatch. `mismatch` holds the
    /// ids as they stand after the positions already accepted.
    pub fn for_position(
        attempt: ConnectionAttempt,
        error: ConnectionError,
        mismatch: PositionMismatch,
        registry: &IdentityRegistry,
    ) -> Self {
        let message = format!(
            "{} Position {}: '{}' differs from '{}'.",
            error.describe(registry),
            mismatch.position + 1,
            registry.tag(mismatch.received),
            registry.tag(mismatch.expected)
        );
        OverridePrompt {
            position: Some(mismatch.position),
            message,
            merges: vec![(mismatch.received, mismatch.expected)],
            attempt,
            error,
        }
    }
}

/// A yes/no answer to an override prompt.
pub trait Confirm {
    fn confirm(&mut self, prompt: &OverridePrompt) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&OverridePrompt) -> bool,
{
    fn confirm(&mut self, prompt: &OverridePrompt) -> bool {
        self(prompt)
    }
}

/// Always declines. For hosts without a user to ask.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decline;

impl Confirm for Decline {
    fn confirm(&mut self, _prompt: &OverridePrompt) -> bool {
        false
    }
}

/// Single in-flight confirmation guard.
#[derive(Debug, Default)]
pub struct ConfirmationLatch {
    pending: Cell<bool>,
}

impl ConfirmationLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }

    /// Forwards `prompt` to `confirm` unless another prompt is pending.
    pub fn ask(&self, confirm: &mut dyn Confirm, prompt: &OverridePrompt) -> bool {
        if self.pending.replace(true) {
            tracing::debug!(target = %prompt.attempt.target, "confirmation already pending");
            return false;
        }
        let _release = LatchRelease(&self.pending);
        confirm.confirm(prompt)
    }
}

/// Clears the latch even if the callback panics.
struct LatchRelease<'a>(&'a Cell<bool>);

impl Drop for LatchRelease<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}
