use std::fmt;

use thiserror::Error;

use crate::core::lifecycle::Phase;

/// Failure raised by a subscription's setup or by a derived dispatch.
///
/// Contained to the subscription or dispatch that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EffectError {
    message: String,
}

impl EffectError {
    pub fn new(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure returned by a program's `update`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UpdateError {
    message: String,
}

impl UpdateError {
    pub fn new(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors reported by the runtime to its callers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// A program was built without one of its required capabilities
    #[error("invalid program: missing `{0}`")]
    InvalidProgram(&'static str),

    /// The runtime is not in a phase that accepts the operation
    #[error("invalid state: {operation} is not allowed while {phase}")]
    InvalidState {
        operation: &'static str,
        phase: Phase,
    },

    /// A message was dispatched with an empty `type`
    #[error("invalid message: the `type` discriminant is empty")]
    InvalidMessage,

    #[error("effect failed: {0}")]
    Effect(#[from] EffectError),

    /// `update` failed; the batch was aborted and the previous state kept
    #[error("update failed on `{kind}` (message {index} of the batch, {dropped} dropped): {source}")]
    Update {
        kind: String,
        index: usize,
        dropped: usize,
        #[source]
        source: UpdateError,
    },
}

impl RuntimeError {
    pub(crate) fn invalid_state(operation: &'static str, phase: Phase) -> Self {
        Self::InvalidState { operation, phase }
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}
