//! Error types for the scope engine.
//!
//! Two channels, deliberately kept apart:
//!
//! - [`ScopeError`] — engine faults that abort a `digest`/`apply` call
//!   (phase re-entry, non-convergence). These surface to the caller.
//! - [`CallbackError`] — faults raised by user-supplied callables (watch
//!   functions, listeners, queued tasks, event handlers). The engine catches
//!   these at every call site, logs them, and keeps going; a faulting
//!   watcher never takes the rest of a sweep down with it.

use std::fmt;

use crate::scope::Phase;

/// Errors that abort a [`digest`](crate::Scope::digest) or
/// [`apply`](crate::Scope::apply) call.
///
/// State changes made before the abort remain in place; there is no
/// rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    /// A digest or apply was started while another phase was already active
    /// on the root. Phases are non-reentrant.
    PhaseInProgress(Phase),
    /// The digest loop was still dirty after exhausting its iteration
    /// budget, which means two or more watchers keep invalidating each
    /// other.
    IterationLimitExceeded {
        /// The budget that was exhausted.
        limit: u32,
    },
}

impl fmt::Display for ScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PhaseInProgress(phase) => write!(f, "{phase} already in progress"),
            Self::IterationLimitExceeded { limit } => {
                write!(f, "digest did not settle after {limit} iterations")
            }
        }
    }
}

impl std::error::Error for ScopeError {}

/// Error raised by a user-supplied callable.
///
/// Construct one with [`CallbackError::new`] or via `From<&str>` /
/// `From<String>`, which makes `Err("reason".into())` work inside watch and
/// listen closures.
#[derive(Debug, Clone)]
pub struct CallbackError {
    message: String,
}

impl CallbackError {
    /// Create an error carrying a human-readable reason.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The reason given at construction.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CallbackError {}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Result alias for user-supplied callables.
pub type CallbackResult<T> = Result<T, CallbackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_error_display() {
        assert_eq!(
            ScopeError::PhaseInProgress(Phase::Digest).to_string(),
            "digest already in progress"
        );
        assert_eq!(
            ScopeError::IterationLimitExceeded { limit: 10 }.to_string(),
            "digest did not settle after 10 iterations"
        );
    }

    #[test]
    fn callback_error_from_str() {
        fn fails() -> CallbackResult<()> {
            Err("boom".into())
        }
        let err = fails().unwrap_err();
        assert_eq!(err.message(), "boom");
        assert_eq!(err.to_string(), "boom");
    }
}
