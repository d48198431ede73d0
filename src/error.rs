//! Error types.
//!
//! [`Error`] covers the crate's own failure modes (timer misuse, runtime
//! stalls, configuration). [`Failure`] is the cloneable payload that travels
//! through a [`Deferred`](crate::sync::Deferred)'s failure channel when the
//! caller does not pick an error type of their own.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors reported by the crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// `Timer::init` was called on a timer that already has a timeout.
    #[error("timer is already initialized with a {0:?} timeout")]
    TimerAlreadyInitialized(Duration),
    /// A lab runtime has nothing runnable and no pending timers, so the
    /// future passed to `block_on` can never complete.
    #[error("runtime stalled: no runnable tasks and no pending timers")]
    Stalled,
    /// The configured poll budget ran out before `block_on` finished.
    #[error("runtime poll budget of {0} polls exhausted")]
    PollBudgetExhausted(usize),
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// Convenience alias for results carrying [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Cloneable failure payload for deferred values.
///
/// Every awaiting holder of a failed [`Deferred`](crate::sync::Deferred)
/// receives its own clone, so the payload is a message plus an optional
/// shared source error.
#[derive(Clone, Error)]
#[error("{message}")]
pub struct Failure {
    message: Arc<str>,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Failure {
    /// Creates a failure carrying only a message.
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an existing error, using its `Display` output as the message.
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: error.to_string().into(),
            source: Some(Arc::new(error)),
        }
    }

    /// Returns the failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("message", &self.message)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

impl PartialEq for Failure {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

impl Eq for Failure {}

impl From<&str> for Failure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Self::from_error(error)
    }
}
