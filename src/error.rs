//! Error types shared by tasks and queues.

use std::fmt;
use std::sync::Arc;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The original failure raised inside an execution step, kept behind an
/// `Arc` so a failed task can hand out its outcome repeatedly.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by tasks and queues.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The task reached the `Canceled` terminal state. Also the value an
    /// execution step returns to signal that it observed cancellation.
    #[error("task canceled")]
    Canceled,

    /// The task reached the `Failed` terminal state; wraps the original
    /// error raised by the execution step (or by an uncaught sub-task).
    #[error("task failed: {0}")]
    Execution(#[source] Cause),

    /// An operation was used against its stated contract, e.g. `add` on a
    /// shut-down queue or double submission of the same task.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A bounded wait elapsed before the task reached a terminal state.
    /// The task itself is unaffected.
    #[error("timed out waiting for task")]
    WaitTimeout,

    /// Queue construction failure.
    #[error("queue error: {0}")]
    Queue(String),
}

impl Error {
    /// Wraps an arbitrary failure raised by an execution step.
    pub fn execution<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Error::Execution(Arc::from(err.into()))
    }

    /// Contract-violation error with a message.
    pub fn illegal_state<S: Into<String>>(msg: S) -> Self {
        Error::IllegalState(msg.into())
    }

    /// Queue-level error with a message.
    pub fn queue<S: Into<String>>(msg: S) -> Self {
        Error::Queue(msg.into())
    }

    /// True for the cancellation signal.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    /// The wrapped cause of a failed task, if any.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Error::Execution(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }
}

/// Recorded as the failure cause when an execution step panics instead of
/// returning.
#[derive(Debug, Clone)]
pub struct TaskPanic {
    message: String,
}

impl TaskPanic {
    pub(crate) fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self { message }
    }

    /// The panic message, if one could be extracted from the payload.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TaskPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "execution step panicked: {}", self.message)
    }
}

impl std::error::Error for TaskPanic {}
