//! Queue error types

/// Error returned by event observers. Logged, never propagated.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue '{0}' already has a processor bound")]
    AlreadyBound(String),
    #[error("Concurrency must be at least 1")]
    InvalidConcurrency,
    #[error("No tokio runtime available to spawn workers")]
    NoRuntime,
}

/// Why a job ended up `failed`, as handed to `failed` observers
#[derive(Debug, thiserror::Error)]
pub enum JobFailure<E> {
    /// The handler's error from the final attempt
    #[error(transparent)]
    Error(E),
    /// The handler panicked on the final attempt
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl<E> JobFailure<E> {
    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Error(e) => Some(e),
            Self::Panicked(_) => None,
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}
