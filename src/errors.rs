use thiserror::Error;

/// Why a task reached the `Failed` state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// The task body raised a panic; carries the panic payload message
    /// verbatim when the payload was a string.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The queue was shut down before the task could be handed to a worker.
    #[error("queue closed before the task could be dispatched")]
    QueueClosed,
}
