//! Error types for the coaching session core.

/// Top-level error type for the session state machine and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum CoachError {
    /// Missing capability or configuration at startup. Fatal; surfaced once.
    #[error("initialization error: {0}")]
    Init(String),

    /// Speech recognition error.
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Speech synthesis error.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Conversational model error.
    #[error("model error: {0}")]
    Model(String),

    /// Auxiliary task error (translation, challenge generation, evaluation).
    #[error("task error: {0}")]
    Task(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CoachError>;

/// Structured failure returned by black-box collaborators.
///
/// Collaborator errors never cross the state machine boundary as panics;
/// every one is translated into a state transition plus a user-visible
/// message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TaskError {
    /// Human-readable failure detail, shown in the error banner.
    pub message: String,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
