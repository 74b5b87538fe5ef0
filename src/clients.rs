//! Black-box model collaborators: conversation streaming and auxiliary
//! request/response tasks.

use crate::error::TaskError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Request/stream provider for the conversational language model.
#[async_trait]
pub trait ConversationClient: Send + Sync {
    /// Send a user utterance and receive a lazy sequence of reply
    /// fragments.
    ///
    /// The stream is finite and not restartable; dropping the receiver
    /// abandons the reply.
    ///
    /// # Errors
    ///
    /// Returns a [`TaskError`] if the request could not be issued.
    async fn send(&self, utterance: &str) -> Result<mpsc::Receiver<String>, TaskError>;
}

/// Request/response provider for translation, challenge-sentence
/// generation and pronunciation evaluation.
#[async_trait]
pub trait AuxiliaryTaskClient: Send + Sync {
    /// Translate `text` into the learner's native language.
    async fn translate(&self, text: &str) -> Result<String, TaskError>;

    /// Generate a single pronunciation challenge sentence.
    async fn generate_challenge(&self) -> Result<String, TaskError>;

    /// Evaluate a spoken attempt against the challenge text, returning
    /// coaching feedback.
    async fn evaluate(&self, challenge: &str, attempt: &str) -> Result<String, TaskError>;
}
