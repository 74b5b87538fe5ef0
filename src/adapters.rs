//! Collaborator traits wrapping the speech engines.
//!
//! The engines themselves (platform recognizers, TTS voices) live behind
//! these seams; the session core only sees their event contracts.

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

/// Classified speech recognition failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionErrorKind {
    /// Nothing was said. Recoverable; the turn retries via Idle.
    NoSpeech,
    /// Microphone could not be captured.
    AudioCapture,
    /// Microphone permission denied.
    NotAllowed,
    /// Any other engine failure.
    Other,
}

/// Discrete events emitted by one single-utterance recognition session.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// The engine detected the user starting to speak.
    SpeechStart,
    /// The engine detected the user pausing.
    SpeechEnd,
    /// Final transcript for the utterance. May be empty.
    Final(String),
    /// The engine failed.
    Error {
        kind: RecognitionErrorKind,
        message: String,
    },
    /// The session ended (after a result, an error, or a stop request).
    Ended,
}

/// Wraps a speech-to-text engine in non-continuous, single-utterance mode.
#[async_trait]
pub trait SpeechCapture: Send + Sync {
    /// Begin a new single-utterance recognition session.
    ///
    /// Events for this session arrive on the returned receiver; the channel
    /// closes after [`CaptureEvent::Ended`].
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot start (device busy, missing).
    async fn start(&self) -> Result<mpsc::UnboundedReceiver<CaptureEvent>>;

    /// Ask the engine to stop listening. Idempotent: stopping when not
    /// recording is a no-op. The session still terminates through its own
    /// `Ended` event, not synchronously here.
    fn stop(&self);
}

/// Terminal outcome of one playback request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The utterance was spoken to the end.
    Finished,
    /// Playback was cancelled. Benign; treated like completion.
    Interrupted,
    /// The synthesis engine failed.
    Failed(String),
}

/// Wraps a text-to-speech engine.
#[async_trait]
pub trait SpeechPlayback: Send + Sync {
    /// Speak `text`, resolving when playback terminates.
    ///
    /// Implementations must guarantee that `cancel()` followed by `speak()`
    /// never produces overlapping audio.
    async fn speak(&self, text: &str) -> PlaybackOutcome;

    /// Cancel the active utterance, if any. The pending `speak` future
    /// resolves with [`PlaybackOutcome::Interrupted`]. Idempotent.
    fn cancel(&self);
}
