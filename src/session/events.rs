//! Tagged event and effect unions for the session machine.
//!
//! Every externally-triggered occurrence (user intents, adapter
//! callbacks, timer fires, collaborator completions) is reified as a
//! [`SessionEvent`]. The machine consumes one event at a time and returns
//! a list of [`Effect`]s for the coordinator to execute, so transitions
//! stay testable without mocking timers or adapters.

use crate::adapters::{CaptureEvent, PlaybackOutcome};
use crate::error::TaskError;
use crate::runtime::RuntimeEvent;
use crate::transcript::EntryId;

/// The user intents forwarded by a presentation layer.
#[derive(Debug, Clone)]
pub enum UserIntent {
    /// Start recording, or stop the active recording session.
    ToggleRecording,
    /// Cancel the active utterance and settle back to Idle.
    StopSpeaking,
    /// Begin a pronunciation challenge.
    StartChallenge,
    /// Re-speak the stored challenge sentence.
    RepeatPhrase,
    /// Lazily translate an agent entry.
    TranslateEntry(EntryId),
}

/// Token carried by a `Speak` effect and echoed back with its
/// playback-completion event.
///
/// Continuations re-fetch current machine state when the token returns
/// instead of capturing it at call time; a token whose precondition no
/// longer holds applies nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakCompletion {
    /// Nothing queued behind this utterance.
    None,
    /// The challenge intro: flip the challenge to AwaitingAttempt once
    /// spoken (the sentence itself is stored before the speech starts).
    ChallengeReady,
    /// Evaluation feedback: reset the challenge to Idle once spoken.
    ResetChallenge,
    /// An apology for a terminal turn failure: settle in Error, not Idle.
    EnterError,
}

/// Everything that can drive a transition.
#[derive(Debug)]
pub enum SessionEvent {
    /// A user intent arrived from the frontend.
    Intent(UserIntent),
    /// Capability checks passed.
    InitSucceeded,
    /// Capability checks failed.
    InitFailed(String),
    /// An event from the recognition session with the given generation.
    /// Events from a superseded session are no-ops.
    Capture { generation: u64, event: CaptureEvent },
    /// The silence timer armed for `generation` fired.
    SilenceTimerFired { generation: u64 },
    /// A playback request terminated. `seq` identifies the utterance.
    PlaybackDone {
        seq: u64,
        outcome: PlaybackOutcome,
        completion: SpeakCompletion,
    },
    /// The model stream yielded a fragment for the given streaming entry.
    ReplyFragment { entry: EntryId, text: String },
    /// The model stream was exhausted.
    ReplyClosed { entry: EntryId },
    /// The model request or stream failed.
    ReplyFailed { entry: EntryId, message: String },
    /// Challenge-sentence generation completed.
    ChallengeGenerated(Result<String, TaskError>),
    /// Pronunciation evaluation completed.
    EvaluationFinished(Result<String, TaskError>),
    /// Translation completed.
    TranslationFinished {
        id: EntryId,
        result: Result<String, TaskError>,
    },
}

/// Side effects requested by a transition, executed by the coordinator.
#[derive(Debug)]
pub enum Effect {
    /// Open a new single-utterance recognition session.
    StartCapture { generation: u64 },
    /// Ask the recognizer to stop (idempotent; the session closes through
    /// its own `Ended` event).
    StopCapture,
    /// Cancel the active utterance, if any.
    CancelPlayback,
    /// Speak `text`; the echoed `seq`/`completion` arrive with
    /// [`SessionEvent::PlaybackDone`]. Implies cancelling active playback
    /// first so audio never overlaps.
    Speak {
        seq: u64,
        text: String,
        completion: SpeakCompletion,
    },
    /// Arm the silence timer for the given recording generation,
    /// replacing any live timer.
    ArmSilenceTimer { generation: u64 },
    /// Disarm the silence timer, if live.
    CancelSilenceTimer,
    /// Request a streamed reply for `utterance`, feeding the streaming
    /// transcript entry `entry`.
    SendUtterance { entry: EntryId, utterance: String },
    /// Request a challenge sentence.
    GenerateChallenge,
    /// Score an attempt against the stored challenge text.
    EvaluateAttempt { challenge: String, attempt: String },
    /// Request a translation for an entry.
    Translate { id: EntryId, text: String },
    /// Publish a runtime event to frontends.
    Publish(RuntimeEvent),
}
