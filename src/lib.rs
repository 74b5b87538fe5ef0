//! Parla: session state machine for voice-driven language coaching.
//!
//! This crate implements the orchestration core of a speaking coach that
//! alternates between listening to the user, forwarding the transcript to
//! a conversational model, and speaking the reply, plus a pronunciation
//! challenge workflow layered on top.
//!
//! # Architecture
//!
//! The core arbitrates its collaborators behind trait seams:
//! - **Speech capture**: a speech-to-text engine in single-utterance mode
//! - **Speech playback**: a text-to-speech engine with synchronous cancel
//! - **Conversation**: a language model returning a fragment stream
//! - **Auxiliary tasks**: translate / generate-challenge / evaluate calls
//!
//! [`session::SessionMachine`] is a pure transition core: one tagged
//! event in, a list of effects out. [`session::SessionCoordinator`] is
//! the async driver that executes those effects and funnels every
//! continuation back through the machine, so no continuation ever acts
//! on stale state.

pub mod adapters;
pub mod clients;
pub mod config;
pub mod error;
pub mod runtime;
pub mod session;
pub mod transcript;

pub use adapters::{
    CaptureEvent, PlaybackOutcome, RecognitionErrorKind, SpeechCapture, SpeechPlayback,
};
pub use clients::{AuxiliaryTaskClient, ConversationClient};
pub use config::CoachConfig;
pub use error::{CoachError, Result, TaskError};
pub use runtime::RuntimeEvent;
pub use session::{
    ChallengeState, ChallengeStatus, SessionCoordinator, SessionHandle, SessionMachine, TurnState,
    UserIntent,
};
pub use transcript::{EntryId, Sender, TranscriptEntry, TranscriptLog};
