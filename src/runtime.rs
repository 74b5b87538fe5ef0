//! Runtime events emitted by the session for frontends and observability.
//!
//! Intentionally lightweight so the coordinator can publish without
//! blocking the event loop; frontends subscribe via a broadcast channel
//! and render the transcript plus the two state enums.

use crate::session::challenge::ChallengeStatus;
use crate::session::turn::TurnState;
use crate::transcript::{EntryId, TranscriptEntry};

/// What the session is doing "right now".
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// The turn state changed.
    TurnChanged(TurnState),
    /// The challenge state changed.
    ChallengeChanged {
        status: ChallengeStatus,
        challenge_text: Option<String>,
    },
    /// A transcript entry was appended.
    EntryAppended(TranscriptEntry),
    /// A streaming entry's text was overwritten.
    EntryUpdated { id: EntryId, text: String },
    /// An entry received its translation.
    EntryTranslated { id: EntryId, text: String },
    /// The general error banner changed (`None` clears it).
    ///
    /// Distinct from the challenge error, which travels with
    /// [`RuntimeEvent::ChallengeChanged`]; clearing one never clears the
    /// other.
    ErrorChanged(Option<String>),
}
