//! Primary conversational turn state.

use serde::Serialize;

/// What the session is doing right now. Exactly one value is active at
/// any instant.
///
/// Invariant: at most one of {recognizer active, synthesizer active,
/// model stream being consumed} is true at a time. `Recording` implies
/// the recognizer is active and the synthesizer is not; `Speaking`
/// implies the converse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Capability checks in progress; nothing may be invoked yet.
    #[default]
    Initializing,
    /// Ready to record.
    Idle,
    /// The recognizer is active.
    Recording,
    /// Waiting on the model or an auxiliary task.
    Processing,
    /// The synthesizer is active.
    Speaking,
    /// A terminal turn failure; recoverable by starting a new recording.
    Error,
}

impl TurnState {
    /// Whether the recognizer is active in this state.
    pub fn recognizer_active(self) -> bool {
        self == TurnState::Recording
    }

    /// Whether the synthesizer is active in this state.
    pub fn synthesizer_active(self) -> bool {
        self == TurnState::Speaking
    }

    /// Whether a new recording session may be started from this state.
    pub fn can_start_recording(self) -> bool {
        matches!(self, TurnState::Idle | TurnState::Error)
    }

    /// Whether the machine is mid-turn (a started turn has not reached a
    /// terminal sub-state yet).
    pub fn busy(self) -> bool {
        matches!(
            self,
            TurnState::Recording | TurnState::Processing | TurnState::Speaking
        )
    }
}
