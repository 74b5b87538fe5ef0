//! Pronunciation-challenge state track.
//!
//! A secondary workflow layered over the turn machine. It borrows the
//! turn machine for its listen/speak steps, so every transition here is
//! guarded against the current [`TurnState`] to keep the two tracks from
//! desynchronizing.

use crate::session::turn::TurnState;
use serde::Serialize;

/// Where the challenge workflow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    /// No challenge in progress.
    #[default]
    Idle,
    /// Waiting for the auxiliary client to produce a sentence.
    GeneratingText,
    /// The sentence was presented; the next utterance is the attempt.
    AwaitingAttempt,
    /// The attempt is being scored.
    EvaluatingAttempt,
    /// Sentence generation failed. Re-enterable only via Idle.
    ErrorGenerating,
    /// Evaluation failed. Re-enterable only via Idle.
    ErrorEvaluating,
}

impl ChallengeStatus {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ChallengeStatus::ErrorGenerating | ChallengeStatus::ErrorEvaluating
        )
    }
}

/// Full challenge state: status plus payload.
///
/// Invariants: `challenge_text` is non-null only in `AwaitingAttempt` or
/// while transitioning into it (the sentence is stored as soon as
/// generation succeeds, but the status flip waits for the intro speech to
/// finish). `error` is non-null only in the two error statuses.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChallengeState {
    pub status: ChallengeStatus,
    pub challenge_text: Option<String>,
    pub error: Option<String>,
}

impl ChallengeState {
    /// Reset to Idle, clearing the stored sentence and challenge error.
    pub fn reset(&mut self) {
        *self = ChallengeState::default();
    }

    /// Whether a new challenge may be started.
    ///
    /// Disallowed while the turn machine is doing anything, and while a
    /// previous challenge is still in flight. The error statuses are
    /// re-entry points.
    pub fn can_start(&self, turn: TurnState) -> bool {
        let turn_free = matches!(turn, TurnState::Idle | TurnState::Error);
        let challenge_free = matches!(
            self.status,
            ChallengeStatus::Idle | ChallengeStatus::ErrorGenerating | ChallengeStatus::ErrorEvaluating
        );
        turn_free && challenge_free
    }

    /// Whether the stored sentence may be re-spoken.
    pub fn can_repeat(&self, turn: TurnState) -> bool {
        self.status == ChallengeStatus::AwaitingAttempt
            && self.challenge_text.is_some()
            && !matches!(
                turn,
                TurnState::Speaking | TurnState::Recording | TurnState::Processing
            )
    }

    /// Whether the next finalized transcript routes to evaluation.
    pub fn awaiting_attempt(&self) -> bool {
        self.status == ChallengeStatus::AwaitingAttempt && self.challenge_text.is_some()
    }
}
