//! The session state machine.
//!
//! Owns the turn state, the challenge state, the transcript log and the
//! silence-timer bookkeeping. [`SessionMachine::handle`] consumes one
//! [`SessionEvent`] synchronously and returns the side effects the
//! coordinator must execute. The machine itself performs no I/O, which
//! keeps every transition testable without adapters or timers.
//!
//! Staleness is handled with counters rather than captured state:
//! recognition sessions and silence timers carry a recording generation,
//! utterances carry a sequence number, and continuations whose counter no
//! longer matches are no-ops.

use crate::adapters::{CaptureEvent, PlaybackOutcome, RecognitionErrorKind};
use crate::config::CoachConfig;
use crate::error::TaskError;
use crate::runtime::RuntimeEvent;
use crate::session::challenge::{ChallengeState, ChallengeStatus};
use crate::session::events::{Effect, SessionEvent, SpeakCompletion, UserIntent};
use crate::session::turn::TurnState;
use crate::transcript::{EntryId, Sender, TranscriptLog};
use tracing::{debug, info, warn};

/// The one in-flight streamed reply, if any.
#[derive(Debug)]
struct StreamingReply {
    entry: EntryId,
    accumulated: String,
}

/// Single source of truth for what the session is doing right now.
pub struct SessionMachine {
    config: CoachConfig,
    turn: TurnState,
    challenge: ChallengeState,
    transcript: TranscriptLog,
    /// General error banner. Reported alongside, and cleared independently
    /// of, the challenge error.
    error: Option<String>,
    /// Current recording session. Incremented on every start; capture
    /// events and timer fires from older generations are no-ops.
    generation: u64,
    /// Whether a silence timer is live for the current generation.
    timer_armed: bool,
    /// Monotonic utterance counter; only the latest utterance may move the
    /// turn state.
    speech_seq: u64,
    streaming: Option<StreamingReply>,
    translating: Option<EntryId>,
}

impl SessionMachine {
    pub fn new(config: CoachConfig) -> Self {
        Self {
            config,
            turn: TurnState::Initializing,
            challenge: ChallengeState::default(),
            transcript: TranscriptLog::new(),
            error: None,
            generation: 0,
            timer_armed: false,
            speech_seq: 0,
            streaming: None,
            translating: None,
        }
    }

    pub fn turn(&self) -> TurnState {
        self.turn
    }

    pub fn challenge(&self) -> &ChallengeState {
        &self.challenge
    }

    pub fn transcript(&self) -> &TranscriptLog {
        &self.transcript
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process one event to completion and return the effects to execute.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            SessionEvent::Intent(intent) => self.on_intent(intent, &mut effects),
            SessionEvent::InitSucceeded => {
                if self.turn == TurnState::Initializing {
                    self.set_turn(TurnState::Idle, &mut effects);
                }
            }
            SessionEvent::InitFailed(message) => {
                self.set_error(Some(message), &mut effects);
                self.set_turn(TurnState::Error, &mut effects);
            }
            SessionEvent::Capture { generation, event } => {
                if generation == self.generation {
                    self.on_capture(event, &mut effects);
                } else {
                    debug!(generation, current = self.generation, "stale capture event ignored");
                }
            }
            SessionEvent::SilenceTimerFired { generation } => {
                self.on_silence_timer(generation, &mut effects);
            }
            SessionEvent::PlaybackDone {
                seq,
                outcome,
                completion,
            } => self.on_playback_done(seq, outcome, completion, &mut effects),
            SessionEvent::ReplyFragment { entry, text } => {
                self.on_reply_fragment(entry, &text, &mut effects);
            }
            SessionEvent::ReplyClosed { entry } => self.on_reply_closed(entry, &mut effects),
            SessionEvent::ReplyFailed { entry, message } => {
                self.on_reply_failed(entry, message, &mut effects);
            }
            SessionEvent::ChallengeGenerated(result) => {
                self.on_challenge_generated(result, &mut effects);
            }
            SessionEvent::EvaluationFinished(result) => {
                self.on_evaluation_finished(result, &mut effects);
            }
            SessionEvent::TranslationFinished { id, result } => {
                self.on_translation_finished(id, result, &mut effects);
            }
        }
        effects
    }

    // ---- User intents -------------------------------------------------

    fn on_intent(&mut self, intent: UserIntent, effects: &mut Vec<Effect>) {
        match intent {
            UserIntent::ToggleRecording => self.on_toggle_recording(effects),
            UserIntent::StopSpeaking => self.on_stop_speaking(effects),
            UserIntent::StartChallenge => self.on_start_challenge(effects),
            UserIntent::RepeatPhrase => self.on_repeat_phrase(effects),
            UserIntent::TranslateEntry(id) => self.on_translate_entry(id, effects),
        }
    }

    fn on_toggle_recording(&mut self, effects: &mut Vec<Effect>) {
        if self.turn == TurnState::Recording {
            // The transition to Idle happens on the recognizer's own end
            // event, not here.
            effects.push(Effect::StopCapture);
            return;
        }
        let challenge_busy = matches!(
            self.challenge.status,
            ChallengeStatus::GeneratingText | ChallengeStatus::EvaluatingAttempt
        );
        if !self.turn.can_start_recording() || challenge_busy {
            debug!(turn = ?self.turn, challenge = ?self.challenge.status, "record request ignored");
            return;
        }
        effects.push(Effect::CancelPlayback);
        self.set_error(None, effects);
        if self.challenge.error.is_some() {
            self.challenge.error = None;
            self.publish_challenge(effects);
        }
        self.generation += 1;
        self.timer_armed = false;
        self.set_turn(TurnState::Recording, effects);
        effects.push(Effect::StartCapture {
            generation: self.generation,
        });
    }

    fn on_stop_speaking(&mut self, effects: &mut Vec<Effect>) {
        if self.turn != TurnState::Speaking {
            // Idempotent: stopping when not speaking is a no-op.
            return;
        }
        effects.push(Effect::CancelPlayback);
        self.set_turn(TurnState::Idle, effects);
        if matches!(
            self.challenge.status,
            ChallengeStatus::GeneratingText | ChallengeStatus::EvaluatingAttempt
        ) {
            self.challenge.reset();
            self.publish_challenge(effects);
        }
    }

    fn on_start_challenge(&mut self, effects: &mut Vec<Effect>) {
        if !self.challenge.can_start(self.turn) || self.translating.is_some() {
            debug!(turn = ?self.turn, challenge = ?self.challenge.status, "challenge request ignored");
            return;
        }
        info!("starting pronunciation challenge");
        self.set_error(None, effects);
        effects.push(Effect::CancelPlayback);
        self.challenge = ChallengeState {
            status: ChallengeStatus::GeneratingText,
            challenge_text: None,
            error: None,
        };
        self.publish_challenge(effects);
        effects.push(Effect::GenerateChallenge);
    }

    fn on_repeat_phrase(&mut self, effects: &mut Vec<Effect>) {
        if !self.challenge.can_repeat(self.turn) {
            return;
        }
        let text = self
            .challenge
            .challenge_text
            .clone()
            .unwrap_or_default();
        effects.push(Effect::CancelPlayback);
        self.speak(text, SpeakCompletion::None, effects);
    }

    fn on_translate_entry(&mut self, id: EntryId, effects: &mut Vec<Effect>) {
        if self.translating.is_some() {
            return;
        }
        let Some(entry) = self.transcript.get(id) else {
            return;
        };
        if entry.sender != Sender::Agent || entry.translated_text.is_some() {
            return;
        }
        self.translating = Some(id);
        effects.push(Effect::Translate {
            id,
            text: entry.text.clone(),
        });
    }

    // ---- Recognition session ------------------------------------------

    fn on_capture(&mut self, event: CaptureEvent, effects: &mut Vec<Effect>) {
        match event {
            CaptureEvent::SpeechStart => {
                if self.turn == TurnState::Recording && self.timer_armed {
                    self.timer_armed = false;
                    effects.push(Effect::CancelSilenceTimer);
                }
            }
            CaptureEvent::SpeechEnd => {
                if self.turn == TurnState::Recording {
                    self.timer_armed = true;
                    effects.push(Effect::ArmSilenceTimer {
                        generation: self.generation,
                    });
                }
            }
            CaptureEvent::Final(transcript) => self.on_final_transcript(&transcript, effects),
            CaptureEvent::Error { kind, message } => {
                self.on_recognition_error(kind, &message, effects);
            }
            CaptureEvent::Ended => {
                self.disarm_timer(effects);
                if self.turn == TurnState::Recording {
                    self.set_turn(TurnState::Idle, effects);
                }
            }
        }
    }

    fn on_final_transcript(&mut self, transcript: &str, effects: &mut Vec<Effect>) {
        if self.turn != TurnState::Recording {
            return;
        }
        self.disarm_timer(effects);
        let transcript = transcript.trim();
        if transcript.is_empty() {
            let prompt = if self.challenge.awaiting_attempt() {
                self.config.prompts.didnt_hear_challenge.clone()
            } else {
                self.config.prompts.didnt_hear.clone()
            };
            self.append_entry(prompt.clone(), Sender::Agent, effects);
            self.speak(prompt, SpeakCompletion::None, effects);
            return;
        }

        // Routing: a pure decision on the challenge state.
        if self.challenge.awaiting_attempt() {
            let challenge = self
                .challenge
                .challenge_text
                .clone()
                .unwrap_or_default();
            self.append_entry(transcript.to_string(), Sender::User, effects);
            self.challenge.status = ChallengeStatus::EvaluatingAttempt;
            self.publish_challenge(effects);
            self.set_turn(TurnState::Processing, effects);
            effects.push(Effect::EvaluateAttempt {
                challenge,
                attempt: transcript.to_string(),
            });
        } else {
            self.append_entry(transcript.to_string(), Sender::User, effects);
            let placeholder = self.config.prompts.thinking_placeholder.clone();
            let entry = self.append_entry(placeholder, Sender::Agent, effects);
            self.streaming = Some(StreamingReply {
                entry,
                accumulated: String::new(),
            });
            self.set_turn(TurnState::Processing, effects);
            effects.push(Effect::SendUtterance {
                entry,
                utterance: transcript.to_string(),
            });
        }
    }

    fn on_recognition_error(
        &mut self,
        kind: RecognitionErrorKind,
        message: &str,
        effects: &mut Vec<Effect>,
    ) {
        if self.turn != TurnState::Recording {
            return;
        }
        self.disarm_timer(effects);
        match kind {
            RecognitionErrorKind::NoSpeech => {
                // Recoverable: retry via Idle with a spoken prompt.
                let prompt = if self.challenge.awaiting_attempt() {
                    self.config.prompts.no_speech_challenge.clone()
                } else {
                    self.config.prompts.no_speech.clone()
                };
                self.append_entry(prompt.clone(), Sender::Agent, effects);
                self.speak(prompt, SpeakCompletion::None, effects);
            }
            RecognitionErrorKind::AudioCapture => {
                let banner = self.config.prompts.mic_unavailable.clone();
                self.set_error(Some(banner), effects);
                self.set_turn(TurnState::Error, effects);
            }
            RecognitionErrorKind::NotAllowed => {
                let banner = self.config.prompts.mic_denied.clone();
                self.set_error(Some(banner), effects);
                self.set_turn(TurnState::Error, effects);
            }
            RecognitionErrorKind::Other => {
                self.set_error(
                    Some(format!("Speech recognition error: {message}")),
                    effects,
                );
                self.set_turn(TurnState::Error, effects);
            }
        }
    }

    fn on_silence_timer(&mut self, generation: u64, effects: &mut Vec<Effect>) {
        if generation != self.generation || self.turn != TurnState::Recording || !self.timer_armed {
            warn!(
                generation,
                current = self.generation,
                turn = ?self.turn,
                "stale silence timer fire ignored"
            );
            return;
        }
        info!("silence timeout reached, stopping recognizer");
        self.timer_armed = false;
        // Transition to Idle occurs on the recognizer's own end event.
        effects.push(Effect::StopCapture);
    }

    fn disarm_timer(&mut self, effects: &mut Vec<Effect>) {
        if self.timer_armed {
            self.timer_armed = false;
            effects.push(Effect::CancelSilenceTimer);
        }
    }

    // ---- Playback completion ------------------------------------------

    fn on_playback_done(
        &mut self,
        seq: u64,
        outcome: PlaybackOutcome,
        completion: SpeakCompletion,
        effects: &mut Vec<Effect>,
    ) {
        if seq == self.speech_seq {
            match outcome {
                PlaybackOutcome::Finished | PlaybackOutcome::Interrupted => {
                    // Interrupted is benign; both settle the turn.
                    if self.turn == TurnState::Speaking {
                        let next = if completion == SpeakCompletion::EnterError {
                            TurnState::Error
                        } else {
                            TurnState::Idle
                        };
                        self.set_turn(next, effects);
                    }
                }
                PlaybackOutcome::Failed(message) => {
                    self.set_error(Some(format!("Speech synthesis error: {message}")), effects);
                    if self.turn == TurnState::Speaking {
                        self.set_turn(TurnState::Error, effects);
                    }
                }
            }
        } else {
            debug!(seq, current = self.speech_seq, "superseded utterance settled");
        }
        // The completion token is applied even for superseded or
        // interrupted utterances, guarded by current state rather than
        // anything captured when the utterance was queued.
        self.apply_completion(completion, effects);
    }

    fn apply_completion(&mut self, completion: SpeakCompletion, effects: &mut Vec<Effect>) {
        match completion {
            SpeakCompletion::ChallengeReady => {
                if self.challenge.status == ChallengeStatus::GeneratingText
                    && self.challenge.challenge_text.is_some()
                {
                    self.challenge.status = ChallengeStatus::AwaitingAttempt;
                    self.publish_challenge(effects);
                }
            }
            SpeakCompletion::ResetChallenge => {
                if self.challenge.status == ChallengeStatus::EvaluatingAttempt {
                    self.challenge.reset();
                    self.publish_challenge(effects);
                }
            }
            SpeakCompletion::None | SpeakCompletion::EnterError => {}
        }
    }

    // ---- Model stream -------------------------------------------------

    fn on_reply_fragment(&mut self, entry: EntryId, text: &str, effects: &mut Vec<Effect>) {
        let Some(streaming) = self.streaming.as_mut() else {
            return;
        };
        if streaming.entry != entry {
            return;
        }
        streaming.accumulated.push_str(text);
        let accumulated = streaming.accumulated.clone();
        self.transcript.update(entry, accumulated.clone());
        effects.push(Effect::Publish(RuntimeEvent::EntryUpdated {
            id: entry,
            text: accumulated,
        }));
    }

    fn on_reply_closed(&mut self, entry: EntryId, effects: &mut Vec<Effect>) {
        if self.turn != TurnState::Processing {
            return;
        }
        let Some(streaming) = self.streaming.take_if(|s| s.entry == entry) else {
            return;
        };
        if streaming.accumulated.trim().is_empty() {
            let apology = self.config.prompts.empty_reply.clone();
            self.update_entry(entry, apology.clone(), effects);
            self.speak(apology, SpeakCompletion::None, effects);
        } else {
            self.speak(streaming.accumulated, SpeakCompletion::None, effects);
        }
    }

    fn on_reply_failed(&mut self, entry: EntryId, message: String, effects: &mut Vec<Effect>) {
        if self.streaming.take_if(|s| s.entry == entry).is_none() {
            return;
        }
        self.update_entry(
            entry,
            format!("Sorry, I encountered an error: {message}"),
            effects,
        );
        self.set_error(Some(message), effects);
        let apology = self.config.prompts.stream_apology.clone();
        self.speak(apology, SpeakCompletion::EnterError, effects);
    }

    // ---- Auxiliary task completions -----------------------------------

    fn on_challenge_generated(
        &mut self,
        result: Result<String, TaskError>,
        effects: &mut Vec<Effect>,
    ) {
        if self.challenge.status != ChallengeStatus::GeneratingText {
            debug!("challenge generation result after reset ignored");
            return;
        }
        match result {
            Ok(sentence) => {
                let sentence = sentence.trim().to_string();
                let intro = self.config.prompts.challenge_intro.clone();
                self.append_entry(intro.clone(), Sender::Agent, effects);
                self.append_entry(sentence.clone(), Sender::Agent, effects);
                // Store the sentence now; the status flip to
                // AwaitingAttempt waits for the intro to finish speaking.
                self.challenge.challenge_text = Some(sentence);
                self.publish_challenge(effects);
                self.speak(intro, SpeakCompletion::ChallengeReady, effects);
            }
            Err(err) => {
                self.append_entry(
                    format!("Sorry, I couldn't generate a challenge right now: {}", err.message),
                    Sender::Agent,
                    effects,
                );
                self.challenge = ChallengeState {
                    status: ChallengeStatus::ErrorGenerating,
                    challenge_text: None,
                    error: Some(err.message),
                };
                self.publish_challenge(effects);
                // The turn settles back to Idle after the apology, not
                // Error, so a normal conversation can start right away.
                let apology = self.config.prompts.generation_apology.clone();
                self.speak(apology, SpeakCompletion::None, effects);
            }
        }
    }

    fn on_evaluation_finished(
        &mut self,
        result: Result<String, TaskError>,
        effects: &mut Vec<Effect>,
    ) {
        if self.challenge.status != ChallengeStatus::EvaluatingAttempt
            || self.turn != TurnState::Processing
        {
            debug!("evaluation result after reset ignored");
            return;
        }
        match result {
            Ok(feedback) => {
                self.append_entry(feedback.clone(), Sender::Agent, effects);
                // The challenge resets to Idle once the feedback is spoken.
                self.speak(feedback, SpeakCompletion::ResetChallenge, effects);
            }
            Err(err) => {
                self.append_entry(
                    format!("Sorry, I couldn't evaluate your attempt: {}", err.message),
                    Sender::Agent,
                    effects,
                );
                // In place of resetting to Idle.
                self.challenge = ChallengeState {
                    status: ChallengeStatus::ErrorEvaluating,
                    challenge_text: None,
                    error: Some(err.message.clone()),
                };
                self.publish_challenge(effects);
                self.set_error(Some(err.message), effects);
                let apology = self.config.prompts.evaluation_apology.clone();
                self.speak(apology, SpeakCompletion::None, effects);
            }
        }
    }

    fn on_translation_finished(
        &mut self,
        id: EntryId,
        result: Result<String, TaskError>,
        effects: &mut Vec<Effect>,
    ) {
        if self.translating != Some(id) {
            return;
        }
        self.translating = None;
        match result {
            Ok(text) => {
                if self.transcript.mark_translated(id, text.clone()) {
                    effects.push(Effect::Publish(RuntimeEvent::EntryTranslated { id, text }));
                }
            }
            Err(err) => {
                self.set_error(Some(format!("Failed to translate: {}", err.message)), effects);
            }
        }
    }

    // ---- Shared helpers -----------------------------------------------

    fn speak(&mut self, text: String, completion: SpeakCompletion, effects: &mut Vec<Effect>) {
        self.speech_seq += 1;
        self.set_turn(TurnState::Speaking, effects);
        effects.push(Effect::Speak {
            seq: self.speech_seq,
            text,
            completion,
        });
    }

    fn set_turn(&mut self, next: TurnState, effects: &mut Vec<Effect>) {
        if self.turn != next {
            info!(from = ?self.turn, to = ?next, "turn transition");
            self.turn = next;
            effects.push(Effect::Publish(RuntimeEvent::TurnChanged(next)));
        }
    }

    fn set_error(&mut self, error: Option<String>, effects: &mut Vec<Effect>) {
        if self.error != error {
            self.error = error.clone();
            effects.push(Effect::Publish(RuntimeEvent::ErrorChanged(error)));
        }
    }

    fn publish_challenge(&mut self, effects: &mut Vec<Effect>) {
        effects.push(Effect::Publish(RuntimeEvent::ChallengeChanged {
            status: self.challenge.status,
            challenge_text: self.challenge.challenge_text.clone(),
        }));
    }

    fn append_entry(
        &mut self,
        text: String,
        sender: Sender,
        effects: &mut Vec<Effect>,
    ) -> EntryId {
        let id = self.transcript.append(text, sender);
        if let Some(entry) = self.transcript.get(id) {
            effects.push(Effect::Publish(RuntimeEvent::EntryAppended(entry.clone())));
        }
        id
    }

    fn update_entry(&mut self, id: EntryId, text: String, effects: &mut Vec<Effect>) {
        if self.transcript.update(id, text.clone()) {
            effects.push(Effect::Publish(RuntimeEvent::EntryUpdated { id, text }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> SessionMachine {
        let mut m = SessionMachine::new(CoachConfig::default());
        m.handle(SessionEvent::InitSucceeded);
        assert_eq!(m.turn(), TurnState::Idle);
        m
    }

    /// Drive the machine into Recording and return the live generation.
    fn start_recording(m: &mut SessionMachine) -> u64 {
        let effects = m.handle(SessionEvent::Intent(UserIntent::ToggleRecording));
        assert_eq!(m.turn(), TurnState::Recording);
        effects
            .iter()
            .find_map(|e| match e {
                Effect::StartCapture { generation } => Some(*generation),
                _ => None,
            })
            .expect("StartCapture effect")
    }

    fn capture(m: &mut SessionMachine, generation: u64, event: CaptureEvent) -> Vec<Effect> {
        m.handle(SessionEvent::Capture { generation, event })
    }

    /// Extract the latest Speak effect, if any.
    fn find_speak(effects: &[Effect]) -> Option<(u64, String, SpeakCompletion)> {
        effects.iter().rev().find_map(|e| match e {
            Effect::Speak {
                seq,
                text,
                completion,
            } => Some((*seq, text.clone(), *completion)),
            _ => None,
        })
    }

    fn finish_speaking(m: &mut SessionMachine, effects: &[Effect]) {
        let (seq, _, completion) = find_speak(effects).expect("Speak effect");
        m.handle(SessionEvent::PlaybackDone {
            seq,
            outcome: PlaybackOutcome::Finished,
            completion,
        });
    }

    fn has(effects: &[Effect], pred: impl Fn(&Effect) -> bool) -> bool {
        effects.iter().any(pred)
    }

    #[test]
    fn init_failure_sets_error_state() {
        let mut m = SessionMachine::new(CoachConfig::default());
        m.handle(SessionEvent::InitFailed("no API key".to_string()));
        assert_eq!(m.turn(), TurnState::Error);
        assert_eq!(m.error(), Some("no API key"));
    }

    #[test]
    fn intents_ignored_while_initializing() {
        let mut m = SessionMachine::new(CoachConfig::default());
        let effects = m.handle(SessionEvent::Intent(UserIntent::ToggleRecording));
        assert!(effects.is_empty());
        let effects = m.handle(SessionEvent::Intent(UserIntent::StartChallenge));
        assert!(effects.is_empty());
    }

    #[test]
    fn toggle_starts_recording_and_clears_error() {
        let mut m = machine();
        m.handle(SessionEvent::InitFailed("boom".to_string()));
        assert_eq!(m.turn(), TurnState::Error);

        let effects = m.handle(SessionEvent::Intent(UserIntent::ToggleRecording));
        assert_eq!(m.turn(), TurnState::Recording);
        assert!(m.error().is_none());
        assert!(has(&effects, |e| matches!(e, Effect::CancelPlayback)));
        assert!(has(&effects, |e| matches!(e, Effect::StartCapture { generation: 1 })));
        // The timer is not armed until the recognizer reports speech-end.
        assert!(!has(&effects, |e| matches!(e, Effect::ArmSilenceTimer { .. })));
    }

    #[test]
    fn toggle_while_recording_stops_capture_without_leaving_recording() {
        let mut m = machine();
        let generation = start_recording(&mut m);

        let effects = m.handle(SessionEvent::Intent(UserIntent::ToggleRecording));
        assert!(has(&effects, |e| matches!(e, Effect::StopCapture)));
        assert_eq!(m.turn(), TurnState::Recording);

        capture(&mut m, generation, CaptureEvent::Ended);
        assert_eq!(m.turn(), TurnState::Idle);
    }

    #[test]
    fn speech_end_arms_timer_and_speech_start_disarms_it() {
        let mut m = machine();
        let generation = start_recording(&mut m);

        let effects = capture(&mut m, generation, CaptureEvent::SpeechEnd);
        assert!(has(&effects, |e| matches!(e, Effect::ArmSilenceTimer { .. })));

        let effects = capture(&mut m, generation, CaptureEvent::SpeechStart);
        assert!(has(&effects, |e| matches!(e, Effect::CancelSilenceTimer)));

        // Disarmed timer firing is a no-op.
        let effects = m.handle(SessionEvent::SilenceTimerFired { generation });
        assert!(effects.is_empty());
        assert_eq!(m.turn(), TurnState::Recording);
    }

    #[test]
    fn silence_timer_fire_stops_capture() {
        let mut m = machine();
        let generation = start_recording(&mut m);
        capture(&mut m, generation, CaptureEvent::SpeechEnd);

        let effects = m.handle(SessionEvent::SilenceTimerFired { generation });
        assert!(has(&effects, |e| matches!(e, Effect::StopCapture)));
        // Idle only arrives with the recognizer's own end event.
        assert_eq!(m.turn(), TurnState::Recording);
    }

    #[test]
    fn stale_timer_from_previous_session_is_noop() {
        let mut m = machine();
        let first = start_recording(&mut m);
        capture(&mut m, first, CaptureEvent::SpeechEnd);

        // Stop and restart recording before the timer fires.
        capture(&mut m, first, CaptureEvent::Ended);
        let second = start_recording(&mut m);
        assert_ne!(first, second);

        let effects = m.handle(SessionEvent::SilenceTimerFired { generation: first });
        assert!(effects.is_empty());
        assert_eq!(m.turn(), TurnState::Recording);
    }

    #[test]
    fn stale_capture_session_events_are_ignored() {
        let mut m = machine();
        let first = start_recording(&mut m);
        capture(&mut m, first, CaptureEvent::Ended);
        let _second = start_recording(&mut m);

        let effects = capture(&mut m, first, CaptureEvent::Final("late".to_string()));
        assert!(effects.is_empty());
        assert_eq!(m.turn(), TurnState::Recording);
    }

    #[test]
    fn empty_final_speaks_didnt_hear_prompt_then_settles_idle() {
        let mut m = machine();
        let generation = start_recording(&mut m);

        let effects = capture(&mut m, generation, CaptureEvent::Final("  ".to_string()));
        let (_, text, _) = find_speak(&effects).expect("prompt spoken");
        assert_eq!(text, m.config.prompts.didnt_hear);
        assert_eq!(m.turn(), TurnState::Speaking);

        finish_speaking(&mut m, &effects);
        assert_eq!(m.turn(), TurnState::Idle);
    }

    #[test]
    fn conversation_turn_streams_into_single_entry() {
        // Scenario 1: Idle -> "Tell me about SEO" -> streamed reply ->
        // Speaking -> Idle.
        let mut m = machine();
        let generation = start_recording(&mut m);

        let effects = capture(
            &mut m,
            generation,
            CaptureEvent::Final("Tell me about SEO".to_string()),
        );
        assert_eq!(m.turn(), TurnState::Processing);
        let entry = effects
            .iter()
            .find_map(|e| match e {
                Effect::SendUtterance { entry, utterance } => {
                    assert_eq!(utterance, "Tell me about SEO");
                    Some(*entry)
                }
                _ => None,
            })
            .expect("SendUtterance effect");
        // User entry plus streaming placeholder.
        assert_eq!(m.transcript().len(), 2);

        m.handle(SessionEvent::ReplyFragment {
            entry,
            text: "SEO ".to_string(),
        });
        m.handle(SessionEvent::ReplyFragment {
            entry,
            text: "stands for...".to_string(),
        });
        assert_eq!(
            m.transcript().get(entry).expect("entry").text,
            "SEO stands for..."
        );

        let effects = m.handle(SessionEvent::ReplyClosed { entry });
        let (_, spoken, _) = find_speak(&effects).expect("reply spoken");
        assert_eq!(spoken, "SEO stands for...");
        assert_eq!(m.turn(), TurnState::Speaking);

        finish_speaking(&mut m, &effects);
        assert_eq!(m.turn(), TurnState::Idle);
    }

    #[test]
    fn second_turn_rejected_while_processing() {
        let mut m = machine();
        let generation = start_recording(&mut m);
        capture(&mut m, generation, CaptureEvent::Final("hello".to_string()));
        assert_eq!(m.turn(), TurnState::Processing);

        let effects = m.handle(SessionEvent::Intent(UserIntent::ToggleRecording));
        assert!(effects.is_empty());
        assert_eq!(m.turn(), TurnState::Processing);
    }

    #[test]
    fn empty_stream_replaced_with_apology() {
        let mut m = machine();
        let generation = start_recording(&mut m);
        let effects = capture(&mut m, generation, CaptureEvent::Final("hello".to_string()));
        let entry = effects
            .iter()
            .find_map(|e| match e {
                Effect::SendUtterance { entry, .. } => Some(*entry),
                _ => None,
            })
            .expect("SendUtterance effect");

        let effects = m.handle(SessionEvent::ReplyClosed { entry });
        let apology = m.config.prompts.empty_reply.clone();
        assert_eq!(m.transcript().get(entry).expect("entry").text, apology);
        let (_, spoken, _) = find_speak(&effects).expect("apology spoken");
        assert_eq!(spoken, apology);
    }

    #[test]
    fn stream_failure_settles_in_error_after_apology() {
        let mut m = machine();
        let generation = start_recording(&mut m);
        let effects = capture(&mut m, generation, CaptureEvent::Final("hello".to_string()));
        let entry = effects
            .iter()
            .find_map(|e| match e {
                Effect::SendUtterance { entry, .. } => Some(*entry),
                _ => None,
            })
            .expect("SendUtterance effect");

        let effects = m.handle(SessionEvent::ReplyFailed {
            entry,
            message: "rate limited".to_string(),
        });
        assert_eq!(m.error(), Some("rate limited"));
        assert!(
            m.transcript()
                .get(entry)
                .expect("entry")
                .text
                .contains("rate limited")
        );
        assert_eq!(m.turn(), TurnState::Speaking);

        finish_speaking(&mut m, &effects);
        assert_eq!(m.turn(), TurnState::Error);
    }

    #[test]
    fn not_allowed_error_sets_permission_message_challenge_untouched() {
        // Scenario 4.
        let mut m = machine();
        let generation = start_recording(&mut m);

        capture(
            &mut m,
            generation,
            CaptureEvent::Error {
                kind: RecognitionErrorKind::NotAllowed,
                message: "not-allowed".to_string(),
            },
        );
        assert_eq!(m.turn(), TurnState::Error);
        assert_eq!(m.error(), Some(m.config.prompts.mic_denied.as_str()));
        assert_eq!(m.challenge().status, ChallengeStatus::Idle);
        assert!(m.challenge().error.is_none());
    }

    #[test]
    fn no_speech_error_recovers_via_idle_with_prompt() {
        let mut m = machine();
        let generation = start_recording(&mut m);

        let effects = capture(
            &mut m,
            generation,
            CaptureEvent::Error {
                kind: RecognitionErrorKind::NoSpeech,
                message: "no-speech".to_string(),
            },
        );
        assert!(m.error().is_none());
        finish_speaking(&mut m, &effects);
        assert_eq!(m.turn(), TurnState::Idle);
    }

    #[test]
    fn recognizer_end_without_result_returns_to_idle() {
        let mut m = machine();
        let generation = start_recording(&mut m);
        let effects = capture(&mut m, generation, CaptureEvent::Ended);
        assert_eq!(m.turn(), TurnState::Idle);
        assert!(!has(&effects, |e| matches!(e, Effect::Speak { .. })));
    }

    #[test]
    fn challenge_intro_gates_awaiting_attempt_on_speech_completion() {
        // Scenario 2, ordering A: generation resolves, then the intro is
        // spoken to completion.
        let mut m = machine();
        let effects = m.handle(SessionEvent::Intent(UserIntent::StartChallenge));
        assert_eq!(m.challenge().status, ChallengeStatus::GeneratingText);
        assert!(has(&effects, |e| matches!(e, Effect::GenerateChallenge)));
        assert!(has(&effects, |e| matches!(e, Effect::CancelPlayback)));

        let effects = m.handle(SessionEvent::ChallengeGenerated(Ok(
            "We are analyzing market trends.".to_string(),
        )));
        // Sentence stored immediately, status flip gated on the intro.
        assert_eq!(m.challenge().status, ChallengeStatus::GeneratingText);
        assert_eq!(
            m.challenge().challenge_text.as_deref(),
            Some("We are analyzing market trends.")
        );
        let (_, spoken, completion) = find_speak(&effects).expect("intro spoken");
        assert_eq!(spoken, m.config.prompts.challenge_intro);
        assert_eq!(completion, SpeakCompletion::ChallengeReady);

        finish_speaking(&mut m, &effects);
        assert_eq!(m.challenge().status, ChallengeStatus::AwaitingAttempt);
        assert_eq!(m.turn(), TurnState::Idle);
    }

    #[test]
    fn prior_utterance_completion_does_not_flip_challenge_status() {
        // Scenario 2, ordering B: a superseded utterance settles after the
        // generation call resolved; only the intro's own completion flips
        // the status.
        let mut m = machine();
        // Speak something first so an utterance is in flight.
        let generation = start_recording(&mut m);
        let effects = capture(&mut m, generation, CaptureEvent::Final(String::new()));
        let (prior_seq, _, prior_completion) = find_speak(&effects).expect("prompt");
        // The user dismisses it and starts a challenge.
        m.handle(SessionEvent::Intent(UserIntent::StopSpeaking));
        m.handle(SessionEvent::Intent(UserIntent::StartChallenge));
        let effects = m.handle(SessionEvent::ChallengeGenerated(Ok("Sentence.".to_string())));

        // The interrupted prior utterance now settles: no status flip.
        m.handle(SessionEvent::PlaybackDone {
            seq: prior_seq,
            outcome: PlaybackOutcome::Interrupted,
            completion: prior_completion,
        });
        assert_eq!(m.challenge().status, ChallengeStatus::GeneratingText);

        finish_speaking(&mut m, &effects);
        assert_eq!(m.challenge().status, ChallengeStatus::AwaitingAttempt);
    }

    #[test]
    fn challenge_attempt_routes_to_evaluation_and_resets_after_feedback() {
        // Scenario 3.
        let mut m = machine();
        m.handle(SessionEvent::Intent(UserIntent::StartChallenge));
        let effects = m.handle(SessionEvent::ChallengeGenerated(Ok(
            "We are analyzing market trends.".to_string(),
        )));
        finish_speaking(&mut m, &effects);

        let generation = start_recording(&mut m);
        let effects = capture(
            &mut m,
            generation,
            CaptureEvent::Final("We are analyzing market friends".to_string()),
        );
        assert_eq!(m.challenge().status, ChallengeStatus::EvaluatingAttempt);
        assert_eq!(m.turn(), TurnState::Processing);
        assert!(has(&effects, |e| matches!(
            e,
            Effect::EvaluateAttempt { challenge, attempt }
                if challenge == "We are analyzing market trends."
                    && attempt == "We are analyzing market friends"
        )));

        let effects = m.handle(SessionEvent::EvaluationFinished(Ok(
            "Good attempt! Watch the word 'trends'.".to_string(),
        )));
        let (_, spoken, completion) = find_speak(&effects).expect("feedback spoken");
        assert_eq!(spoken, "Good attempt! Watch the word 'trends'.");
        assert_eq!(completion, SpeakCompletion::ResetChallenge);
        // Reset happens only after the feedback is spoken.
        assert_eq!(m.challenge().status, ChallengeStatus::EvaluatingAttempt);

        finish_speaking(&mut m, &effects);
        assert_eq!(m.challenge().status, ChallengeStatus::Idle);
        assert!(m.challenge().challenge_text.is_none());
        assert_eq!(m.turn(), TurnState::Idle);
    }

    #[test]
    fn evaluation_failure_enters_error_evaluating_in_place_of_reset() {
        let mut m = machine();
        m.handle(SessionEvent::Intent(UserIntent::StartChallenge));
        let effects = m.handle(SessionEvent::ChallengeGenerated(Ok("Sentence.".to_string())));
        finish_speaking(&mut m, &effects);
        let generation = start_recording(&mut m);
        capture(&mut m, generation, CaptureEvent::Final("attempt".to_string()));

        let effects =
            m.handle(SessionEvent::EvaluationFinished(Err(TaskError::new("quota"))));
        assert_eq!(m.challenge().status, ChallengeStatus::ErrorEvaluating);
        assert_eq!(m.challenge().error.as_deref(), Some("quota"));
        assert!(m.challenge().challenge_text.is_none());
        assert_eq!(m.error(), Some("quota"));

        finish_speaking(&mut m, &effects);
        // Not reset to Idle: the error status persists.
        assert_eq!(m.challenge().status, ChallengeStatus::ErrorEvaluating);
        assert_eq!(m.turn(), TurnState::Idle);
    }

    #[test]
    fn generation_failure_leaves_turn_recoverable() {
        // Scenario 5.
        let mut m = machine();
        m.handle(SessionEvent::Intent(UserIntent::StartChallenge));
        let effects =
            m.handle(SessionEvent::ChallengeGenerated(Err(TaskError::new("timeout"))));
        assert_eq!(m.challenge().status, ChallengeStatus::ErrorGenerating);
        assert_eq!(m.challenge().error.as_deref(), Some("timeout"));

        finish_speaking(&mut m, &effects);
        assert_eq!(m.turn(), TurnState::Idle);

        // A normal turn can start immediately.
        let effects = m.handle(SessionEvent::Intent(UserIntent::ToggleRecording));
        assert!(has(&effects, |e| matches!(e, Effect::StartCapture { .. })));
        assert_eq!(m.turn(), TurnState::Recording);
    }

    #[test]
    fn challenge_start_blocked_while_busy_or_in_flight() {
        let mut m = machine();
        let generation = start_recording(&mut m);
        assert!(m.handle(SessionEvent::Intent(UserIntent::StartChallenge)).is_empty());
        capture(&mut m, generation, CaptureEvent::Final("hi".to_string()));
        assert!(m.handle(SessionEvent::Intent(UserIntent::StartChallenge)).is_empty());
    }

    #[test]
    fn record_request_ignored_while_challenge_generating() {
        let mut m = machine();
        m.handle(SessionEvent::Intent(UserIntent::StartChallenge));
        let effects = m.handle(SessionEvent::Intent(UserIntent::ToggleRecording));
        assert!(effects.is_empty());
        assert_eq!(m.turn(), TurnState::Idle);
    }

    #[test]
    fn repeat_phrase_respeaks_without_status_change() {
        let mut m = machine();
        m.handle(SessionEvent::Intent(UserIntent::StartChallenge));
        let effects = m.handle(SessionEvent::ChallengeGenerated(Ok("Sentence.".to_string())));
        finish_speaking(&mut m, &effects);

        let effects = m.handle(SessionEvent::Intent(UserIntent::RepeatPhrase));
        let (_, spoken, completion) = find_speak(&effects).expect("phrase respoken");
        assert_eq!(spoken, "Sentence.");
        assert_eq!(completion, SpeakCompletion::None);
        assert_eq!(m.challenge().status, ChallengeStatus::AwaitingAttempt);

        // Blocked while still speaking.
        assert!(m.handle(SessionEvent::Intent(UserIntent::RepeatPhrase)).is_empty());
    }

    #[test]
    fn stop_speaking_cancels_and_resets_midflow_challenge() {
        let mut m = machine();
        m.handle(SessionEvent::Intent(UserIntent::StartChallenge));
        let effects = m.handle(SessionEvent::ChallengeGenerated(Ok("Sentence.".to_string())));
        let (seq, _, completion) = find_speak(&effects).expect("intro");
        assert_eq!(m.turn(), TurnState::Speaking);

        let effects = m.handle(SessionEvent::Intent(UserIntent::StopSpeaking));
        assert!(has(&effects, |e| matches!(e, Effect::CancelPlayback)));
        assert_eq!(m.turn(), TurnState::Idle);
        assert_eq!(m.challenge().status, ChallengeStatus::Idle);

        // The interrupted intro settles; the challenge stays reset.
        m.handle(SessionEvent::PlaybackDone {
            seq,
            outcome: PlaybackOutcome::Interrupted,
            completion,
        });
        assert_eq!(m.challenge().status, ChallengeStatus::Idle);
        assert!(m.challenge().challenge_text.is_none());
    }

    #[test]
    fn stop_speaking_when_not_speaking_is_noop() {
        let mut m = machine();
        let effects = m.handle(SessionEvent::Intent(UserIntent::StopSpeaking));
        assert!(effects.is_empty());
        assert_eq!(m.turn(), TurnState::Idle);
    }

    #[test]
    fn playback_failure_surfaces_synthesis_error() {
        let mut m = machine();
        m.handle(SessionEvent::Intent(UserIntent::StartChallenge));
        let effects = m.handle(SessionEvent::ChallengeGenerated(Ok("Sentence.".to_string())));
        let (seq, _, completion) = find_speak(&effects).expect("intro");

        m.handle(SessionEvent::PlaybackDone {
            seq,
            outcome: PlaybackOutcome::Failed("device lost".to_string()),
            completion,
        });
        assert_eq!(m.turn(), TurnState::Error);
        assert!(m.error().expect("banner").contains("device lost"));
    }

    #[test]
    fn translation_set_at_most_once_and_single_in_flight() {
        let mut m = machine();
        let generation = start_recording(&mut m);
        let effects = capture(&mut m, generation, CaptureEvent::Final("hi".to_string()));
        let entry = effects
            .iter()
            .find_map(|e| match e {
                Effect::SendUtterance { entry, .. } => Some(*entry),
                _ => None,
            })
            .expect("agent entry");
        m.handle(SessionEvent::ReplyFragment {
            entry,
            text: "Hello!".to_string(),
        });

        let effects = m.handle(SessionEvent::Intent(UserIntent::TranslateEntry(entry)));
        assert!(has(&effects, |e| matches!(e, Effect::Translate { .. })));
        // Second request while one is in flight is ignored.
        assert!(
            m.handle(SessionEvent::Intent(UserIntent::TranslateEntry(entry)))
                .is_empty()
        );

        m.handle(SessionEvent::TranslationFinished {
            id: entry,
            result: Ok("Olá!".to_string()),
        });
        assert_eq!(
            m.transcript().get(entry).expect("entry").translated_text.as_deref(),
            Some("Olá!")
        );
        // Already translated: further requests are no-ops.
        assert!(
            m.handle(SessionEvent::Intent(UserIntent::TranslateEntry(entry)))
                .is_empty()
        );
    }

    #[test]
    fn translation_failure_sets_banner_only() {
        let mut m = machine();
        let generation = start_recording(&mut m);
        let effects = capture(&mut m, generation, CaptureEvent::Final("hi".to_string()));
        let entry = effects
            .iter()
            .find_map(|e| match e {
                Effect::SendUtterance { entry, .. } => Some(*entry),
                _ => None,
            })
            .expect("agent entry");

        m.handle(SessionEvent::Intent(UserIntent::TranslateEntry(entry)));
        m.handle(SessionEvent::TranslationFinished {
            id: entry,
            result: Err(TaskError::new("offline")),
        });
        assert!(m.error().expect("banner").contains("offline"));
        assert!(m.transcript().get(entry).expect("entry").translated_text.is_none());
    }

    #[test]
    fn mutual_exclusion_holds_across_full_conversation() {
        let mut m = machine();
        let assert_exclusive = |m: &SessionMachine| {
            assert!(!(m.turn().recognizer_active() && m.turn().synthesizer_active()));
        };

        assert_exclusive(&m);
        let generation = start_recording(&mut m);
        assert_exclusive(&m);
        capture(&mut m, generation, CaptureEvent::SpeechEnd);
        assert_exclusive(&m);
        let effects = capture(&mut m, generation, CaptureEvent::Final("hello".to_string()));
        assert_exclusive(&m);
        let entry = effects
            .iter()
            .find_map(|e| match e {
                Effect::SendUtterance { entry, .. } => Some(*entry),
                _ => None,
            })
            .expect("entry");
        m.handle(SessionEvent::ReplyFragment {
            entry,
            text: "Hi there.".to_string(),
        });
        assert_exclusive(&m);
        let effects = m.handle(SessionEvent::ReplyClosed { entry });
        assert_exclusive(&m);
        finish_speaking(&mut m, &effects);
        assert_exclusive(&m);
        assert_eq!(m.turn(), TurnState::Idle);
    }
}
