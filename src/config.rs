//! Configuration types for the coaching session core.

use crate::error::{CoachError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for a coaching session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachConfig {
    /// Speech recognition settings.
    pub recognition: RecognitionConfig,
    /// Speech synthesis settings.
    pub synthesis: SynthesisConfig,
    /// Spoken/system prompt texts.
    pub prompts: PromptConfig,
}

impl CoachConfig {
    /// Load configuration from a TOML file.
    ///
    /// Missing keys fall back to defaults; unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Config`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoachError::Config(format!("read {}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| CoachError::Config(format!("parse {}: {e}", path.display())))
    }
}

/// Speech recognition configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// BCP-47 language tag passed to the capture adapter.
    pub language: String,
    /// Silence timeout in ms after a detected speech-end event.
    ///
    /// The recognizer's own end-of-speech detection is unreliable across
    /// engines; this software timeout guarantees the turn terminates within
    /// a bounded delay after the user stops talking. Re-armed on every
    /// speech-end, cleared on every speech-start and on leaving Recording.
    pub silence_timeout_ms: u64,
}

impl RecognitionConfig {
    /// Silence timeout as a [`Duration`].
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            silence_timeout_ms: 2500,
        }
    }
}

/// Speech synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// BCP-47 language tag passed to the playback adapter.
    pub language: String,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
        }
    }
}

/// Spoken and displayed prompt texts.
///
/// Content configuration, not state-machine behavior: frontends may
/// localize or rebrand every string here without touching the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Placeholder shown while a streamed reply has produced no text yet.
    pub thinking_placeholder: String,
    /// Spoken when a recording session ends with an empty transcript.
    pub didnt_hear: String,
    /// Challenge variant of [`Self::didnt_hear`].
    pub didnt_hear_challenge: String,
    /// Spoken on a recoverable no-speech recognition error.
    pub no_speech: String,
    /// Challenge variant of [`Self::no_speech`].
    pub no_speech_challenge: String,
    /// Error banner text when microphone access is denied.
    pub mic_denied: String,
    /// Error banner text when no audio could be captured.
    pub mic_unavailable: String,
    /// Shown and spoken when a reply stream ends with no text.
    pub empty_reply: String,
    /// Spoken when the reply stream fails mid-flight.
    pub stream_apology: String,
    /// Spoken when challenge-sentence generation fails.
    pub generation_apology: String,
    /// Spoken when pronunciation evaluation fails.
    pub evaluation_apology: String,
    /// Intro line spoken before a pronunciation challenge sentence.
    pub challenge_intro: String,
    /// Suggested openers a frontend may display when the log is empty.
    pub conversation_starters: Vec<String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            thinking_placeholder: "Let me think...".to_string(),
            didnt_hear: "I didn't hear anything. Could you please try speaking again?"
                .to_string(),
            didnt_hear_challenge:
                "I didn't hear your attempt for the challenge. Try recording again.".to_string(),
            no_speech: "I didn't hear anything. Could you please try speaking again?".to_string(),
            no_speech_challenge: "I didn't catch your challenge attempt. Please try speaking again."
                .to_string(),
            mic_denied:
                "Microphone access was denied. Please enable it in your settings to use the app."
                    .to_string(),
            mic_unavailable:
                "I couldn't access your microphone. Please check your system permissions."
                    .to_string(),
            empty_reply: "Sorry, I couldn't process that.".to_string(),
            stream_apology: "Sorry, an error occurred while I was thinking.".to_string(),
            generation_apology:
                "Sorry, I couldn't generate a challenge right now. Please try again later."
                    .to_string(),
            evaluation_apology: "Sorry, I couldn't evaluate your attempt right now.".to_string(),
            challenge_intro:
                "Alright, here is your pronunciation challenge. Please read the following sentence aloud:"
                    .to_string(),
            conversation_starters: vec![
                "What's a recent marketing campaign that caught your eye?".to_string(),
                "Let's discuss the impact of social media on branding.".to_string(),
                "Can you explain the concept of a target audience?".to_string(),
                "Tell me about a successful product launch you know of.".to_string(),
                "How important is storytelling in marketing?".to_string(),
                "What are your thoughts on influencer marketing?".to_string(),
            ],
        }
    }
}
