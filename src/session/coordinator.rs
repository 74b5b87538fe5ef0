//! Async driver wiring the session machine to its collaborators.
//!
//! The coordinator owns the event loop: one `select!` over user intents
//! and internal continuations. Every event is handed to the machine,
//! which runs synchronously to completion; the returned effects are then
//! executed here, with each async continuation funnelled back into the
//! same loop as a new event. The machine therefore never observes a
//! re-entrant call, and continuations always see current state.

use crate::adapters::{CaptureEvent, RecognitionErrorKind, SpeechCapture, SpeechPlayback};
use crate::clients::{AuxiliaryTaskClient, ConversationClient};
use crate::config::CoachConfig;
use crate::error::Result;
use crate::runtime::RuntimeEvent;
use crate::session::events::{Effect, SessionEvent, UserIntent};
use crate::session::machine::SessionMachine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cloneable handle for a presentation layer: forwards user intents and
/// stops the session loop.
#[derive(Clone)]
pub struct SessionHandle {
    intent_tx: mpsc::UnboundedSender<UserIntent>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Forward a user intent. Silently dropped once the session has
    /// stopped.
    pub fn send(&self, intent: UserIntent) {
        let _ = self.intent_tx.send(intent);
    }

    /// Stop the session loop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Orchestrates one coaching session until cancelled.
pub struct SessionCoordinator {
    config: CoachConfig,
    capture: Arc<dyn SpeechCapture>,
    playback: Arc<dyn SpeechPlayback>,
    conversation: Arc<dyn ConversationClient>,
    tasks: Arc<dyn AuxiliaryTaskClient>,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    cancel: CancellationToken,
    intent_tx: mpsc::UnboundedSender<UserIntent>,
    intent_rx: mpsc::UnboundedReceiver<UserIntent>,
}

impl SessionCoordinator {
    pub fn new(
        config: CoachConfig,
        capture: Arc<dyn SpeechCapture>,
        playback: Arc<dyn SpeechPlayback>,
        conversation: Arc<dyn ConversationClient>,
        tasks: Arc<dyn AuxiliaryTaskClient>,
    ) -> Self {
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        Self {
            config,
            capture,
            playback,
            conversation,
            tasks,
            runtime_tx: None,
            cancel: CancellationToken::new(),
            intent_tx,
            intent_rx,
        }
    }

    /// Attach a runtime event broadcaster for the frontend.
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.runtime_tx = Some(tx);
        self
    }

    /// Handle for forwarding user intents and shutting the session down.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            intent_tx: self.intent_tx.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Run the session loop until the handle is shut down.
    ///
    /// # Errors
    ///
    /// Currently infallible at the loop level; failures surface as state
    /// transitions. The `Result` keeps room for startup I/O.
    pub async fn run(mut self) -> Result<()> {
        info!("starting coaching session");
        let mut machine = SessionMachine::new(self.config.clone());
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();
        let mut runner = EffectRunner {
            capture: Arc::clone(&self.capture),
            playback: Arc::clone(&self.playback),
            conversation: Arc::clone(&self.conversation),
            tasks: Arc::clone(&self.tasks),
            runtime_tx: self.runtime_tx.clone(),
            event_tx,
            cancel: self.cancel.clone(),
            silence_timeout: self.config.recognition.silence_timeout(),
            timer: None,
        };

        // Capability check: collaborators exist by construction, so only
        // the configuration can fail init.
        let init = if self.config.recognition.silence_timeout_ms == 0 {
            SessionEvent::InitFailed("silence timeout must be non-zero".to_string())
        } else {
            SessionEvent::InitSucceeded
        };
        for effect in machine.handle(init) {
            runner.execute(effect);
        }

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                intent = self.intent_rx.recv() => match intent {
                    Some(intent) => {
                        for effect in machine.handle(SessionEvent::Intent(intent)) {
                            runner.execute(effect);
                        }
                    }
                    None => break,
                },
                event = event_rx.recv() => match event {
                    Some(event) => {
                        for effect in machine.handle(event) {
                            runner.execute(effect);
                        }
                    }
                    None => break,
                },
            }
        }

        runner.disarm_timer();
        self.playback.cancel();
        self.capture.stop();
        info!("coaching session stopped");
        Ok(())
    }
}

/// Executes effects, funnelling every async continuation back into the
/// session loop as a [`SessionEvent`].
struct EffectRunner {
    capture: Arc<dyn SpeechCapture>,
    playback: Arc<dyn SpeechPlayback>,
    conversation: Arc<dyn ConversationClient>,
    tasks: Arc<dyn AuxiliaryTaskClient>,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
    silence_timeout: Duration,
    /// At most one live silence timer.
    timer: Option<JoinHandle<()>>,
}

impl EffectRunner {
    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::StartCapture { generation } => self.start_capture(generation),
            Effect::StopCapture => self.capture.stop(),
            Effect::CancelPlayback => self.playback.cancel(),
            Effect::Speak {
                seq,
                text,
                completion,
            } => {
                // Never overlap audio: cancel before the new utterance.
                self.playback.cancel();
                let playback = Arc::clone(&self.playback);
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let outcome = playback.speak(&text).await;
                    let _ = event_tx.send(SessionEvent::PlaybackDone {
                        seq,
                        outcome,
                        completion,
                    });
                });
            }
            Effect::ArmSilenceTimer { generation } => {
                self.disarm_timer();
                let event_tx = self.event_tx.clone();
                let delay = self.silence_timeout;
                self.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = event_tx.send(SessionEvent::SilenceTimerFired { generation });
                }));
            }
            Effect::CancelSilenceTimer => self.disarm_timer(),
            Effect::SendUtterance { entry, utterance } => self.send_utterance(entry, utterance),
            Effect::GenerateChallenge => {
                let tasks = Arc::clone(&self.tasks);
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let result = tasks.generate_challenge().await;
                    let _ = event_tx.send(SessionEvent::ChallengeGenerated(result));
                });
            }
            Effect::EvaluateAttempt { challenge, attempt } => {
                let tasks = Arc::clone(&self.tasks);
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let result = tasks.evaluate(&challenge, &attempt).await;
                    let _ = event_tx.send(SessionEvent::EvaluationFinished(result));
                });
            }
            Effect::Translate { id, text } => {
                let tasks = Arc::clone(&self.tasks);
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let result = tasks.translate(&text).await;
                    let _ = event_tx.send(SessionEvent::TranslationFinished { id, result });
                });
            }
            Effect::Publish(event) => {
                if let Some(tx) = &self.runtime_tx {
                    // Lagging or absent subscribers are not an error.
                    let _ = tx.send(event);
                }
            }
        }
    }

    /// Open a recognition session and forward its events, tagged with the
    /// generation so the machine can drop anything from a superseded
    /// session.
    fn start_capture(&self, generation: u64) {
        let capture = Arc::clone(&self.capture);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            match capture.start().await {
                Ok(mut rx) => {
                    while let Some(event) = rx.recv().await {
                        let ended = matches!(event, CaptureEvent::Ended);
                        if event_tx
                            .send(SessionEvent::Capture { generation, event })
                            .is_err()
                        {
                            break;
                        }
                        if ended {
                            break;
                        }
                    }
                }
                Err(e) => {
                    let _ = event_tx.send(SessionEvent::Capture {
                        generation,
                        event: CaptureEvent::Error {
                            kind: RecognitionErrorKind::Other,
                            message: e.to_string(),
                        },
                    });
                    let _ = event_tx.send(SessionEvent::Capture {
                        generation,
                        event: CaptureEvent::Ended,
                    });
                }
            }
        });
    }

    /// Issue the model request and pump its fragment stream.
    fn send_utterance(&self, entry: crate::transcript::EntryId, utterance: String) {
        let conversation = Arc::clone(&self.conversation);
        let event_tx = self.event_tx.clone();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            match conversation.send(&utterance).await {
                Err(err) => {
                    let _ = event_tx.send(SessionEvent::ReplyFailed {
                        entry,
                        message: err.message,
                    });
                }
                Ok(mut rx) => {
                    loop {
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            fragment = rx.recv() => match fragment {
                                Some(text) => {
                                    if event_tx
                                        .send(SessionEvent::ReplyFragment { entry, text })
                                        .is_err()
                                    {
                                        return;
                                    }
                                }
                                None => break,
                            },
                        }
                    }
                    let _ = event_tx.send(SessionEvent::ReplyClosed { entry });
                }
            }
        });
    }

    fn disarm_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
