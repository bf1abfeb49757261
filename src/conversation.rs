//! One spoken exchange per wake word, plus an optional follow-up
//!
//! ```text
//! Idle → Listening → Processing → Speaking ─┬─→ Idle
//!                                           └─→ Listening (follow-up) → Processing → Speaking → Idle
//! ```
//!
//! The state is held through a [`StateGuard`](crate::state::StateGuard), so
//! every path out of [`Conversation::handle_wake`] ends in `Idle`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::Result;
use crate::audio::{Microphone, Tone};
use crate::backend::Backend;
use crate::config::Config;
use crate::playback::Player;
use crate::recorder::{Recorder, RecorderSettings, Utterance};
use crate::state::{ClientState, StateCell};

/// Follow-up questions allowed after the first answer
pub const MAX_FOLLOW_UP_TURNS: usize = 1;

/// How a wake event ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationOutcome {
    /// The client was busy; nothing happened
    Ignored,
    /// The user said nothing after the wake word
    NoSpeech,
    /// The daemon did not answer
    BackendFailed,
    /// The user talked over an answer
    Interrupted,
    /// An audio device failed mid-turn
    Aborted,
    /// Answers were played for `turns` questions
    Completed {
        /// Questions answered
        turns: usize,
    },
}

/// Runs conversations triggered by the wake word
pub struct Conversation {
    state: Arc<StateCell>,
    microphone: Arc<dyn Microphone>,
    backend: Arc<dyn Backend>,
    player: Arc<Player>,
    utterance: Recorder,
    follow_up: Option<Recorder>,
    barge_in: bool,
    running: Arc<AtomicBool>,
}

impl Conversation {
    /// Build from configuration and shared collaborators
    #[must_use]
    pub fn new(
        config: &Config,
        state: Arc<StateCell>,
        microphone: Arc<dyn Microphone>,
        backend: Arc<dyn Backend>,
        player: Arc<Player>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let window = config.conversation.follow_up_duration;
        let follow_up = (window > 0.0)
            .then(|| Recorder::new(RecorderSettings::follow_up(&config.audio, window)));

        Self {
            state,
            microphone,
            backend,
            player,
            utterance: Recorder::new(RecorderSettings::utterance(&config.audio)),
            follow_up,
            barge_in: config.conversation.enable_stop_interrupt,
            running,
        }
    }

    /// Handle a wake trigger
    ///
    /// Returns [`ConversationOutcome::Ignored`] without side effects if the
    /// client is not idle.
    pub fn handle_wake(&self) -> ConversationOutcome {
        let Some(guard) = self.state.acquire(ClientState::Listening) else {
            tracing::debug!(state = %self.state.get(), "busy, ignoring wake word");
            return ConversationOutcome::Ignored;
        };

        self.player.play_tone(Tone::Listening);

        let mut turns = 0;
        let mut recorder = &self.utterance;

        loop {
            guard.advance(ClientState::Listening);
            let utterance = match self.record(recorder) {
                Ok(Some(utterance)) => utterance,
                Ok(None) if turns == 0 => {
                    tracing::info!("no speech detected");
                    return ConversationOutcome::NoSpeech;
                }
                Ok(None) => {
                    tracing::debug!("no follow-up question");
                    break;
                }
                Err(e) => return self.abort(&e),
            };

            guard.advance(ClientState::Processing);
            let wav = match utterance.to_wav() {
                Ok(wav) => wav,
                Err(e) => return self.abort(&e),
            };

            tracing::info!(bytes = wav.len(), turn = turns + 1, "sending question to daemon");
            let reply = match self.backend.transcribe(wav) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(error = %e, "daemon request failed");
                    self.player.play_tone(Tone::Error);
                    return ConversationOutcome::BackendFailed;
                }
            };

            guard.advance(ClientState::Speaking);
            let report = match self.player.play_wav(&reply.audio, self.barge_in) {
                Ok(report) => report,
                Err(e) => return self.abort(&e),
            };
            turns += 1;

            if report.interrupted {
                return ConversationOutcome::Interrupted;
            }

            if turns > MAX_FOLLOW_UP_TURNS || !self.running.load(Ordering::SeqCst) {
                break;
            }
            let Some(follow_up) = &self.follow_up else {
                break;
            };

            tracing::info!("listening for follow-up");
            recorder = follow_up;
        }

        ConversationOutcome::Completed { turns }
    }

    /// Open a fresh capture stream for one recording; it closes on return
    fn record(&self, recorder: &Recorder) -> Result<Option<Utterance>> {
        let mut source = self.microphone.open()?;
        recorder.record(source.as_mut(), &self.running)
    }

    fn abort(&self, error: &crate::Error) -> ConversationOutcome {
        tracing::error!(error = %error, "conversation turn failed");
        self.player.play_tone(Tone::Error);
        ConversationOutcome::Aborted
    }
}
