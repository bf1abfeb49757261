//! Wake word gating
//!
//! The acoustic classifier lives behind [`WakeWordModel`]. [`WakeWordGate`]
//! only decides when to ask it and when a score counts as a trigger.

pub mod worker;

pub use worker::WakeWorker;

use crate::Result;
use crate::audio::AudioFrame;
use crate::state::ClientState;

/// Score reported by one wake word model for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct ModelScore {
    /// Model name
    pub model: String,

    /// Confidence in [0, 1]
    pub score: f32,
}

/// A wake word classifier fed one frame at a time
pub trait WakeWordModel: Send {
    /// Score a frame against every loaded model
    ///
    /// # Errors
    ///
    /// Returns error if the classifier could not score the frame
    fn score(&mut self, frame: &AudioFrame) -> Result<Vec<ModelScore>>;

    /// Clear the classifier's memory of previous frames
    ///
    /// # Errors
    ///
    /// Returns error if the classifier could not be reset
    fn reset(&mut self) -> Result<()>;
}

/// A detected wake phrase
#[derive(Debug, Clone, PartialEq)]
pub struct WakeTrigger {
    /// Model that fired
    pub model: String,

    /// Score that crossed the threshold
    pub score: f32,
}

/// Feeds frames to a model while the client is idle
pub struct WakeWordGate {
    model: Box<dyn WakeWordModel>,
    threshold: f32,
}

impl WakeWordGate {
    /// Gate `model` at `threshold`
    #[must_use]
    pub fn new(model: Box<dyn WakeWordModel>, threshold: f32) -> Self {
        Self { model, threshold }
    }

    /// Score `frame` if `state` is idle
    ///
    /// Returns the highest score above the threshold, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the model failed to score the frame
    pub fn process(&mut self, frame: &AudioFrame, state: ClientState) -> Result<Option<WakeTrigger>> {
        if state != ClientState::Idle {
            return Ok(None);
        }

        let trigger = self
            .model
            .score(frame)?
            .into_iter()
            .filter(|s| s.score > self.threshold)
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .map(|s| WakeTrigger {
                model: s.model,
                score: s.score,
            });

        if let Some(trigger) = &trigger {
            tracing::info!(model = %trigger.model, score = trigger.score, "wake word detected");
        }

        Ok(trigger)
    }

    /// Clear the model's score memory after a trigger has been handled
    pub fn reset(&mut self) {
        if let Err(e) = self.model.reset() {
            tracing::warn!(error = %e, "failed to reset wake word model");
        }
    }
}
