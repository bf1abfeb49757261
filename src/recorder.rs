//! Energy-based utterance recording
//!
//! A frame is speech when its energy is above the silence threshold. A
//! recording ends once speech has been heard and then `silence_frames`
//! consecutive quiet frames follow, or when the frame budget runs out.
//! A recording without any speech yields nothing rather than an empty
//! utterance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::Result;
use crate::audio::wav;
use crate::audio::{AudioFrame, FrameSource};
use crate::config::AudioConfig;

/// Longest confirmation reply in seconds
const CONFIRMATION_MAX_SECS: f64 = 5.0;

/// Silence that ends a confirmation reply in seconds
const CONFIRMATION_SILENCE_SECS: f64 = 0.8;

/// Cutoff parameters for one kind of recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderSettings {
    /// Energy above which a frame is speech
    pub silence_threshold: f32,

    /// Consecutive quiet frames that end a recording after speech
    pub silence_frames: usize,

    /// Frame budget for the whole recording
    pub max_frames: usize,

    /// When set, frames before speech onset are dropped and the recording
    /// is abandoned if no speech starts within this many frames
    pub start_window: Option<usize>,

    /// Sample rate of the frames
    pub sample_rate: u32,
}

impl RecorderSettings {
    /// Question after a wake word
    #[must_use]
    pub fn utterance(audio: &AudioConfig) -> Self {
        Self {
            silence_threshold: audio.silence_threshold,
            silence_frames: audio.silence_frames(),
            max_frames: audio.max_frames(),
            start_window: None,
            sample_rate: audio.sample_rate,
        }
    }

    /// Follow-up question after a response, waiting `window_secs` for speech
    #[must_use]
    pub fn follow_up(audio: &AudioConfig, window_secs: f64) -> Self {
        Self {
            silence_threshold: audio.silence_threshold,
            silence_frames: audio.silence_frames(),
            max_frames: audio.frames_for(window_secs + audio.max_recording).max(1),
            start_window: Some(audio.frames_for(window_secs)),
            sample_rate: audio.sample_rate,
        }
    }

    /// Short reply to a notification chime
    #[must_use]
    pub fn confirmation(audio: &AudioConfig) -> Self {
        Self {
            silence_threshold: audio.silence_threshold,
            silence_frames: audio.frames_for(CONFIRMATION_SILENCE_SECS).max(1),
            max_frames: audio.frames_for(CONFIRMATION_MAX_SECS).max(1),
            start_window: None,
            sample_rate: audio.sample_rate,
        }
    }
}

/// Result of feeding one frame to a [`Recording`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep reading frames
    Continue,
    /// Speech was captured and has ended
    Complete,
    /// Nothing worth keeping was heard
    Abandon,
}

/// Recording in progress
#[derive(Debug)]
pub struct Recording<'a> {
    settings: &'a RecorderSettings,
    samples: Vec<i16>,
    kept_frames: usize,
    frames_read: usize,
    silent_run: usize,
    speech_seen: bool,
}

impl<'a> Recording<'a> {
    /// Start an empty recording
    #[must_use]
    pub const fn new(settings: &'a RecorderSettings) -> Self {
        Self {
            settings,
            samples: Vec::new(),
            kept_frames: 0,
            frames_read: 0,
            silent_run: 0,
            speech_seen: false,
        }
    }

    /// Feed the next frame
    pub fn push(&mut self, frame: AudioFrame) -> Step {
        self.frames_read += 1;

        if frame.energy() > self.settings.silence_threshold {
            self.speech_seen = true;
            self.silent_run = 0;
        } else {
            self.silent_run += 1;
        }

        if let Some(window) = self.settings.start_window
            && !self.speech_seen
        {
            if self.frames_read >= window {
                return Step::Abandon;
            }
            return Step::Continue;
        }

        self.samples.extend_from_slice(frame.samples());
        self.kept_frames += 1;

        if self.speech_seen && self.silent_run >= self.settings.silence_frames {
            return Step::Complete;
        }

        if self.frames_read >= self.settings.max_frames {
            return if self.speech_seen {
                Step::Complete
            } else {
                Step::Abandon
            };
        }

        Step::Continue
    }

    /// The captured utterance, if any speech was heard
    #[must_use]
    pub fn finish(self) -> Option<Utterance> {
        (self.speech_seen && self.kept_frames > 0).then(|| Utterance {
            samples: self.samples,
            frame_count: self.kept_frames,
            sample_rate: self.settings.sample_rate,
        })
    }
}

/// Captured speech
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    samples: Vec<i16>,
    frame_count: usize,
    sample_rate: u32,
}

impl Utterance {
    /// Number of frames recorded
    #[must_use]
    pub const fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Recorded samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Length of the recording
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Encode as mono 16-bit WAV
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        wav::encode_pcm16(&self.samples, self.sample_rate)
    }
}

/// Reads frames from a source until a recording completes
#[derive(Debug, Clone)]
pub struct Recorder {
    settings: RecorderSettings,
}

impl Recorder {
    /// Recorder with the given cutoffs
    #[must_use]
    pub const fn new(settings: RecorderSettings) -> Self {
        Self { settings }
    }

    /// Cutoff settings
    #[must_use]
    pub const fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    /// Record from `source` until speech ends, the budget runs out, or
    /// `running` is cleared
    ///
    /// Returns `None` when no speech was heard or the client is shutting down.
    ///
    /// # Errors
    ///
    /// Returns error if the source fails
    pub fn record(
        &self,
        source: &mut dyn FrameSource,
        running: &AtomicBool,
    ) -> Result<Option<Utterance>> {
        let mut recording = Recording::new(&self.settings);

        loop {
            if !running.load(Ordering::SeqCst) {
                tracing::debug!("recording cancelled by shutdown");
                return Ok(None);
            }

            match recording.push(source.read_frame()?) {
                Step::Continue => {}
                Step::Complete => break,
                Step::Abandon => {
                    tracing::debug!(frames = recording.frames_read, "no speech detected");
                    return Ok(None);
                }
            }
        }

        let utterance = recording.finish();
        if let Some(utterance) = &utterance {
            tracing::debug!(
                frames = utterance.frame_count(),
                duration_ms = utterance.duration().as_millis(),
                "utterance recorded"
            );
        }
        Ok(utterance)
    }
}
