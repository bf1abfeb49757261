//! Response playback with barge-in
//!
//! With barge-in, a detector thread opens its own capture stream while the
//! speaker plays and raises the stop flag once sustained loud input is heard.
//! Flags are created per playback, so a detector that outlives its playback
//! cannot stop a later one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use crate::Result;
use crate::audio::wav;
use crate::audio::{AudioClip, Microphone, Speaker, Tone};
use crate::config::Config;

/// Loud frames in a row that count as an interruption
pub const INTERRUPT_FRAMES: usize = 3;

/// Interruption needs this many times the silence threshold
pub const INTERRUPT_THRESHOLD_FACTOR: f32 = 2.0;

/// Longest wait for the detector thread after playback ends
const DETECTOR_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Counts consecutive loud frames
#[derive(Debug, Clone)]
pub struct InterruptDetector {
    threshold: f32,
    required: usize,
    consecutive: usize,
}

impl InterruptDetector {
    /// Fire after `required` consecutive frames above `threshold`
    #[must_use]
    pub const fn new(threshold: f32, required: usize) -> Self {
        Self {
            threshold,
            required,
            consecutive: 0,
        }
    }

    /// Feed one frame's energy; returns `true` when the user interrupted
    pub fn observe(&mut self, energy: f32) -> bool {
        if energy > self.threshold {
            self.consecutive += 1;
        } else {
            self.consecutive = 0;
        }
        self.consecutive >= self.required
    }
}

/// How a playback ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    /// The user spoke over the response and cut it short
    pub interrupted: bool,

    /// The clip played to the end
    pub completed: bool,
}

/// Plays responses and feedback tones
pub struct Player {
    speaker: Arc<dyn Speaker>,
    microphone: Arc<dyn Microphone>,
    volume: f32,
    interrupt_threshold: f32,
}

impl Player {
    /// Player using `speaker`, with barge-in listening on `microphone`
    #[must_use]
    pub fn new(speaker: Arc<dyn Speaker>, microphone: Arc<dyn Microphone>, config: &Config) -> Self {
        Self {
            speaker,
            microphone,
            volume: config.playback.volume,
            interrupt_threshold: config.audio.silence_threshold * INTERRUPT_THRESHOLD_FACTOR,
        }
    }

    /// Decode WAV bytes and apply the configured volume
    ///
    /// # Errors
    ///
    /// Returns error if the data is not a readable WAV file
    pub fn decode(&self, data: &[u8]) -> Result<AudioClip> {
        let mut clip = wav::decode(data)?;
        clip.apply_volume(self.volume);
        Ok(clip)
    }

    /// Decode and play WAV bytes
    ///
    /// # Errors
    ///
    /// Returns error if decoding or the output device fails
    pub fn play_wav(&self, data: &[u8], barge_in: bool) -> Result<PlaybackReport> {
        let clip = self.decode(data)?;
        self.play_clip(&clip, barge_in)
    }

    /// Play a clip, optionally listening for the user to talk over it
    ///
    /// # Errors
    ///
    /// Returns error if the output device fails
    pub fn play_clip(&self, clip: &AudioClip, barge_in: bool) -> Result<PlaybackReport> {
        tracing::debug!(
            duration_ms = clip.duration().as_millis(),
            barge_in,
            "playing response"
        );

        if !barge_in {
            let completed = self.speaker.play(clip, &AtomicBool::new(false))?;
            return Ok(PlaybackReport {
                interrupted: false,
                completed,
            });
        }

        let stop = Arc::new(AtomicBool::new(false));
        let interrupted = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        let (exit_tx, exit_rx) = mpsc::channel::<()>();

        let detector = {
            let microphone = Arc::clone(&self.microphone);
            let stop = Arc::clone(&stop);
            let interrupted = Arc::clone(&interrupted);
            let done = Arc::clone(&done);
            let threshold = self.interrupt_threshold;

            std::thread::Builder::new()
                .name("interrupt-detector".to_string())
                .spawn(move || {
                    // Dropped on return, which wakes the waiting player
                    let _exit = exit_tx;
                    detect_interrupt(microphone.as_ref(), threshold, &done, &stop, &interrupted);
                })
        };

        let detector = match detector {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "failed to start interrupt detector");
                None
            }
        };

        let played = self.speaker.play(clip, &stop);
        done.store(true, Ordering::SeqCst);

        if let Some(handle) = detector {
            match exit_rx.recv_timeout(DETECTOR_JOIN_TIMEOUT) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if handle.join().is_err() {
                        tracing::warn!("interrupt detector panicked");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!("interrupt detector did not stop in time, detaching");
                }
            }
        }

        let completed = played?;
        // Speech heard after the last sample (e.g. while the device drains)
        // cut nothing off
        let interrupted = interrupted.load(Ordering::SeqCst) && !completed;
        if interrupted {
            tracing::info!("playback interrupted by user");
        }

        Ok(PlaybackReport {
            interrupted,
            completed,
        })
    }

    /// Play a feedback tone; failures are logged
    pub fn play_tone(&self, tone: Tone) {
        let clip = tone.render(self.volume);
        if let Err(e) = self.speaker.play(&clip, &AtomicBool::new(false)) {
            tracing::warn!(error = %e, ?tone, "failed to play tone");
        }
    }
}

fn detect_interrupt(
    microphone: &dyn Microphone,
    threshold: f32,
    done: &AtomicBool,
    stop: &AtomicBool,
    interrupted: &AtomicBool,
) {
    let mut source = match microphone.open() {
        Ok(source) => source,
        Err(e) => {
            tracing::warn!(error = %e, "interrupt detector could not open microphone");
            return;
        }
    };

    let mut detector = InterruptDetector::new(threshold, INTERRUPT_FRAMES);
    while !done.load(Ordering::SeqCst) {
        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "interrupt detector stopped reading");
                return;
            }
        };

        if detector.observe(frame.energy()) {
            tracing::debug!(energy = frame.energy(), "sustained speech during playback");
            interrupted.store(true, Ordering::SeqCst);
            stop.store(true, Ordering::SeqCst);
            return;
        }
    }
}
