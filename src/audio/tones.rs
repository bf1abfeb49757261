//! Short synthesized feedback sounds

use std::f32::consts::TAU;

use super::AudioClip;

/// Sample rate of generated tones
pub const TONE_SAMPLE_RATE: u32 = 24000;

/// Feedback sounds played around a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Two ascending notes: recording has started
    Listening,
    /// Low buzz: the turn failed
    Error,
    /// Three-note arpeggio: the daemon wants attention
    Chime,
}

impl Tone {
    /// Render the tone at `volume`
    #[must_use]
    pub fn render(self, volume: f32) -> AudioClip {
        let samples = match self {
            Self::Listening => [
                sine(880.0, 0.08, 0.25 * volume),
                silence(0.03),
                sine(1320.0, 0.10, 0.25 * volume),
            ]
            .concat(),
            Self::Error => sine(220.0, 0.2, 0.2 * volume),
            Self::Chime => [
                sine(660.0, 0.10, 0.2 * volume),
                silence(0.04),
                sine(880.0, 0.10, 0.2 * volume),
                silence(0.04),
                sine(1100.0, 0.15, 0.25 * volume),
            ]
            .concat(),
        };

        AudioClip::mono(samples, TONE_SAMPLE_RATE)
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn sample_count(seconds: f32) -> usize {
    (TONE_SAMPLE_RATE as f32 * seconds).round() as usize
}

fn silence(seconds: f32) -> Vec<f32> {
    vec![0.0; sample_count(seconds)]
}

/// Sine wave with 10 ms linear fades at both ends
#[allow(clippy::cast_precision_loss)]
fn sine(freq: f32, seconds: f32, amplitude: f32) -> Vec<f32> {
    let len = sample_count(seconds);
    let rate = TONE_SAMPLE_RATE as f32;
    let mut tone: Vec<f32> = (0..len)
        .map(|i| (TAU * freq * i as f32 / rate).sin() * amplitude)
        .collect();

    let fade = sample_count(0.01).min(len / 4);
    if fade > 1 {
        let steps = (fade - 1) as f32;
        for i in 0..fade {
            let gain = i as f32 / steps;
            tone[i] *= gain;
            tone[len - 1 - i] *= gain;
        }
    }

    tone
}
