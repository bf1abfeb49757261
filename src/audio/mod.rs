//! Audio capture, encoding, feedback tones and output

pub mod capture;
pub mod output;
pub mod tones;
pub mod wav;

pub use capture::{AudioFrame, CpalMicrophone, FrameSource, Microphone};
pub use output::{CpalSpeaker, Speaker};
pub use tones::Tone;
pub use wav::AudioClip;
