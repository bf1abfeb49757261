//! Microphone capture as fixed-size 16-bit frames
//!
//! A [`Microphone`] opens capture streams; each stream is a [`FrameSource`]
//! owned by the thread that reads it. cpal streams are not `Send`, so a
//! stream is always opened on the thread that consumes it and dropped there.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};

use crate::config::AudioConfig;
use crate::{Error, Result};

/// Frames buffered between the audio callback and the reader
const FRAME_QUEUE: usize = 64;

/// Longest wait for a frame before the stream is considered dead
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// One block of mono 16-bit samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    /// Wrap raw samples
    #[must_use]
    pub const fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// Frame of `len` samples at constant amplitude
    #[must_use]
    pub fn constant(len: usize, amplitude: i16) -> Self {
        Self::new(vec![amplitude; len])
    }

    /// Mean absolute amplitude on the 16-bit scale
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn energy(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: u64 = self
            .samples
            .iter()
            .map(|&s| u64::from(s.unsigned_abs()))
            .sum();
        (sum as f64 / self.samples.len() as f64) as f32
    }

    /// Samples in this frame
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Consume the frame, returning its samples
    #[must_use]
    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

/// An open capture stream
pub trait FrameSource {
    /// Block until the next frame is available
    ///
    /// # Errors
    ///
    /// Returns error if the stream stopped delivering audio
    fn read_frame(&mut self) -> Result<AudioFrame>;
}

/// Opens capture streams on demand
pub trait Microphone: Send + Sync {
    /// Open a new capture stream
    ///
    /// # Errors
    ///
    /// Returns error if no input device is usable
    fn open(&self) -> Result<Box<dyn FrameSource>>;
}

/// Default input device through cpal
#[derive(Debug, Clone)]
pub struct CpalMicrophone {
    sample_rate: u32,
    channels: u16,
    frame_size: usize,
}

impl CpalMicrophone {
    /// Microphone using the capture settings from `config`
    #[must_use]
    pub const fn new(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frame_size: config.frame_size,
        }
    }

    fn find_config(&self, device: &Device) -> Result<(StreamConfig, SampleFormat)> {
        let rate = SampleRate(self.sample_rate);
        let configs: Vec<_> = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
            .filter(|c| matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16))
            .collect();

        // Prefer the configured channel count, then anything at the right rate
        let supported = configs
            .iter()
            .find(|c| c.channels() == self.channels)
            .or_else(|| configs.first())
            .cloned()
            .ok_or_else(|| {
                Error::Audio(format!(
                    "no input config supports {} Hz",
                    self.sample_rate
                ))
            })?;

        let format = supported.sample_format();
        Ok((supported.with_sample_rate(rate).config(), format))
    }
}

impl Microphone for CpalMicrophone {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let (config, format) = self.find_config(&device)?;
        let (tx, rx) = mpsc::sync_channel(FRAME_QUEUE);

        let stream = match format {
            SampleFormat::I16 => build_stream::<i16>(&device, &config, self.frame_size, tx)?,
            _ => build_stream::<f32>(&device, &config, self.frame_size, tx)?,
        };
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            sample_rate = self.sample_rate,
            channels = config.channels,
            frame_size = self.frame_size,
            "capture stream opened"
        );

        Ok(Box::new(CpalFrameSource {
            _stream: stream,
            frames: rx,
        }))
    }
}

/// Frames from a live cpal stream; closing happens on drop
struct CpalFrameSource {
    _stream: Stream,
    frames: Receiver<AudioFrame>,
}

impl FrameSource for CpalFrameSource {
    fn read_frame(&mut self) -> Result<AudioFrame> {
        self.frames.recv_timeout(READ_TIMEOUT).map_err(|e| match e {
            RecvTimeoutError::Timeout => {
                Error::Audio("microphone stopped delivering audio".to_string())
            }
            RecvTimeoutError::Disconnected => Error::Audio("capture stream closed".to_string()),
        })
    }
}

impl Drop for CpalFrameSource {
    fn drop(&mut self) {
        tracing::debug!("capture stream closed");
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    frame_size: usize,
    frames: SyncSender<AudioFrame>,
) -> Result<Stream>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    let mut pending = Vec::with_capacity(frame_size);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels) {
                    let Some(&first) = frame.first() else {
                        continue;
                    };
                    pending.push(first.to_sample::<i16>());

                    if pending.len() >= frame_size {
                        let full = std::mem::replace(&mut pending, Vec::with_capacity(frame_size));
                        // Reader fell behind; drop the frame rather than block the callback
                        let _ = frames.try_send(AudioFrame::new(full));
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_is_mean_absolute_amplitude() {
        let frame = AudioFrame::new(vec![100, -300, 200, -400]);
        assert!((frame.energy() - 250.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_energy_handles_extremes() {
        let frame = AudioFrame::constant(4, i16::MIN);
        assert!((frame.energy() - 32768.0).abs() < f32::EPSILON);
        assert!(AudioFrame::new(Vec::new()).energy().abs() < f32::EPSILON);
    }
}
