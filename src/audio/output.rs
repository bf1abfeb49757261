//! Audio output to speakers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, StreamConfig};

use super::AudioClip;
use crate::{Error, Result};

/// Poll interval while waiting for playback to end
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Extra time allowed past the clip length before giving up
const PLAYBACK_SLACK: Duration = Duration::from_millis(500);

/// Let the device drain its buffer after the last sample
const DRAIN_DELAY: Duration = Duration::from_millis(100);

/// Renders clips synchronously
pub trait Speaker: Send + Sync {
    /// Play `clip`, blocking until it ends or `stop` is raised
    ///
    /// Returns `true` if the clip played to the end.
    ///
    /// # Errors
    ///
    /// Returns error if no output device is usable
    fn play(&self, clip: &AudioClip, stop: &AtomicBool) -> Result<bool>;
}

/// Default output device through cpal
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalSpeaker;

impl CpalSpeaker {
    /// Create a speaker on the default output device
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Speaker for CpalSpeaker {
    fn play(&self, clip: &AudioClip, stop: &AtomicBool) -> Result<bool> {
        if clip.is_empty() {
            return Ok(true);
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let (config, format) = output_config(&device, clip.sample_rate)?;
        let mono = clip.to_mono();
        let samples = if config.sample_rate.0 == clip.sample_rate {
            mono
        } else {
            tracing::debug!(
                from = clip.sample_rate,
                to = config.sample_rate.0,
                "resampling for output device"
            );
            resample(&mono, clip.sample_rate, config.sample_rate.0)?
        };

        match format {
            SampleFormat::I16 => render::<i16>(&device, &config, samples, stop),
            SampleFormat::U16 => render::<u16>(&device, &config, samples, stop),
            _ => render::<f32>(&device, &config, samples, stop),
        }
    }
}

/// Pick a mono or stereo config at `rate`, else the device default
fn output_config(device: &Device, rate: u32) -> Result<(StreamConfig, SampleFormat)> {
    let wanted = SampleRate(rate);
    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| c.min_sample_rate() <= wanted && c.max_sample_rate() >= wanted)
        .filter(|c| matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16))
        .min_by_key(|c| c.channels());

    if let Some(supported) = supported.filter(|c| c.channels() <= 2) {
        let format = supported.sample_format();
        return Ok((supported.with_sample_rate(wanted).config(), format));
    }

    let fallback = device
        .default_output_config()
        .map_err(|e| Error::Audio(format!("no suitable output config found: {e}")))?;
    let format = fallback.sample_format();
    Ok((fallback.config(), format))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn render<T>(
    device: &Device,
    config: &StreamConfig,
    samples: Vec<f32>,
    stop: &AtomicBool,
) -> Result<bool>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels.max(1));
    let sample_count = samples.len();
    let samples = Arc::new(samples);
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let value = samples.get(pos).copied().unwrap_or(0.0);
                        if pos < samples.len() {
                            pos += 1;
                        } else {
                            finished.store(true, Ordering::Release);
                        }
                        for out in frame.iter_mut() {
                            *out = T::from_sample(value);
                        }
                    }
                    position.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(config.sample_rate.0.max(1));
    let timeout = Duration::from_millis(duration_ms) + PLAYBACK_SLACK;
    let start = Instant::now();

    let mut stopped = false;
    while !finished.load(Ordering::Acquire) {
        if stop.load(Ordering::SeqCst) {
            stopped = true;
            break;
        }
        if start.elapsed() > timeout {
            tracing::warn!(timeout_ms = timeout.as_millis(), "playback timed out");
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    if !stopped {
        std::thread::sleep(DRAIN_DELAY);
    }
    drop(stream);

    let completed = finished.load(Ordering::Acquire) && !stopped;
    tracing::debug!(
        samples = sample_count,
        played = position.load(Ordering::Relaxed),
        completed,
        "playback ended"
    );
    Ok(completed)
}

/// Resample mono audio with rubato, padding the last partial chunk
///
/// # Errors
///
/// Returns error if the resampler cannot be built
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let expected = (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)) as usize;
    let mut output = Vec::with_capacity(expected + chunk_size);

    for chunk in samples.chunks(chunk_size) {
        let mut block: Vec<f64> = chunk.iter().map(|&s| f64::from(s)).collect();
        block.resize(chunk_size, 0.0);

        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    // Flush the resampler delay so the tail of the clip is not lost
    while output.len() < expected + resampler.output_delay() {
        let result = resampler
            .process_partial::<Vec<f64>>(None, None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        if result[0].is_empty() {
            break;
        }
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    let delay = resampler.output_delay().min(output.len());
    output.drain(..delay);
    output.truncate(expected);
    Ok(output)
}
