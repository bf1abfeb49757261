//! WAV encoding and decoding

use std::io::Cursor;
use std::time::Duration;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::{Error, Result};

/// Decoded audio: interleaved float samples in [-1.0, 1.0]
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Interleaved samples
    pub samples: Vec<f32>,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Channel count
    pub channels: u16,
}

impl AudioClip {
    /// Mono clip from samples
    #[must_use]
    pub const fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    /// Whether the clip has no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playing time
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() / usize::from(self.channels);
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }

    /// Multiply every sample by `volume`, clamped to full scale
    pub fn apply_volume(&mut self, volume: f32) {
        if (volume - 1.0).abs() < f32::EPSILON {
            return;
        }
        for sample in &mut self.samples {
            *sample = (*sample * volume).clamp(-1.0, 1.0);
        }
    }

    /// Average all channels into one
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_mono(&self) -> Vec<f32> {
        let channels = usize::from(self.channels.max(1));
        if channels == 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    }
}

/// Encode mono 16-bit PCM as a WAV file
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn encode_pcm16(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Decode a WAV file of 8/16/24/32-bit integer or 32-bit float samples
///
/// # Errors
///
/// Returns error if the data is not a readable WAV file
#[allow(clippy::cast_precision_loss)]
pub fn decode(data: &[u8]) -> Result<AudioClip> {
    let reader = WavReader::new(Cursor::new(data))
        .map_err(|e| Error::Audio(format!("invalid WAV data: {e}")))?;
    let spec = reader.spec();

    if spec.channels == 0 {
        return Err(Error::Audio("WAV file has no channels".to_string()));
    }

    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?,
        SampleFormat::Int => {
            if !(1..=32).contains(&spec.bits_per_sample) {
                return Err(Error::Audio(format!(
                    "unsupported WAV bit depth: {}",
                    spec.bits_per_sample
                )));
            }
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?
        }
    };

    Ok(AudioClip {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Decode a mono 16-bit WAV file to its exact samples
///
/// # Errors
///
/// Returns error if the data is not 16-bit integer WAV
pub fn decode_pcm16(data: &[u8]) -> Result<(Vec<i16>, u32)> {
    let reader = WavReader::new(Cursor::new(data))
        .map_err(|e| Error::Audio(format!("invalid WAV data: {e}")))?;
    let spec = reader.spec();

    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(Error::Audio(format!(
            "expected 16-bit PCM, got {} bits {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let samples = reader
        .into_samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;

    Ok((samples, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_round_trip_is_exact() {
        let samples: Vec<i16> = vec![0, 1, -1, i16::MAX, i16::MIN, 12345, -23456];
        let wav = encode_pcm16(&samples, 16000).unwrap();

        let (decoded, rate) = decode_pcm16(&wav).unwrap();
        assert_eq!(decoded, samples);
        assert_eq!(rate, 16000);
    }

    #[test]
    fn test_encoded_header() {
        let wav = encode_pcm16(&[0; 1280], 16000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44-byte header plus 2 bytes per sample
        assert_eq!(wav.len(), 44 + 2 * 1280);
    }

    #[test]
    fn test_decode_normalizes_int_samples() {
        let wav = encode_pcm16(&[16384, -32768], 22050).unwrap();
        let clip = decode(&wav).unwrap();

        assert_eq!(clip.sample_rate, 22050);
        assert_eq!(clip.channels, 1);
        assert!((clip.samples[0] - 0.5).abs() < 1e-6);
        assert!((clip.samples[1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_float_stereo() {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 24000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for s in [0.25_f32, 0.75, -0.5, 0.5] {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }

        let clip = decode(&cursor.into_inner()).unwrap();
        assert_eq!(clip.channels, 2);
        assert_eq!(clip.to_mono(), vec![0.5, 0.0]);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode(b"definitely not a wav file").is_err());
        assert!(decode_pcm16(&[]).is_err());
    }

    #[test]
    fn test_volume_clamps() {
        let mut clip = AudioClip::mono(vec![0.4, -0.8], 16000);
        clip.apply_volume(2.0);
        assert_eq!(clip.samples, vec![0.8, -1.0]);
    }
}
