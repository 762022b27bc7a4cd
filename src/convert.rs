//! Sample, unit and rate conversions.

use crate::error::{PetalStreamError, Result};
use crate::format::SampleFormat;
use std::time::Duration;

pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

pub fn f32_to_u8(sample: f32) -> u8 {
    (sample.clamp(-1.0, 1.0) * 127.0 + 128.0).round() as u8
}

pub fn u8_to_f32(sample: u8) -> f32 {
    (sample as f32 - 128.0) / 128.0
}

/// Writes one sample encoded as `format` into the start of `dst`.
///
/// `dst` must hold at least `format.bytes_per_sample()` bytes.
pub fn write_sample(dst: &mut [u8], format: SampleFormat, sample: f32) {
    match format {
        SampleFormat::U8 => dst[0] = f32_to_u8(sample),
        SampleFormat::I16 => dst[..2].copy_from_slice(&f32_to_i16(sample).to_le_bytes()),
        SampleFormat::F32 => dst[..4].copy_from_slice(&sample.to_le_bytes()),
    }
}

/// Appends `samples` to `out` encoded as `format` (little-endian).
pub fn encode_samples_into(samples: &[f32], format: SampleFormat, out: &mut Vec<u8>) {
    out.reserve(samples.len() * format.bytes_per_sample());
    match format {
        SampleFormat::U8 => out.extend(samples.iter().map(|&s| f32_to_u8(s))),
        SampleFormat::I16 => {
            for &s in samples {
                out.extend_from_slice(&f32_to_i16(s).to_le_bytes());
            }
        }
        SampleFormat::F32 => {
            for &s in samples {
                out.extend_from_slice(&s.to_le_bytes());
            }
        }
    }
}

pub fn encode_samples(samples: &[f32], format: SampleFormat) -> Vec<u8> {
    let mut out = Vec::new();
    encode_samples_into(samples, format, &mut out);
    out
}

/// Decodes little-endian PCM bytes into f32 samples, appending to `out`.
///
/// A trailing partial sample is ignored.
pub fn decode_samples_into(bytes: &[u8], format: SampleFormat, out: &mut Vec<f32>) {
    match format {
        SampleFormat::U8 => out.extend(bytes.iter().map(|&b| u8_to_f32(b))),
        SampleFormat::I16 => out.extend(
            bytes
                .chunks_exact(2)
                .map(|b| i16_to_f32(i16::from_le_bytes([b[0], b[1]]))),
        ),
        SampleFormat::F32 => out.extend(
            bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        ),
    }
}

pub fn decode_samples(bytes: &[u8], format: SampleFormat) -> Vec<f32> {
    let mut out = Vec::with_capacity(bytes.len() / format.bytes_per_sample());
    decode_samples_into(bytes, format, &mut out);
    out
}

/// Converts a duration in seconds to whole nanoseconds.
pub fn seconds_to_nanoseconds(seconds: f64) -> i64 {
    (seconds * 1_000_000_000.0) as i64
}

pub fn nanoseconds_to_seconds(nanos: i64) -> f64 {
    nanos as f64 / 1_000_000_000.0
}

/// Absolute device-clock time (nanoseconds) `delay` after `device_clock`.
///
/// Useful for scheduling a start time on backends that expose a device clock.
pub fn future_time(device_clock: i64, delay: Duration) -> i64 {
    device_clock.saturating_add(delay.as_nanos().min(i64::MAX as u128) as i64)
}

/// Offline resampler for interleaved f32 audio, backed by rubato.
pub struct AudioResampler {
    source_sample_rate: u32,
    target_sample_rate: u32,
    channels: u16,
    chunk_size: usize,
}

impl AudioResampler {
    pub fn new(
        source_sample_rate: u32,
        target_sample_rate: u32,
        channels: u16,
        chunk_size: Option<usize>,
    ) -> Result<Self> {
        if source_sample_rate == 0 || target_sample_rate == 0 {
            return Err(PetalStreamError::AudioFormat(
                "Sample rates must be greater than 0".to_string(),
            ));
        }

        if channels == 0 {
            return Err(PetalStreamError::AudioFormat(
                "Channel count must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            source_sample_rate,
            target_sample_rate,
            channels,
            chunk_size: chunk_size.unwrap_or(1024),
        })
    }

    pub fn resample_interleaved(&self, interleaved: &[f32]) -> Result<Vec<f32>> {
        if self.source_sample_rate == self.target_sample_rate || interleaved.is_empty() {
            return Ok(interleaved.to_vec());
        }

        use rubato::{FftFixedIn, Resampler};

        let channels = self.channels as usize;
        let frames = interleaved.len() / channels;

        let mut resampler = FftFixedIn::<f32>::new(
            self.source_sample_rate as usize,
            self.target_sample_rate as usize,
            self.chunk_size,
            2, // sub_chunks
            channels,
        )
        .map_err(|e| PetalStreamError::AudioFormat(format!("Failed to create resampler: {}", e)))?;

        let planar: Vec<Vec<f32>> = (0..channels)
            .map(|ch| {
                interleaved
                    .chunks_exact(channels)
                    .map(|frame| frame[ch])
                    .collect()
            })
            .collect();

        let mut output: Vec<Vec<f32>> = vec![Vec::new(); channels];
        let mut input_index = 0;

        while input_index < frames {
            let needed = resampler.input_frames_next();
            let available = (frames - input_index).min(needed);

            // Zero-pad the final chunk up to what the resampler expects
            let chunk: Vec<Vec<f32>> = planar
                .iter()
                .map(|channel| {
                    let mut block = vec![0.0f32; needed];
                    block[..available]
                        .copy_from_slice(&channel[input_index..input_index + available]);
                    block
                })
                .collect();

            let waves_out = resampler
                .process(&chunk, None)
                .map_err(|e| PetalStreamError::AudioFormat(format!("Resampling error: {}", e)))?;

            for (dst, src) in output.iter_mut().zip(waves_out.iter()) {
                dst.extend_from_slice(src);
            }

            input_index += available;
        }

        let expected_frames = (frames as f64 * self.resample_ratio()).round() as usize;
        let out_frames = output[0].len().min(expected_frames);

        let mut result = Vec::with_capacity(out_frames * channels);
        for frame_idx in 0..out_frames {
            for channel in &output {
                result.push(channel[frame_idx]);
            }
        }

        Ok(result)
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    pub fn source_sample_rate(&self) -> u32 {
        self.source_sample_rate
    }

    pub fn resample_ratio(&self) -> f64 {
        self.target_sample_rate as f64 / self.source_sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_conversions() {
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(2.5), i16::MAX);
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_u8(0.0), 128);
        assert_eq!(f32_to_u8(-1.0), 1);
        assert_eq!(u8_to_f32(128), 0.0);
        assert_eq!(i16_to_f32(-32768), -1.0);
    }

    #[test]
    fn test_encode_decode_i16() {
        let bytes = encode_samples(&[0.0, 0.5, -0.5], SampleFormat::I16);
        assert_eq!(bytes.len(), 6);

        let decoded = decode_samples(&bytes, SampleFormat::I16);
        assert_eq!(decoded.len(), 3);
        assert!((decoded[1] - 0.5).abs() < 1e-3);
        assert!((decoded[2] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_decode_ignores_partial_sample() {
        let decoded = decode_samples(&[0, 0, 0, 0, 0, 0, 0x80, 0x3f, 0x00], SampleFormat::F32);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1], 1.0);
    }

    #[test]
    fn test_time_helpers() {
        assert_eq!(seconds_to_nanoseconds(1.5), 1_500_000_000);
        assert_eq!(nanoseconds_to_seconds(250_000_000), 0.25);
        assert_eq!(
            future_time(1_000, Duration::from_millis(2)),
            1_000 + 2_000_000
        );
        assert_eq!(future_time(i64::MAX - 1, Duration::from_secs(1)), i64::MAX);
    }

    #[test]
    fn test_resampler_creation() {
        let resampler = AudioResampler::new(44100, 48000, 2, None);
        assert!(resampler.is_ok());

        let resampler = resampler.unwrap();
        assert_eq!(resampler.source_sample_rate(), 44100);
        assert_eq!(resampler.target_sample_rate(), 48000);
    }

    #[test]
    fn test_resampler_no_resampling_needed() {
        let resampler = AudioResampler::new(44100, 44100, 1, None).unwrap();
        let samples = vec![0.1, 0.2, 0.3, 0.4];
        let result = resampler.resample_interleaved(&samples).unwrap();
        assert_eq!(result, samples);
    }

    #[test]
    fn test_resampler_keeps_interleaving() {
        let resampler = AudioResampler::new(24000, 48000, 2, Some(256)).unwrap();
        let input = vec![0.0f32; 2 * 1000];
        let output = resampler.resample_interleaved(&input).unwrap();
        assert!(!output.is_empty());
        assert_eq!(output.len() % 2, 0);
        assert!(output.len() <= 2 * 2000);
    }

    #[test]
    fn test_invalid_sample_rates() {
        assert!(AudioResampler::new(0, 48000, 2, None).is_err());
        assert!(AudioResampler::new(44100, 0, 2, None).is_err());
        assert!(AudioResampler::new(44100, 48000, 0, None).is_err());
    }
}
