use crate::convert::write_sample;
use crate::error::{PetalStreamError, Result};
use crate::format::{BufferFormat, SampleFormat};
use crate::source::PcmDataSource;
use std::time::Duration;

/// Periodic waveform shapes produced by [`ToneSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    /// Value of the waveform at `phase` in `[0, 1)`, in `[-1, 1]`.
    pub fn sample(&self, phase: f64) -> f32 {
        let value = match self {
            Self::Sine => (phase * std::f64::consts::TAU).sin(),
            Self::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Self::Sawtooth => 2.0 * phase - 1.0,
            Self::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        };
        value as f32
    }
}

/// Procedurally generated tone, either endless or limited to a duration.
///
/// Every channel carries the same signal. Phase carries over between reads, so chunk
/// boundaries are seamless.
#[derive(Debug, Clone)]
pub struct ToneSource {
    waveform: Waveform,
    frequency: f64,
    amplitude: f32,
    sample_rate: u32,
    format: BufferFormat,
    phase: f64,
    remaining_frames: Option<u64>,
}

impl ToneSource {
    pub fn new(
        waveform: Waveform,
        frequency: f64,
        sample_rate: u32,
        channels: u16,
        sample_format: SampleFormat,
    ) -> Result<Self> {
        if sample_rate == 0 {
            return Err(PetalStreamError::AudioFormat(
                "Sample rate must be greater than 0".to_string(),
            ));
        }

        if !frequency.is_finite() || frequency < 0.0 || frequency > sample_rate as f64 / 2.0 {
            return Err(PetalStreamError::AudioFormat(format!(
                "Frequency {} Hz is outside 0..={} Hz",
                frequency,
                sample_rate / 2
            )));
        }

        Ok(Self {
            waveform,
            frequency,
            amplitude: 1.0,
            sample_rate,
            format: BufferFormat::resolve(channels, sample_format)?,
            phase: 0.0,
            remaining_frames: None,
        })
    }

    /// Shorthand for a mono 16-bit sine.
    pub fn sine(frequency: f64, sample_rate: u32) -> Result<Self> {
        Self::new(Waveform::Sine, frequency, sample_rate, 1, SampleFormat::I16)
    }

    pub fn amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    /// Limits the tone to `duration`; after that the source reports exhaustion.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.remaining_frames =
            Some((duration.as_secs_f64() * self.sample_rate as f64).round() as u64);
        self
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn remaining_frames(&self) -> Option<u64> {
        self.remaining_frames
    }
}

impl PcmDataSource for ToneSource {
    fn channels(&self) -> u16 {
        self.format.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn sample_format(&self) -> SampleFormat {
        self.format.sample
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let frame_size = self.format.frame_size();
        let sample_size = self.format.sample.bytes_per_sample();

        if self.remaining_frames == Some(0) {
            return Ok(0);
        }

        if buf.len() < frame_size {
            return Err(PetalStreamError::AudioFormat(format!(
                "Read buffer of {} bytes cannot hold a {}-byte frame",
                buf.len(),
                frame_size
            )));
        }

        let mut frames = buf.len() / frame_size;
        if let Some(remaining) = self.remaining_frames {
            frames = frames.min(remaining as usize);
        }

        let step = self.frequency / self.sample_rate as f64;

        for frame in buf[..frames * frame_size].chunks_exact_mut(frame_size) {
            let value = self.waveform.sample(self.phase) * self.amplitude;
            for sample in frame.chunks_exact_mut(sample_size) {
                write_sample(sample, self.format.sample, value);
            }

            self.phase += step;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
        }

        if let Some(remaining) = self.remaining_frames.as_mut() {
            *remaining -= frames as u64;
        }

        Ok(frames * frame_size)
    }

    fn buffer_format(&self) -> Result<BufferFormat> {
        Ok(self.format)
    }
}
