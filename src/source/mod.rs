//! Pull-based PCM data sources.
//!
//! A [`PcmDataSource`] hands out decoded PCM on request. Which concrete decoder backs a
//! stream is decided once, when the source is opened (see [`open_stream`]); the streaming
//! state machine only ever sees the trait.

mod options;
mod symphonia_source;
mod tone;

use crate::convert::{AudioResampler, decode_samples, encode_samples};
use crate::error::{PetalStreamError, Result};
use crate::format::{BufferFormat, SampleFormat};
use std::time::Duration;

pub use options::{ConvertToMono, OpenOptions};
pub use symphonia_source::{SymphoniaSource, open_stream};
pub use tone::{ToneSource, Waveform};

/// A source of interleaved PCM bytes read on demand.
///
/// `channels`, `sample_rate` and `sample_format` must not change over the life of the
/// source.
pub trait PcmDataSource {
    fn channels(&self) -> u16;

    fn sample_rate(&self) -> u32;

    fn sample_format(&self) -> SampleFormat;

    /// Reads up to `buf.len()` bytes of whole frames into `buf`.
    ///
    /// Returns the number of bytes written. `0` means the source is exhausted, and every
    /// later call must keep returning `0`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Releases whatever the source holds open. Called by the owner of the source, never by
    /// the stream consuming it.
    fn close(&mut self) {}

    fn buffer_format(&self) -> Result<BufferFormat> {
        BufferFormat::resolve(self.channels(), self.sample_format())
    }
}

impl<S: PcmDataSource + ?Sized> PcmDataSource for Box<S> {
    fn channels(&self) -> u16 {
        (**self).channels()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn sample_format(&self) -> SampleFormat {
        (**self).sample_format()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// PCM held entirely in memory, handed out in chunks.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
    position: usize,
    format: BufferFormat,
    sample_rate: u32,
}

impl MemorySource {
    pub fn new(
        data: Vec<u8>,
        channels: u16,
        sample_rate: u32,
        sample_format: SampleFormat,
    ) -> Result<Self> {
        let format = BufferFormat::resolve(channels, sample_format)?;

        if sample_rate == 0 {
            return Err(PetalStreamError::AudioFormat(
                "Sample rate must be greater than 0".to_string(),
            ));
        }

        if !format.is_frame_aligned(data.len()) {
            return Err(PetalStreamError::AudioFormat(format!(
                "{} bytes is not a whole number of {}-byte frames",
                data.len(),
                format.frame_size()
            )));
        }

        Ok(Self {
            data,
            position: 0,
            format,
            sample_rate,
        })
    }

    /// Encodes interleaved f32 `samples` as `sample_format`.
    pub fn from_f32(
        samples: &[f32],
        channels: u16,
        sample_rate: u32,
        sample_format: SampleFormat,
    ) -> Result<Self> {
        Self::new(
            encode_samples(samples, sample_format),
            channels,
            sample_rate,
            sample_format,
        )
    }

    /// Returns a copy of the unread remainder resampled to `target_sample_rate`.
    pub fn resampled(&self, target_sample_rate: u32) -> Result<Self> {
        if target_sample_rate == self.sample_rate {
            return Ok(Self {
                data: self.data[self.position..].to_vec(),
                position: 0,
                ..*self
            });
        }

        let samples = decode_samples(&self.data[self.position..], self.format.sample);
        let resampler = AudioResampler::new(
            self.sample_rate,
            target_sample_rate,
            self.format.channels(),
            None,
        )?;
        let resampled = resampler.resample_interleaved(&samples)?;

        Self::from_f32(
            &resampled,
            self.format.channels(),
            target_sample_rate,
            self.format.sample,
        )
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.data.len(), self.sample_rate)
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }
}

impl PcmDataSource for MemorySource {
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
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(0);
        }

        let n = remaining.min(buf.len());
        let n = n - n % self.format.frame_size();
        if n == 0 {
            return Err(PetalStreamError::AudioFormat(format!(
                "Read buffer of {} bytes cannot hold a {}-byte frame",
                buf.len(),
                self.format.frame_size()
            )));
        }

        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn buffer_format(&self) -> Result<BufferFormat> {
        Ok(self.format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_chunks() {
        let mut source = MemorySource::new(vec![7u8; 75536], 2, 44100, SampleFormat::I16).unwrap();
        let mut buf = vec![0u8; 32768];

        assert_eq!(source.read(&mut buf).unwrap(), 32768);
        assert_eq!(source.read(&mut buf).unwrap(), 32768);
        assert_eq!(source.read(&mut buf).unwrap(), 10000);
        assert_eq!(source.read(&mut buf).unwrap(), 0);
        assert_eq!(source.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_memory_source_rejects_bad_layouts() {
        assert!(MemorySource::new(vec![0u8; 3], 2, 44100, SampleFormat::I16).is_err());
        assert!(MemorySource::new(vec![0u8; 4], 3, 44100, SampleFormat::I16).is_err());
        assert!(MemorySource::new(vec![0u8; 4], 1, 0, SampleFormat::I16).is_err());
    }

    #[test]
    fn test_memory_source_reads_whole_frames() {
        let mut source = MemorySource::new(vec![1u8; 16], 2, 8000, SampleFormat::I16).unwrap();
        let mut buf = vec![0u8; 6];
        assert_eq!(source.read(&mut buf).unwrap(), 4);

        let mut tiny = vec![0u8; 2];
        assert!(source.read(&mut tiny).is_err());
    }

    #[test]
    fn test_from_f32_and_duration() {
        let source = MemorySource::from_f32(&vec![0.0; 48000], 1, 48000, SampleFormat::F32).unwrap();
        assert_eq!(source.len(), 48000 * 4);
        assert_eq!(source.duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_resampled_same_rate_keeps_unread_data() {
        let mut source = MemorySource::new((0..8).collect(), 1, 8000, SampleFormat::U8).unwrap();
        let mut buf = vec![0u8; 3];
        source.read(&mut buf).unwrap();

        let copy = source.resampled(8000).unwrap();
        assert_eq!(copy.len(), 5);
        assert_eq!(copy.sample_rate(), 8000);
    }

    #[test]
    fn test_resampled_changes_rate() {
        let source = MemorySource::from_f32(&vec![0.0; 4000], 1, 16000, SampleFormat::I16).unwrap();
        let resampled = source.resampled(32000).unwrap();
        assert_eq!(resampled.sample_rate(), 32000);
        assert!(resampled.len() > source.len());
    }
}
