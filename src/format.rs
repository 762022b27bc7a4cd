//! PCM buffer formats.
//!
//! A stream's format is resolved exactly once, when the stream is created, into an immutable
//! [`BufferFormat`]. Everything downstream (buffer fills, byte/frame maths, the software
//! mixer) works from that descriptor instead of re-inspecting the data source.

use crate::error::{PetalStreamError, Result};
use std::time::Duration;

/// Sample encoding of PCM data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Unsigned 8-bit, silence at 128
    U8,
    /// Signed 16-bit little-endian
    #[default]
    I16,
    /// 32-bit IEEE float little-endian
    F32,
}

impl SampleFormat {
    /// Maps a bit depth reported by a decoder onto a sample format.
    pub fn from_bit_depth(bits: u16) -> Result<Self> {
        match bits {
            8 => Ok(Self::U8),
            16 => Ok(Self::I16),
            32 => Ok(Self::F32),
            other => Err(PetalStreamError::Configuration(format!(
                "Unsupported bit depth: {}",
                other
            ))),
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I16 => 2,
            Self::F32 => 4,
        }
    }

    pub fn bit_depth(&self) -> u16 {
        (self.bytes_per_sample() * 8) as u16
    }
}

/// Channel layouts a playback voice accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    pub fn from_count(channels: u16) -> Result<Self> {
        match channels {
            1 => Ok(Self::Mono),
            2 => Ok(Self::Stereo),
            other => Err(PetalStreamError::Configuration(format!(
                "Unsupported channel count: {} (expected 1 or 2)",
                other
            ))),
        }
    }

    pub fn count(&self) -> u16 {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }
}

/// Immutable description of the PCM layout held by a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferFormat {
    pub layout: ChannelLayout,
    pub sample: SampleFormat,
}

impl BufferFormat {
    pub fn new(layout: ChannelLayout, sample: SampleFormat) -> Self {
        Self { layout, sample }
    }

    /// Resolves the format for a source reporting `channels` and `sample`.
    ///
    /// Fails with [`PetalStreamError::Configuration`] for channel counts a voice cannot play.
    pub fn resolve(channels: u16, sample: SampleFormat) -> Result<Self> {
        Ok(Self::new(ChannelLayout::from_count(channels)?, sample))
    }

    pub fn channels(&self) -> u16 {
        self.layout.count()
    }

    /// Size of one frame (one sample per channel) in bytes.
    pub fn frame_size(&self) -> usize {
        self.channels() as usize * self.sample.bytes_per_sample()
    }

    /// The OpenAL format enum value for this layout (`AL_FORMAT_*`).
    pub fn al_enum(&self) -> u32 {
        match (self.layout, self.sample) {
            (ChannelLayout::Mono, SampleFormat::U8) => 0x1100,
            (ChannelLayout::Mono, SampleFormat::I16) => 0x1101,
            (ChannelLayout::Stereo, SampleFormat::U8) => 0x1102,
            (ChannelLayout::Stereo, SampleFormat::I16) => 0x1103,
            (ChannelLayout::Mono, SampleFormat::F32) => 0x10010,
            (ChannelLayout::Stereo, SampleFormat::F32) => 0x10011,
        }
    }

    /// Reverse of [`BufferFormat::al_enum`].
    pub fn from_al_enum(value: u32) -> Option<Self> {
        let format = match value {
            0x1100 => Self::new(ChannelLayout::Mono, SampleFormat::U8),
            0x1101 => Self::new(ChannelLayout::Mono, SampleFormat::I16),
            0x1102 => Self::new(ChannelLayout::Stereo, SampleFormat::U8),
            0x1103 => Self::new(ChannelLayout::Stereo, SampleFormat::I16),
            0x10010 => Self::new(ChannelLayout::Mono, SampleFormat::F32),
            0x10011 => Self::new(ChannelLayout::Stereo, SampleFormat::F32),
            _ => return None,
        };
        Some(format)
    }

    pub fn is_frame_aligned(&self, bytes: usize) -> bool {
        bytes % self.frame_size() == 0
    }

    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        bytes / self.frame_size()
    }

    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.frame_size()
    }

    /// Playback time of `bytes` of PCM at `sample_rate`.
    pub fn duration_of(&self, bytes: usize, sample_rate: u32) -> Duration {
        if sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.bytes_to_frames(bytes) as f64 / sample_rate as f64)
    }

    /// Frame-aligned byte count covering `duration` at `sample_rate`.
    pub fn bytes_for(&self, duration: Duration, sample_rate: u32) -> usize {
        let frames = (duration.as_secs_f64() * sample_rate as f64).round() as usize;
        self.frames_to_bytes(frames)
    }
}
