//! Configuration for PetalStream

use crate::error::{PetalStreamError, Result};
use crate::format::BufferFormat;
use std::time::Duration;

/// Buffer ring used by a [`StreamingVoice`](crate::StreamingVoice).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Number of buffers cycled between the data source and the voice
    pub buffer_count: usize,
    /// Size of each buffer in bytes
    pub buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_count: 3,
            buffer_size: 32768,
        }
    }
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer_count(mut self, count: usize) -> Self {
        self.buffer_count = count;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Sizes buffers to hold roughly `duration` of audio in `format` at `sample_rate`.
    pub fn buffer_duration(
        mut self,
        duration: Duration,
        format: BufferFormat,
        sample_rate: u32,
    ) -> Self {
        self.buffer_size = format
            .bytes_for(duration, sample_rate)
            .max(format.frame_size());
        self
    }

    /// Checks the ring against the format it is about to carry.
    pub fn validate(&self, format: &BufferFormat) -> Result<()> {
        if self.buffer_count == 0 {
            return Err(PetalStreamError::Configuration(
                "Buffer count must be greater than 0".to_string(),
            ));
        }

        if self.buffer_size == 0 {
            return Err(PetalStreamError::Configuration(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        if !format.is_frame_aligned(self.buffer_size) {
            return Err(PetalStreamError::Configuration(format!(
                "Buffer size {} is not a whole number of {}-byte frames",
                self.buffer_size,
                format.frame_size()
            )));
        }

        Ok(())
    }
}

/// Output settings for the [`PetalStreamEngine`](crate::PetalStreamEngine).
#[derive(Debug, Clone)]
pub struct EngineDesc {
    /// Device sample rate requested from the host
    pub sample_rate: u32,
    /// Frames per device callback
    pub block_size: usize,
    /// Number of output channels (typically 2 for stereo)
    pub channels: u16,
}

impl Default for EngineDesc {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            block_size: 1024,
            channels: 2,
        }
    }
}

impl EngineDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }
}
