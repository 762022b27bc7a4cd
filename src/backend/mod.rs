//! Native playback surface consumed by the streaming layer.
//!
//! [`AudioBackend`] mirrors the buffer-queue subset of an OpenAL-style API: voices (sources)
//! consume buffers queued on them in FIFO order, report how many they have finished with, and
//! hand those back through `unqueue_buffers`. [`SoftwareBackend`] implements it in-process.

mod software;

use crate::error::{PetalStreamError, Result};
use crate::format::BufferFormat;
pub use software::SoftwareBackend;

/// Handle to a playback voice owned by a backend.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VoiceId(u32);

impl VoiceId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for VoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VoiceId({})", self.0)
    }
}

/// Handle to a PCM data buffer owned by a backend. `0` is the null buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct BufferId(u32);

impl BufferId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BufferId({})", self.0)
    }
}

/// Playback state reported by a voice.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VoiceState {
    /// Created or rewound, never played
    Initial,
    Playing,
    Paused,
    /// Stopped explicitly or ran out of queued data
    Stopped,
}

/// The voice/buffer operations a streaming voice needs from the audio engine.
///
/// Methods take `&self`: native engines are process-global and the handle types are
/// cheap to clone, so implementations are expected to use interior mutability.
pub trait AudioBackend {
    fn create_voice(&self) -> Result<VoiceId>;

    /// Deletes a voice. Buffers still queued on it are detached, not deleted.
    fn delete_voice(&self, voice: VoiceId) -> Result<()>;

    fn create_buffer(&self) -> Result<BufferId>;

    /// Deletes buffers. Fails without deleting anything if one of them is still queued.
    fn delete_buffers(&self, buffers: &[BufferId]) -> Result<()>;

    /// Replaces the contents of `buffer` with `data`, laid out as `format` at `sample_rate`.
    fn fill_buffer(
        &self,
        buffer: BufferId,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<()>;

    /// Appends buffers to the tail of the voice's queue.
    fn queue_buffers(&self, voice: VoiceId, buffers: &[BufferId]) -> Result<()>;

    /// Removes `out.len()` processed buffers from the head of the queue, oldest first.
    ///
    /// Fails if fewer than `out.len()` buffers have been processed.
    fn unqueue_buffers(&self, voice: VoiceId, out: &mut [BufferId]) -> Result<()>;

    /// Buffers at the head of the queue the voice has finished playing.
    fn processed_count(&self, voice: VoiceId) -> Result<usize>;

    /// All buffers attached to the voice, processed ones included.
    fn queued_count(&self, voice: VoiceId) -> Result<usize>;

    fn play(&self, voice: VoiceId) -> Result<()>;

    fn pause(&self, voice: VoiceId) -> Result<()>;

    /// Halts playback; every queued buffer becomes processed.
    fn stop(&self, voice: VoiceId) -> Result<()>;

    fn voice_state(&self, voice: VoiceId) -> Result<VoiceState>;

    fn set_gain(&self, voice: VoiceId, _gain: f32) -> Result<()> {
        Err(PetalStreamError::Backend(format!(
            "Gain control is not supported for {}",
            voice
        )))
    }
}
