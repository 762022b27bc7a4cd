use crate::backend::{AudioBackend, BufferId, VoiceId, VoiceState};
use crate::convert::decode_samples_into;
use crate::error::{PetalStreamError, Result};
use crate::format::BufferFormat;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct SoftBuffer {
    format: Option<BufferFormat>,
    sample_rate: u32,
    /// Interleaved samples decoded to f32
    samples: Vec<f32>,
    frames: usize,
    /// Number of voice queues this buffer currently sits on
    attached: usize,
}

#[derive(Debug)]
struct SoftVoice {
    queue: VecDeque<BufferId>,
    processed: usize,
    /// Fractional frame position inside the first unprocessed buffer
    cursor: f64,
    state: VoiceState,
    gain: f32,
    format: Option<BufferFormat>,
}

impl SoftVoice {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            processed: 0,
            cursor: 0.0,
            state: VoiceState::Initial,
            gain: 1.0,
            format: None,
        }
    }

    fn rewind(&mut self) {
        self.processed = 0;
        self.cursor = 0.0;
    }
}

#[derive(Debug, Default)]
struct SoftState {
    next_id: u32,
    voices: HashMap<VoiceId, SoftVoice>,
    buffers: HashMap<BufferId, SoftBuffer>,
    max_voices: Option<usize>,
    max_buffers: Option<usize>,
}

impl SoftState {
    fn next_raw_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn voice_mut(&mut self, voice: VoiceId) -> Result<&mut SoftVoice> {
        self.voices
            .get_mut(&voice)
            .ok_or_else(|| PetalStreamError::Backend(format!("Unknown voice {}", voice)))
    }

    fn voice(&self, voice: VoiceId) -> Result<&SoftVoice> {
        self.voices
            .get(&voice)
            .ok_or_else(|| PetalStreamError::Backend(format!("Unknown voice {}", voice)))
    }
}

/// In-process implementation of [`AudioBackend`] with OpenAL buffer-queue semantics.
///
/// - processed buffers keep counting as queued until they are unqueued
/// - a playing voice that runs out of data stops by itself
/// - `play` on a stopped voice rewinds its queue; `play` on a playing voice is a no-op
/// - `stop` marks every queued buffer processed
///
/// Audio is pulled out with [`SoftwareBackend::render`], typically from the
/// [`PetalStreamEngine`](crate::PetalStreamEngine) output callback.
#[derive(Debug, Clone, Default)]
pub struct SoftwareBackend {
    state: Arc<Mutex<SoftState>>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that refuses to allocate more than the given number of voices and
    /// buffers, the way a native engine reports running out of memory.
    pub fn with_limits(max_voices: usize, max_buffers: usize) -> Self {
        let backend = Self::default();
        if let Ok(mut state) = backend.state.lock() {
            state.max_voices = Some(max_voices);
            state.max_buffers = Some(max_buffers);
        }
        backend
    }

    fn lock(&self) -> Result<MutexGuard<'_, SoftState>> {
        self.state
            .lock()
            .map_err(|_| PetalStreamError::Backend("Software backend lock poisoned".to_string()))
    }

    /// Number of live voices.
    pub fn voice_count(&self) -> usize {
        self.lock().map(|state| state.voices.len()).unwrap_or(0)
    }

    /// Number of live buffers.
    pub fn buffer_count(&self) -> usize {
        self.lock().map(|state| state.buffers.len()).unwrap_or(0)
    }

    /// Mixes every playing voice into `out` (interleaved, `channels` wide) at `output_rate`.
    ///
    /// Mono buffers are copied to every output channel; stereo buffers feed the first two
    /// channels (or are averaged for mono output). Returns the number of frames written.
    /// If the state is contended the block is left silent.
    pub fn render(&self, out: &mut [f32], channels: u16, output_rate: u32) -> usize {
        out.fill(0.0);

        if channels == 0 || output_rate == 0 {
            return 0;
        }

        let Ok(mut state) = self.state.try_lock() else {
            log::warn!("Failed to acquire software backend lock in render");
            return 0;
        };

        let frames = out.len() / channels as usize;
        let SoftState {
            voices, buffers, ..
        } = &mut *state;

        for (voice_id, voice) in voices.iter_mut() {
            if voice.state != VoiceState::Playing {
                continue;
            }
            mix_voice(voice, buffers, out, channels as usize, output_rate, frames);
            if voice.state == VoiceState::Stopped {
                log::debug!("{} drained its queue and stopped", voice_id);
            }
        }

        frames
    }
}

fn mix_voice(
    voice: &mut SoftVoice,
    buffers: &HashMap<BufferId, SoftBuffer>,
    out: &mut [f32],
    channels: usize,
    output_rate: u32,
    frames: usize,
) {
    let mut frame = 0;

    while frame < frames {
        let Some(buffer) = voice
            .queue
            .get(voice.processed)
            .and_then(|id| buffers.get(id))
        else {
            voice.state = VoiceState::Stopped;
            voice.cursor = 0.0;
            return;
        };

        let src_channels = buffer.format.map(|f| f.channels() as usize).unwrap_or(1);
        let step = buffer.sample_rate as f64 / output_rate as f64;

        while frame < frames && (voice.cursor as usize) < buffer.frames {
            let base = voice.cursor as usize * src_channels;
            let dst = &mut out[frame * channels..(frame + 1) * channels];

            match (src_channels, channels) {
                (1, _) => {
                    let sample = buffer.samples[base] * voice.gain;
                    dst.iter_mut().for_each(|s| *s += sample);
                }
                (_, 1) => {
                    let sum: f32 = buffer.samples[base..base + src_channels].iter().sum();
                    dst[0] += sum / src_channels as f32 * voice.gain;
                }
                _ => {
                    for (ch, s) in dst.iter_mut().take(src_channels).enumerate() {
                        *s += buffer.samples[base + ch] * voice.gain;
                    }
                }
            }

            voice.cursor += step;
            frame += 1;
        }

        if voice.cursor as usize >= buffer.frames {
            voice.cursor = (voice.cursor - buffer.frames as f64).max(0.0);
            voice.processed += 1;

            if voice.processed >= voice.queue.len() {
                voice.state = VoiceState::Stopped;
                voice.cursor = 0.0;
                return;
            }
        }
    }
}

impl AudioBackend for SoftwareBackend {
    fn create_voice(&self) -> Result<VoiceId> {
        let mut state = self.lock()?;
        if let Some(max) = state.max_voices {
            if state.voices.len() >= max {
                return Err(PetalStreamError::Backend(format!(
                    "Out of voices (limit {})",
                    max
                )));
            }
        }

        let id = VoiceId::from_raw(state.next_raw_id());
        state.voices.insert(id, SoftVoice::new());
        Ok(id)
    }

    fn delete_voice(&self, voice: VoiceId) -> Result<()> {
        let mut state = self.lock()?;
        let removed = state
            .voices
            .remove(&voice)
            .ok_or_else(|| PetalStreamError::Backend(format!("Unknown voice {}", voice)))?;

        for buffer_id in removed.queue {
            if let Some(buffer) = state.buffers.get_mut(&buffer_id) {
                buffer.attached = buffer.attached.saturating_sub(1);
            }
        }
        Ok(())
    }

    fn create_buffer(&self) -> Result<BufferId> {
        let mut state = self.lock()?;
        if let Some(max) = state.max_buffers {
            if state.buffers.len() >= max {
                return Err(PetalStreamError::Backend(format!(
                    "Out of buffers (limit {})",
                    max
                )));
            }
        }

        let id = BufferId::from_raw(state.next_raw_id());
        state.buffers.insert(id, SoftBuffer::default());
        Ok(id)
    }

    fn delete_buffers(&self, buffers: &[BufferId]) -> Result<()> {
        let mut state = self.lock()?;

        for id in buffers {
            match state.buffers.get(id) {
                None => {
                    return Err(PetalStreamError::Backend(format!("Unknown buffer {}", id)));
                }
                Some(buffer) if buffer.attached > 0 => {
                    return Err(PetalStreamError::Backend(format!(
                        "{} is still queued on a voice",
                        id
                    )));
                }
                Some(_) => {}
            }
        }

        for id in buffers {
            state.buffers.remove(id);
        }
        Ok(())
    }

    fn fill_buffer(
        &self,
        buffer: BufferId,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<()> {
        if sample_rate == 0 {
            return Err(PetalStreamError::Backend(
                "Sample rate must be greater than 0".to_string(),
            ));
        }

        if !format.is_frame_aligned(data.len()) {
            return Err(PetalStreamError::Backend(format!(
                "{} bytes is not a whole number of {}-byte frames",
                data.len(),
                format.frame_size()
            )));
        }

        let mut state = self.lock()?;
        let target = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| PetalStreamError::Backend(format!("Unknown buffer {}", buffer)))?;

        if target.attached > 0 {
            return Err(PetalStreamError::Backend(format!(
                "Cannot fill {} while it is queued",
                buffer
            )));
        }

        target.samples.clear();
        decode_samples_into(data, format.sample, &mut target.samples);
        target.format = Some(format);
        target.sample_rate = sample_rate;
        target.frames = format.bytes_to_frames(data.len());
        Ok(())
    }

    fn queue_buffers(&self, voice: VoiceId, buffers: &[BufferId]) -> Result<()> {
        let mut state = self.lock()?;
        let mut queue_format = state.voice(voice)?.format;
        let queue_empty = state.voice(voice)?.queue.is_empty();

        for id in buffers {
            let buffer = state
                .buffers
                .get(id)
                .ok_or_else(|| PetalStreamError::Backend(format!("Unknown buffer {}", id)))?;
            let format = buffer
                .format
                .ok_or_else(|| PetalStreamError::Backend(format!("{} has no data", id)))?;

            match queue_format {
                Some(existing) if !queue_empty && existing != format => {
                    return Err(PetalStreamError::Backend(format!(
                        "{} format {:?} does not match the queue format {:?}",
                        id, format, existing
                    )));
                }
                _ => queue_format = Some(format),
            }
        }

        for id in buffers {
            if let Some(buffer) = state.buffers.get_mut(id) {
                buffer.attached += 1;
            }
        }

        let target = state.voice_mut(voice)?;
        target.queue.extend(buffers.iter().copied());
        target.format = queue_format;
        Ok(())
    }

    fn unqueue_buffers(&self, voice: VoiceId, out: &mut [BufferId]) -> Result<()> {
        let mut state = self.lock()?;
        let target = state.voice_mut(voice)?;

        if out.len() > target.processed {
            return Err(PetalStreamError::Backend(format!(
                "Cannot unqueue {} buffers from {}: only {} processed",
                out.len(),
                voice,
                target.processed
            )));
        }

        for slot in out.iter_mut() {
            if let Some(id) = target.queue.pop_front() {
                *slot = id;
            }
        }
        target.processed -= out.len();

        for id in out.iter() {
            if let Some(buffer) = state.buffers.get_mut(id) {
                buffer.attached = buffer.attached.saturating_sub(1);
            }
        }
        Ok(())
    }

    fn processed_count(&self, voice: VoiceId) -> Result<usize> {
        Ok(self.lock()?.voice(voice)?.processed)
    }

    fn queued_count(&self, voice: VoiceId) -> Result<usize> {
        Ok(self.lock()?.voice(voice)?.queue.len())
    }

    fn play(&self, voice: VoiceId) -> Result<()> {
        let mut state = self.lock()?;
        let target = state.voice_mut(voice)?;

        match target.state {
            VoiceState::Playing => {}
            VoiceState::Paused => target.state = VoiceState::Playing,
            VoiceState::Initial | VoiceState::Stopped => {
                target.rewind();
                target.state = if target.queue.is_empty() {
                    VoiceState::Stopped
                } else {
                    VoiceState::Playing
                };
            }
        }
        Ok(())
    }

    fn pause(&self, voice: VoiceId) -> Result<()> {
        let mut state = self.lock()?;
        let target = state.voice_mut(voice)?;
        if target.state == VoiceState::Playing {
            target.state = VoiceState::Paused;
        }
        Ok(())
    }

    fn stop(&self, voice: VoiceId) -> Result<()> {
        let mut state = self.lock()?;
        let target = state.voice_mut(voice)?;
        target.state = VoiceState::Stopped;
        target.processed = target.queue.len();
        target.cursor = 0.0;
        Ok(())
    }

    fn voice_state(&self, voice: VoiceId) -> Result<VoiceState> {
        Ok(self.lock()?.voice(voice)?.state)
    }

    fn set_gain(&self, voice: VoiceId, gain: f32) -> Result<()> {
        if !gain.is_finite() || gain < 0.0 {
            return Err(PetalStreamError::Backend(format!("Invalid gain {}", gain)));
        }
        self.lock()?.voice_mut(voice)?.gain = gain;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::encode_samples;
    use crate::format::{ChannelLayout, SampleFormat};

    fn mono_f32() -> BufferFormat {
        BufferFormat::new(ChannelLayout::Mono, SampleFormat::F32)
    }

    fn filled_buffer(backend: &SoftwareBackend, value: f32, frames: usize) -> BufferId {
        let buffer = backend.create_buffer().unwrap();
        let data = encode_samples(&vec![value; frames], SampleFormat::F32);
        backend.fill_buffer(buffer, mono_f32(), &data, 48000).unwrap();
        buffer
    }

    #[test]
    fn test_queued_count_includes_processed() {
        let backend = SoftwareBackend::new();
        let voice = backend.create_voice().unwrap();
        let a = filled_buffer(&backend, 0.25, 4);
        let b = filled_buffer(&backend, 0.5, 4);
        backend.queue_buffers(voice, &[a, b]).unwrap();
        backend.play(voice).unwrap();

        let mut out = vec![0.0; 4];
        backend.render(&mut out, 1, 48000);
        assert_eq!(out, vec![0.25; 4]);
        assert_eq!(backend.processed_count(voice).unwrap(), 1);
        assert_eq!(backend.queued_count(voice).unwrap(), 2);
        assert_eq!(backend.voice_state(voice).unwrap(), VoiceState::Playing);

        let mut reclaimed = [BufferId::default(); 1];
        backend.unqueue_buffers(voice, &mut reclaimed).unwrap();
        assert_eq!(reclaimed[0], a);
        assert_eq!(backend.queued_count(voice).unwrap(), 1);
    }

    #[test]
    fn test_voice_stops_when_queue_runs_dry() {
        let backend = SoftwareBackend::new();
        let voice = backend.create_voice().unwrap();
        let a = filled_buffer(&backend, 1.0, 3);
        backend.queue_buffers(voice, &[a]).unwrap();
        backend.play(voice).unwrap();

        let mut out = vec![0.0; 8];
        backend.render(&mut out, 2, 48000);
        assert_eq!(&out[..6], &[1.0; 6]);
        assert_eq!(&out[6..], &[0.0; 2]);
        assert_eq!(backend.voice_state(voice).unwrap(), VoiceState::Stopped);
        assert_eq!(backend.processed_count(voice).unwrap(), 1);
    }

    #[test]
    fn test_unqueue_more_than_processed_fails() {
        let backend = SoftwareBackend::new();
        let voice = backend.create_voice().unwrap();
        let a = filled_buffer(&backend, 0.0, 4);
        backend.queue_buffers(voice, &[a]).unwrap();

        let mut out = [BufferId::default(); 1];
        assert!(backend.unqueue_buffers(voice, &mut out).is_err());
        assert_eq!(backend.queued_count(voice).unwrap(), 1);
    }

    #[test]
    fn test_stop_marks_everything_processed_and_play_rewinds() {
        let backend = SoftwareBackend::new();
        let voice = backend.create_voice().unwrap();
        let a = filled_buffer(&backend, 0.1, 4);
        let b = filled_buffer(&backend, 0.2, 4);
        backend.queue_buffers(voice, &[a, b]).unwrap();
        backend.play(voice).unwrap();

        backend.stop(voice).unwrap();
        assert_eq!(backend.processed_count(voice).unwrap(), 2);

        backend.play(voice).unwrap();
        assert_eq!(backend.processed_count(voice).unwrap(), 0);
        assert_eq!(backend.voice_state(voice).unwrap(), VoiceState::Playing);
    }

    #[test]
    fn test_queued_buffers_are_protected() {
        let backend = SoftwareBackend::new();
        let voice = backend.create_voice().unwrap();
        let a = filled_buffer(&backend, 0.0, 2);
        backend.queue_buffers(voice, &[a]).unwrap();

        assert!(backend.delete_buffers(&[a]).is_err());
        assert!(backend.fill_buffer(a, mono_f32(), &[0; 4], 48000).is_err());

        backend.delete_voice(voice).unwrap();
        backend.delete_buffers(&[a]).unwrap();
        assert_eq!(backend.buffer_count(), 0);
        assert_eq!(backend.voice_count(), 0);
    }

    #[test]
    fn test_fill_rejects_partial_frames_and_empty_queueing() {
        let backend = SoftwareBackend::new();
        let voice = backend.create_voice().unwrap();
        let buffer = backend.create_buffer().unwrap();
        let stereo16 = BufferFormat::new(ChannelLayout::Stereo, SampleFormat::I16);

        assert!(backend.fill_buffer(buffer, stereo16, &[0; 6], 44100).is_err());
        assert!(backend.queue_buffers(voice, &[buffer]).is_err());
    }

    #[test]
    fn test_mismatched_formats_rejected() {
        let backend = SoftwareBackend::new();
        let voice = backend.create_voice().unwrap();
        let a = filled_buffer(&backend, 0.0, 2);
        let b = backend.create_buffer().unwrap();
        let stereo16 = BufferFormat::new(ChannelLayout::Stereo, SampleFormat::I16);
        backend.fill_buffer(b, stereo16, &[0; 8], 48000).unwrap();

        backend.queue_buffers(voice, &[a]).unwrap();
        assert!(backend.queue_buffers(voice, &[b]).is_err());
    }

    #[test]
    fn test_limits_report_allocation_failure() {
        let backend = SoftwareBackend::with_limits(1, 2);
        assert!(backend.create_voice().is_ok());
        assert!(backend.create_voice().is_err());
        assert!(backend.create_buffer().is_ok());
        assert!(backend.create_buffer().is_ok());
        assert!(backend.create_buffer().is_err());
    }

    #[test]
    fn test_gain_and_rate_stepping() {
        let backend = SoftwareBackend::new();
        let voice = backend.create_voice().unwrap();
        let buffer = backend.create_buffer().unwrap();
        let data = encode_samples(&[0.0, 1.0, 0.0, 1.0], SampleFormat::F32);
        backend.fill_buffer(buffer, mono_f32(), &data, 24000).unwrap();
        backend.queue_buffers(voice, &[buffer]).unwrap();
        backend.set_gain(voice, 0.5).unwrap();
        backend.play(voice).unwrap();

        // 24 kHz buffer rendered at 48 kHz: each source frame is held for two output frames
        let mut out = vec![0.0; 8];
        backend.render(&mut out, 1, 48000);
        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5, 0.0, 0.0, 0.5, 0.5]);
        assert_eq!(backend.voice_state(voice).unwrap(), VoiceState::Stopped);
        assert!(backend.set_gain(voice, -1.0).is_err());
    }
}
