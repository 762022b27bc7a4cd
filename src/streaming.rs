//! Streaming playback over a fixed ring of native buffers.
//!
//! A [`StreamingVoice`] owns one voice and `N` buffers. It primes the voice with up to `N`
//! chunks from a [`PcmDataSource`] and, on every [`update`](StreamingVoice::update), takes
//! back the buffers the voice has finished with, refills them and queues them again. When
//! the source runs dry the remaining audio plays out and the stream goes inactive.
//!
//! Native handles are released only by [`destroy`](StreamingVoice::destroy). Wrap the voice
//! in a [`StreamGuard`](crate::StreamGuard) or use [`with_stream`](crate::with_stream) to
//! tie that to a scope.

use crate::backend::{AudioBackend, BufferId, VoiceId, VoiceState};
use crate::config::StreamConfig;
use crate::error::{PetalStreamError, Result};
use crate::events::PetalStreamEvent;
use crate::format::BufferFormat;
use crate::leak::{self, LeakToken};
use crate::source::PcmDataSource;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::collections::VecDeque;

const EVENT_CAPACITY: usize = 64;

/// Counters accumulated over the life of a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Buffers handed to the voice, priming included
    pub buffers_queued: u64,
    /// PCM bytes handed to the voice
    pub bytes_streamed: u64,
    /// Times the voice ran dry and playback was reissued
    pub underruns: u64,
}

/// Feeds a native voice from a [`PcmDataSource`] through a ring of reusable buffers.
pub struct StreamingVoice<B: AudioBackend, S: PcmDataSource> {
    backend: B,
    source: Option<S>,
    config: StreamConfig,
    format: BufferFormat,
    sample_rate: u32,
    voice: VoiceId,
    buffers: Vec<BufferId>,
    /// Buffers owned by the stream and ready for refill, oldest first
    available: VecDeque<BufferId>,
    unqueued: Vec<BufferId>,
    scratch: Vec<u8>,
    exhausted: bool,
    active: bool,
    /// Set by our own pause/stop so update() does not mistake them for underruns
    held: bool,
    destroyed: bool,
    stats: StreamStats,
    event_sender: Sender<PetalStreamEvent>,
    event_receiver: Receiver<PetalStreamEvent>,
    leak_token: Option<LeakToken>,
}

impl<B: AudioBackend, S: PcmDataSource> StreamingVoice<B, S> {
    /// Allocates the voice and its buffers and primes them from `source`.
    ///
    /// Playback is not started; call [`play`](Self::play) or let the first
    /// [`update`](Self::update) start it.
    ///
    /// # Errors
    ///
    /// Returns [`PetalStreamError::Configuration`] for an invalid ring or a source layout
    /// the backend cannot take, and propagates backend and source errors. Nothing allocated
    /// so far survives a failure.
    pub fn new(backend: B, source: S, config: StreamConfig) -> Result<Self> {
        let format = source.buffer_format().map_err(|e| match e {
            PetalStreamError::AudioFormat(msg) => PetalStreamError::Configuration(msg),
            other => other,
        })?;
        config.validate(&format)?;

        let sample_rate = source.sample_rate();
        if sample_rate == 0 {
            return Err(PetalStreamError::Configuration(
                "Source sample rate must be greater than 0".to_string(),
            ));
        }

        let voice = backend.create_voice()?;
        let mut buffers = Vec::with_capacity(config.buffer_count);
        for _ in 0..config.buffer_count {
            match backend.create_buffer() {
                Ok(buffer) => buffers.push(buffer),
                Err(e) => {
                    log::error!(
                        "Failed to allocate buffer {} of {} for {}: {}",
                        buffers.len() + 1,
                        config.buffer_count,
                        voice,
                        e
                    );
                    release_partial(&backend, voice, &buffers);
                    return Err(e);
                }
            }
        }

        let (event_sender, event_receiver) = bounded(EVENT_CAPACITY);
        let leak_token = leak::register(format!("StreamingVoice on {}", voice));

        let mut stream = Self {
            available: buffers.iter().copied().collect(),
            unqueued: Vec::with_capacity(config.buffer_count),
            scratch: vec![0u8; config.buffer_size],
            backend,
            source: Some(source),
            config,
            format,
            sample_rate,
            voice,
            buffers,
            exhausted: false,
            active: true,
            held: false,
            destroyed: false,
            stats: StreamStats::default(),
            event_sender,
            event_receiver,
            leak_token: Some(leak_token),
        };

        if let Err(e) = stream.prime() {
            if let Err(cleanup) = stream.destroy() {
                log::error!("Failed to release {} after priming error: {}", voice, cleanup);
            }
            return Err(e);
        }

        log::debug!(
            "Created stream on {}: {} x {} bytes, {:?} at {} Hz",
            voice,
            stream.config.buffer_count,
            stream.config.buffer_size,
            format,
            sample_rate
        );

        Ok(stream)
    }

    fn prime(&mut self) -> Result<()> {
        self.refill()?;

        // A source with no data at all never gets played
        if self.exhausted && self.backend.queued_count(self.voice)? == 0 {
            self.finish()?;
        }
        Ok(())
    }

    /// Recycles processed buffers and keeps the voice playing.
    ///
    /// Returns `Ok(true)` while the stream still has audio to play and `Ok(false)` once it
    /// has finished. Call it regularly, well within the time one buffer takes to play.
    pub fn update(&mut self) -> Result<bool> {
        self.ensure_alive()?;

        if !self.active {
            return Ok(false);
        }

        self.reclaim_processed()?;
        self.refill()?;

        let queued = self.backend.queued_count(self.voice)?;
        if self.exhausted && queued == 0 {
            self.finish()?;
            return Ok(false);
        }

        if queued > 0 && !self.held {
            // Every processed buffer was just reclaimed, so anything left still has to play
            let pending = queued > self.backend.processed_count(self.voice)?;
            match self.backend.voice_state(self.voice)? {
                VoiceState::Playing => {}
                VoiceState::Initial => {
                    self.backend.play(self.voice)?;
                    log::debug!("Started playback on {}", self.voice);
                    self.emit(PetalStreamEvent::Started { voice: self.voice });
                }
                state if pending => {
                    self.stats.underruns += 1;
                    log::warn!(
                        "Buffer underrun on {} (voice was {:?}), resuming playback",
                        self.voice,
                        state
                    );
                    self.emit(PetalStreamEvent::BufferUnderrun {
                        voice: self.voice,
                        underruns: self.stats.underruns,
                    });
                    self.backend.play(self.voice)?;
                }
                _ => {}
            }
        }

        Ok(self.active)
    }

    /// Unqueues every buffer the voice has finished with, oldest first.
    fn reclaim_processed(&mut self) -> Result<()> {
        let processed = self
            .backend
            .processed_count(self.voice)?
            .min(self.buffers.len());
        if processed == 0 {
            return Ok(());
        }

        self.unqueued.clear();
        self.unqueued.resize(processed, BufferId::default());
        self.backend
            .unqueue_buffers(self.voice, &mut self.unqueued)?;
        self.available.extend(self.unqueued.iter().copied());
        Ok(())
    }

    /// Fills and queues available buffers, one source read per buffer, until the source
    /// runs out or no buffer is left.
    fn refill(&mut self) -> Result<()> {
        while !self.exhausted {
            let Some(buffer) = self.available.pop_front() else {
                break;
            };
            let Some(source) = self.source.as_mut() else {
                self.available.push_front(buffer);
                break;
            };

            let read = match source.read(&mut self.scratch) {
                Ok(read) if read <= self.scratch.len() => read,
                Ok(read) => {
                    self.available.push_front(buffer);
                    return Err(PetalStreamError::AudioFormat(format!(
                        "Source reported {} bytes for a {}-byte read",
                        read,
                        self.scratch.len()
                    )));
                }
                Err(e) => {
                    self.available.push_front(buffer);
                    return Err(e);
                }
            };

            if read == 0 {
                self.available.push_front(buffer);
                self.exhausted = true;
                log::debug!("Source for {} is exhausted", self.voice);
                self.emit(PetalStreamEvent::Exhausted { voice: self.voice });
                break;
            }

            let queued = self
                .backend
                .fill_buffer(buffer, self.format, &self.scratch[..read], self.sample_rate)
                .and_then(|_| self.backend.queue_buffers(self.voice, &[buffer]));
            if let Err(e) = queued {
                self.available.push_front(buffer);
                return Err(e);
            }

            self.stats.buffers_queued += 1;
            self.stats.bytes_streamed += read as u64;
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.active = false;
        self.backend.stop(self.voice)?;
        log::debug!(
            "Stream on {} finished after {} bytes",
            self.voice,
            self.stats.bytes_streamed
        );
        self.emit(PetalStreamEvent::Finished { voice: self.voice });
        Ok(())
    }

    fn emit(&self, event: PetalStreamEvent) {
        if let Err(TrySendError::Full(event)) = self.event_sender.try_send(event) {
            log::debug!("Event queue full, dropping {:?}", event);
        }
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed {
            return Err(PetalStreamError::InvalidState(format!(
                "Stream on {} has been destroyed",
                self.voice
            )));
        }
        Ok(())
    }

    /// Starts or resumes playback and lets `update` resume after underruns again.
    pub fn play(&mut self) -> Result<()> {
        self.ensure_alive()?;
        self.held = false;
        self.backend.play(self.voice)
    }

    /// Pauses playback. `update` keeps the voice paused until [`play`](Self::play).
    pub fn pause(&mut self) -> Result<()> {
        self.ensure_alive()?;
        self.held = true;
        self.backend.pause(self.voice)
    }

    /// Stops playback, discarding what was queued.
    ///
    /// `update` still refills the ring but does not restart the voice; a later
    /// [`play`](Self::play) starts from the freshly queued data.
    pub fn stop(&mut self) -> Result<()> {
        self.ensure_alive()?;
        self.held = true;
        self.backend.stop(self.voice)
    }

    pub fn set_gain(&mut self, gain: f32) -> Result<()> {
        self.ensure_alive()?;
        self.backend.set_gain(self.voice, gain)
    }

    pub fn state(&self) -> Result<VoiceState> {
        self.ensure_alive()?;
        self.backend.voice_state(self.voice)
    }

    pub fn queued_buffers(&self) -> Result<usize> {
        self.ensure_alive()?;
        self.backend.queued_count(self.voice)
    }

    pub fn processed_buffers(&self) -> Result<usize> {
        self.ensure_alive()?;
        self.backend.processed_count(self.voice)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn voice(&self) -> VoiceId {
        self.voice
    }

    pub fn format(&self) -> BufferFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Drains the events emitted since the last call.
    pub fn poll_events(&self) -> Vec<PetalStreamEvent> {
        self.event_receiver.try_iter().collect()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn source(&self) -> &S {
        match &self.source {
            Some(source) => source,
            None => unreachable!("source is only taken by into_source"),
        }
    }

    pub fn source_mut(&mut self) -> &mut S {
        match &mut self.source {
            Some(source) => source,
            None => unreachable!("source is only taken by into_source"),
        }
    }

    /// Destroys the stream and hands the source back so the caller can close it.
    pub fn into_source(mut self) -> Result<S> {
        self.destroy()?;
        self.source
            .take()
            .ok_or_else(|| PetalStreamError::InvalidState("Source already taken".to_string()))
    }

    /// Releases the voice and every buffer.
    ///
    /// Safe to call more than once; later calls do nothing. The source is left open.
    pub fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }

        // After a stop every queued buffer counts as processed
        self.backend.stop(self.voice)?;
        let queued = self
            .backend
            .queued_count(self.voice)?
            .min(self.buffers.len());
        self.unqueued.clear();
        self.unqueued.resize(queued, BufferId::default());
        self.backend
            .unqueue_buffers(self.voice, &mut self.unqueued)?;

        self.backend.delete_buffers(&self.buffers)?;
        self.buffers.clear();
        self.available.clear();
        self.backend.delete_voice(self.voice)?;

        self.destroyed = true;
        self.active = false;
        if let Some(token) = self.leak_token.take() {
            leak::release(&token);
        }

        log::debug!("Destroyed stream on {}", self.voice);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn leak_id(&self) -> Option<uuid::Uuid> {
        self.leak_token.as_ref().map(LeakToken::id)
    }
}

impl<B: AudioBackend, S: PcmDataSource> Drop for StreamingVoice<B, S> {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }

        log::error!(
            "StreamingVoice on {} dropped without destroy(); releasing its handles",
            self.voice
        );
        if let Some(token) = self.leak_token.take() {
            leak::mark_leaked(&token);
        }
        if let Err(e) = self.destroy() {
            log::error!("Failed to release leaked stream on {}: {}", self.voice, e);
        }
    }
}

fn release_partial<B: AudioBackend>(backend: &B, voice: VoiceId, buffers: &[BufferId]) {
    if let Err(e) = backend.delete_buffers(buffers) {
        log::warn!("Failed to release buffers of {}: {}", voice, e);
    }
    if let Err(e) = backend.delete_voice(voice) {
        log::warn!("Failed to release {}: {}", voice, e);
    }
}
