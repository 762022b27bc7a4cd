//! A set of streams driven together.

use crate::backend::AudioBackend;
use crate::config::StreamConfig;
use crate::error::{PetalStreamError, Result};
use crate::source::PcmDataSource;
use crate::streaming::StreamingVoice;
use std::collections::HashMap;

/// Stream type held by a [`StreamPool`].
pub type PooledStream<B> = StreamingVoice<B, Box<dyn PcmDataSource>>;

/// Identifier of a stream inside a [`StreamPool`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StreamId({})", self.0)
    }
}

/// Owns several streams on one backend and applies operations to all of them.
///
/// The pool owns the sources of its streams: streams it destroys on its own (auto-destroy,
/// [`destroy_all`](Self::destroy_all), drop) get their source closed. Dropping the pool
/// destroys whatever it still holds.
pub struct StreamPool<B: AudioBackend + Clone> {
    backend: B,
    config: StreamConfig,
    auto_destroy: bool,
    next_id: u64,
    streams: HashMap<StreamId, PooledStream<B>>,
}

impl<B: AudioBackend + Clone> StreamPool<B> {
    pub fn new(backend: B, config: StreamConfig) -> Self {
        Self {
            backend,
            config,
            auto_destroy: false,
            next_id: 0,
            streams: HashMap::new(),
        }
    }

    /// Destroy streams as soon as [`update_all`](Self::update_all) sees them finish.
    pub fn auto_destroy(mut self, enabled: bool) -> Self {
        self.auto_destroy = enabled;
        self
    }

    /// Takes ownership of an existing stream.
    pub fn insert(&mut self, stream: PooledStream<B>) -> StreamId {
        self.next_id += 1;
        let id = StreamId(self.next_id);
        self.streams.insert(id, stream);
        id
    }

    /// Builds a stream with the pool's configuration and adds it.
    pub fn create(&mut self, source: Box<dyn PcmDataSource>) -> Result<StreamId> {
        let stream = StreamingVoice::new(self.backend.clone(), source, self.config.clone())?;
        let id = self.insert(stream);
        log::debug!("{} added on {}", id, self.streams[&id].voice());
        Ok(id)
    }

    pub fn get(&self, id: StreamId) -> Option<&PooledStream<B>> {
        self.streams.get(&id)
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut PooledStream<B>> {
        self.streams.get_mut(&id)
    }

    /// Updates every stream and returns the ones that finished during this call, in id
    /// order.
    ///
    /// A failing stream does not stop the pass: every stream is updated, finished streams
    /// are still auto-destroyed, and the first error is returned afterwards.
    pub fn update_all(&mut self) -> Result<Vec<StreamId>> {
        let mut finished = Vec::new();
        let mut first_error = None;

        for id in self.ids() {
            let Some(stream) = self.streams.get_mut(&id) else {
                continue;
            };
            let was_active = stream.is_active();
            match stream.update() {
                Ok(false) if was_active => finished.push(id),
                Ok(_) => {}
                Err(e) => {
                    log::error!("Failed to update {}: {}", id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if self.auto_destroy {
            for &id in &finished {
                match self.destroy(id) {
                    Ok(mut source) => {
                        source.close();
                        log::debug!("{} finished and was destroyed", id);
                    }
                    Err(e) => {
                        log::error!("Failed to destroy finished {}: {}", id, e);
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(finished),
        }
    }

    pub fn play_all(&mut self) -> Result<()> {
        self.streams.values_mut().try_for_each(|s| s.play())
    }

    pub fn pause_all(&mut self) -> Result<()> {
        self.streams.values_mut().try_for_each(|s| s.pause())
    }

    pub fn stop_all(&mut self) -> Result<()> {
        self.streams.values_mut().try_for_each(|s| s.stop())
    }

    pub fn set_gain_all(&mut self, gain: f32) -> Result<()> {
        self.streams.values_mut().try_for_each(|s| s.set_gain(gain))
    }

    /// Destroys one stream and hands back its source, still open.
    pub fn destroy(&mut self, id: StreamId) -> Result<Box<dyn PcmDataSource>> {
        let stream = self
            .streams
            .remove(&id)
            .ok_or_else(|| PetalStreamError::InvalidState(format!("Unknown stream {}", id)))?;
        stream.into_source()
    }

    /// Destroys every stream and closes their sources.
    ///
    /// Keeps going past failures and returns the first one.
    pub fn destroy_all(&mut self) -> Result<()> {
        let mut first_error = None;

        for (id, stream) in self.streams.drain() {
            match stream.into_source() {
                Ok(mut source) => source.close(),
                Err(e) => {
                    log::error!("Failed to destroy {}: {}", id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Ids of every stream in the pool, ascending.
    pub fn ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.streams.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: AudioBackend + Clone> Drop for StreamPool<B> {
    fn drop(&mut self) {
        if let Err(e) = self.destroy_all() {
            log::error!("Failed to release stream pool: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SoftwareBackend, VoiceState};
    use crate::format::SampleFormat;
    use crate::source::{MemorySource, ToneSource};

    fn ring() -> StreamConfig {
        StreamConfig::new().buffer_count(2).buffer_size(8)
    }

    fn short_source(frames: usize) -> Box<dyn PcmDataSource> {
        Box::new(MemorySource::new(vec![200u8; frames], 1, 8000, SampleFormat::U8).unwrap())
    }

    #[test]
    fn test_create_and_inspect() {
        let backend = SoftwareBackend::new();
        let mut pool = StreamPool::new(backend.clone(), ring());

        let a = pool.create(short_source(8)).unwrap();
        let b = pool
            .create(Box::new(ToneSource::sine(220.0, 8000).unwrap()))
            .unwrap();

        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.ids(), vec![a, b]);
        assert_eq!(backend.voice_count(), 2);
        assert!(pool.get(a).is_some());

        pool.destroy_all().unwrap();
        assert!(pool.is_empty());
        assert_eq!(backend.voice_count(), 0);
    }

    #[test]
    fn test_update_all_reports_finished_once() {
        let backend = SoftwareBackend::new();
        let mut pool = StreamPool::new(backend.clone(), ring());

        let short = pool.create(short_source(8)).unwrap();
        let endless = pool
            .create(Box::new(ToneSource::sine(220.0, 8000).unwrap()))
            .unwrap();

        assert!(pool.update_all().unwrap().is_empty());

        // Plays the short stream's only buffer to the end
        let mut out = vec![0.0f32; 8];
        backend.render(&mut out, 1, 8000);

        assert_eq!(pool.update_all().unwrap(), vec![short]);
        assert!(pool.update_all().unwrap().is_empty());
        assert_eq!(pool.len(), 2);
        assert!(pool.get(endless).unwrap().is_active());
    }

    #[test]
    fn test_auto_destroy_removes_finished_streams() {
        let backend = SoftwareBackend::new();
        let mut pool = StreamPool::new(backend.clone(), ring()).auto_destroy(true);

        let empty = pool.create(short_source(0)).unwrap();
        let tone = pool
            .create(Box::new(ToneSource::sine(220.0, 8000).unwrap()))
            .unwrap();

        // Already inactive after priming, so never reported as finishing
        assert!(pool.update_all().unwrap().is_empty());
        assert!(pool.get(empty).is_some());

        let short = pool.create(short_source(4)).unwrap();
        pool.update_all().unwrap();
        let mut out = vec![0.0f32; 8];
        backend.render(&mut out, 1, 8000);

        assert_eq!(pool.update_all().unwrap(), vec![short]);
        assert!(pool.get(short).is_none());
        assert!(pool.get(tone).is_some());
        assert_eq!(backend.voice_count(), 2);
    }

    /// Hands out `good_reads` full chunks, then fails every read.
    struct FlakySource {
        good_reads: usize,
    }

    impl PcmDataSource for FlakySource {
        fn channels(&self) -> u16 {
            1
        }

        fn sample_rate(&self) -> u32 {
            8000
        }

        fn sample_format(&self) -> SampleFormat {
            SampleFormat::U8
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            if self.good_reads == 0 {
                return Err(PetalStreamError::AudioLoading("disk went away".to_string()));
            }
            self.good_reads -= 1;
            buf.fill(100);
            Ok(buf.len())
        }
    }

    #[test]
    fn test_failing_stream_does_not_strand_finished_ones() {
        let backend = SoftwareBackend::new();
        let mut pool = StreamPool::new(backend.clone(), ring()).auto_destroy(true);

        let short = pool.create(short_source(8)).unwrap();
        let flaky = pool
            .create(Box::new(FlakySource { good_reads: 2 }))
            .unwrap();
        assert!(pool.update_all().unwrap().is_empty());

        // Both voices run dry; the short one is done, the flaky one fails its refill
        let mut out = vec![0.0f32; 16];
        backend.render(&mut out, 1, 8000);

        assert!(matches!(
            pool.update_all(),
            Err(PetalStreamError::AudioLoading(_))
        ));
        assert!(pool.get(short).is_none());
        assert!(pool.get(flaky).is_some());
        assert_eq!(pool.len(), 1);
        assert_eq!(backend.voice_count(), 1);
    }

    #[test]
    fn test_broadcast_controls() {
        let backend = SoftwareBackend::new();
        let mut pool = StreamPool::new(backend.clone(), ring());
        let a = pool
            .create(Box::new(ToneSource::sine(220.0, 8000).unwrap()))
            .unwrap();
        let b = pool
            .create(Box::new(ToneSource::sine(330.0, 8000).unwrap()))
            .unwrap();

        pool.play_all().unwrap();
        assert_eq!(pool.get(a).unwrap().state().unwrap(), VoiceState::Playing);

        pool.pause_all().unwrap();
        pool.update_all().unwrap();
        assert_eq!(pool.get(b).unwrap().state().unwrap(), VoiceState::Paused);

        pool.set_gain_all(0.5).unwrap();
        assert!(pool.set_gain_all(-1.0).is_err());

        pool.stop_all().unwrap();
        assert_eq!(pool.get(a).unwrap().state().unwrap(), VoiceState::Stopped);
    }

    #[test]
    fn test_destroy_returns_source() {
        let backend = SoftwareBackend::new();
        let mut pool = StreamPool::new(backend.clone(), ring());
        let id = pool.create(short_source(16)).unwrap();

        let source = pool.destroy(id).unwrap();
        assert_eq!(source.channels(), 1);
        assert!(pool.destroy(id).is_err());
        assert_eq!(backend.voice_count(), 0);
    }

    #[test]
    fn test_drop_destroys_everything() {
        let backend = SoftwareBackend::new();
        {
            let mut pool = StreamPool::new(backend.clone(), ring());
            pool.create(short_source(16)).unwrap();
            pool.create(short_source(16)).unwrap();
        }
        assert_eq!(backend.voice_count(), 0);
        assert_eq!(backend.buffer_count(), 0);
    }
}
