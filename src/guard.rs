//! Scope-bound ownership of a [`StreamingVoice`].

use crate::backend::AudioBackend;
use crate::config::StreamConfig;
use crate::error::Result;
use crate::source::PcmDataSource;
use crate::streaming::StreamingVoice;
use std::ops::{Deref, DerefMut};

/// Owns a [`StreamingVoice`] and destroys it when dropped.
///
/// Dereferences to the stream, so it is driven exactly like one.
pub struct StreamGuard<B: AudioBackend, S: PcmDataSource> {
    stream: Option<StreamingVoice<B, S>>,
}

impl<B: AudioBackend, S: PcmDataSource> StreamGuard<B, S> {
    pub fn new(stream: StreamingVoice<B, S>) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    /// Builds a stream and guards it.
    pub fn create(backend: B, source: S, config: StreamConfig) -> Result<Self> {
        StreamingVoice::new(backend, source, config).map(Self::new)
    }

    /// Gives up the guard without destroying the stream.
    pub fn into_inner(mut self) -> StreamingVoice<B, S> {
        match self.stream.take() {
            Some(stream) => stream,
            None => unreachable!("stream is only taken when the guard is consumed"),
        }
    }

    /// Destroys the stream and returns its source.
    pub fn into_source(self) -> Result<S> {
        self.into_inner().into_source()
    }
}

impl<B: AudioBackend, S: PcmDataSource> Deref for StreamGuard<B, S> {
    type Target = StreamingVoice<B, S>;

    fn deref(&self) -> &Self::Target {
        match &self.stream {
            Some(stream) => stream,
            None => unreachable!("stream is only taken when the guard is consumed"),
        }
    }
}

impl<B: AudioBackend, S: PcmDataSource> DerefMut for StreamGuard<B, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.stream {
            Some(stream) => stream,
            None => unreachable!("stream is only taken when the guard is consumed"),
        }
    }
}

impl<B: AudioBackend, S: PcmDataSource> Drop for StreamGuard<B, S> {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.destroy() {
                log::error!("Failed to destroy stream on {}: {}", stream.voice(), e);
            }
        }
    }
}

/// Runs `f` with a fresh stream that is destroyed on every way out of the call, errors
/// and panics included.
///
/// # Example
///
/// ```
/// use petalstream::{SoftwareBackend, StreamConfig, ToneSource, with_stream};
/// use std::time::Duration;
///
/// let backend = SoftwareBackend::new();
/// let tone = ToneSource::sine(440.0, 48000)?.duration(Duration::from_millis(50));
///
/// let started = with_stream(backend.clone(), tone, StreamConfig::default(), |stream| {
///     stream.update()
/// })?;
///
/// assert!(started);
/// assert_eq!(backend.voice_count(), 0);
/// # Ok::<(), petalstream::PetalStreamError>(())
/// ```
pub fn with_stream<B, S, T, F>(backend: B, source: S, config: StreamConfig, f: F) -> Result<T>
where
    B: AudioBackend,
    S: PcmDataSource,
    F: FnOnce(&mut StreamingVoice<B, S>) -> Result<T>,
{
    let mut guard = StreamGuard::create(backend, source, config)?;
    let result = f(&mut *guard);

    // Destroy explicitly so a teardown failure reaches the caller
    let destroyed = guard.destroy();
    drop(guard);

    let value = result?;
    destroyed?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::error::PetalStreamError;
    use crate::source::ToneSource;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    fn tone() -> ToneSource {
        ToneSource::sine(440.0, 8000).unwrap()
    }

    fn ring() -> StreamConfig {
        StreamConfig::new().buffer_count(2).buffer_size(64)
    }

    #[test]
    fn test_guard_destroys_on_drop() {
        let backend = SoftwareBackend::new();
        {
            let mut guard = StreamGuard::create(backend.clone(), tone(), ring()).unwrap();
            assert!(guard.update().unwrap());
            assert_eq!(backend.voice_count(), 1);
        }
        assert_eq!(backend.voice_count(), 0);
        assert_eq!(backend.buffer_count(), 0);
    }

    #[test]
    fn test_into_inner_keeps_stream_alive() {
        let backend = SoftwareBackend::new();
        let guard = StreamGuard::create(backend.clone(), tone(), ring()).unwrap();

        let mut stream = guard.into_inner();
        assert_eq!(backend.voice_count(), 1);
        assert!(!stream.is_destroyed());

        stream.destroy().unwrap();
    }

    #[test]
    fn test_into_source_returns_open_source() {
        let backend = SoftwareBackend::new();
        let guard = StreamGuard::create(backend.clone(), tone(), ring()).unwrap();

        let source = guard.into_source().unwrap();
        assert_eq!(source.frequency(), 440.0);
        assert_eq!(backend.voice_count(), 0);
    }

    #[test]
    fn test_with_stream_destroys_on_error() {
        let backend = SoftwareBackend::new();
        let result: Result<()> = with_stream(backend.clone(), tone(), ring(), |stream| {
            stream.update()?;
            Err(PetalStreamError::Engine("bail out".to_string()))
        });

        assert!(matches!(result, Err(PetalStreamError::Engine(_))));
        assert_eq!(backend.voice_count(), 0);
        assert_eq!(backend.buffer_count(), 0);
    }

    #[test]
    fn test_with_stream_destroys_on_panic() {
        let backend = SoftwareBackend::new();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _ = with_stream(backend.clone(), tone(), ring(), |_stream| -> Result<()> {
                panic!("callback failed")
            });
        }));

        assert!(outcome.is_err());
        assert_eq!(backend.voice_count(), 0);
    }

    #[test]
    fn test_with_stream_returns_value() {
        let backend = SoftwareBackend::new();
        let queued = with_stream(backend.clone(), tone(), ring(), |stream| {
            stream.queued_buffers()
        })
        .unwrap();

        assert_eq!(queued, 2);
        assert_eq!(backend.voice_count(), 0);
    }
}
