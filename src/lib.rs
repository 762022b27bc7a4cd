//! Streaming audio playback over OpenAL-style buffer queues.
//!
//! A [`StreamingVoice`] keeps a native voice fed from a [`PcmDataSource`] through a small
//! ring of reusable buffers, so arbitrarily long audio plays without being decoded up front.
//! The native side is abstracted by [`AudioBackend`]; [`SoftwareBackend`] implements it
//! in-process and [`PetalStreamEngine`] plays it on the default output device.
//!
//! ```no_run
//! use petalstream::source::{OpenOptions, open_stream};
//! use petalstream::{EngineDesc, PetalStreamEngine, SoftwareBackend, StreamConfig, StreamGuard};
//!
//! # fn main() -> petalstream::Result<()> {
//! let backend = SoftwareBackend::new();
//! let mut engine = PetalStreamEngine::new(EngineDesc::default(), backend.clone())?;
//! engine.start()?;
//!
//! let source = open_stream("music.ogg", &OpenOptions::default())?;
//! let mut stream = StreamGuard::create(backend, source, StreamConfig::default())?;
//! while stream.update()? {
//!     std::thread::sleep(std::time::Duration::from_millis(20));
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod events;
pub mod format;
pub mod guard;
pub mod leak;
pub mod pool;
pub mod source;
pub mod streaming;

pub use backend::{AudioBackend, BufferId, SoftwareBackend, VoiceId, VoiceState};
pub use config::{EngineDesc, StreamConfig};
pub use engine::PetalStreamEngine;
pub use error::{PetalStreamError, Result};
pub use events::PetalStreamEvent;
pub use format::{BufferFormat, ChannelLayout, SampleFormat};
pub use guard::{StreamGuard, with_stream};
pub use pool::{PooledStream, StreamId, StreamPool};
pub use source::{MemorySource, PcmDataSource, ToneSource};
pub use streaming::{StreamStats, StreamingVoice};
