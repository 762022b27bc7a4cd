//! Event types for PetalStream

use crate::backend::VoiceId;

/// Lifecycle notifications emitted by a [`StreamingVoice`](crate::StreamingVoice).
///
/// Drained with [`StreamingVoice::poll_events`](crate::StreamingVoice::poll_events).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PetalStreamEvent {
    /// First playback of a primed stream was issued by `update`
    Started { voice: VoiceId },
    /// The voice ran dry while data was still coming and playback was reissued
    BufferUnderrun { voice: VoiceId, underruns: u64 },
    /// The data source reported end of data
    Exhausted { voice: VoiceId },
    /// Every queued buffer has played out after exhaustion
    Finished { voice: VoiceId },
}

impl PetalStreamEvent {
    pub fn voice(&self) -> VoiceId {
        match self {
            Self::Started { voice }
            | Self::BufferUnderrun { voice, .. }
            | Self::Exhausted { voice }
            | Self::Finished { voice } => *voice,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::BufferUnderrun { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_classification() {
        let voice = VoiceId::from_raw(4);
        let underrun = PetalStreamEvent::BufferUnderrun {
            voice,
            underruns: 1,
        };

        assert!(underrun.is_error());
        assert_eq!(underrun.voice(), voice);
        assert!(!PetalStreamEvent::Exhausted { voice }.is_error());
        assert!(PetalStreamEvent::Finished { voice }.is_terminal());
    }
}
