use crate::convert::encode_samples_into;
use crate::error::{PetalStreamError, Result};
use crate::format::SampleFormat;
use crate::source::{ConvertToMono, OpenOptions, PcmDataSource};
use std::fs::File;
use std::path::Path;
use symphonia::{
    core::{
        audio::SampleBuffer,
        codecs::{Decoder, DecoderOptions},
        errors::Error,
        formats::{FormatOptions, FormatReader},
        io::MediaSourceStream,
        meta::MetadataOptions,
        probe::Hint,
    },
    default::{get_codecs, get_probe},
};

/// Opens `path` for streaming, choosing the decoder once, here.
///
/// Every container and codec symphonia is built with (WAV, FLAC, Ogg Vorbis, ...) goes through
/// [`SymphoniaSource`].
pub fn open_stream<P: AsRef<Path>>(
    path: P,
    options: &OpenOptions,
) -> Result<Box<dyn PcmDataSource>> {
    let source = SymphoniaSource::open(path, options)?;
    log::info!(
        "Opened stream: {} ch, {} Hz, {:?}",
        source.channels(),
        source.sample_rate(),
        source.sample_format()
    );
    Ok(Box::new(source))
}

struct DecodeState {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
}

/// Decodes a file packet by packet as the stream asks for data.
///
/// Decoded PCM that does not fit into a read is kept and handed out first on the next one.
pub struct SymphoniaSource {
    state: Option<DecodeState>,
    sample_buffer: Option<SampleBuffer<f32>>,
    mix_scratch: Vec<f32>,
    pending: Vec<u8>,
    pending_pos: usize,
    source_channels: u16,
    channels: u16,
    sample_rate: u32,
    sample_format: SampleFormat,
    convert_to_mono: ConvertToMono,
}

impl SymphoniaSource {
    pub fn open<P: AsRef<Path>>(path: P, options: &OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                PetalStreamError::AudioLoading(format!("Failed to probe audio format: {:?}", e))
            })?;

        let reader = probed.format;

        let track = reader.default_track().ok_or_else(|| {
            PetalStreamError::AudioLoading("No default audio track found".to_string())
        })?;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| PetalStreamError::AudioLoading("Sample rate not found".to_string()))?;

        let source_channels = track
            .codec_params
            .channels
            .ok_or_else(|| PetalStreamError::AudioLoading("Channel count not found".to_string()))?
            .count() as u16;

        let decoder = get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| {
                PetalStreamError::AudioLoading(format!("Failed to create decoder: {:?}", e))
            })?;

        let track_id = track.id;

        let channels = match options.convert_to_mono {
            ConvertToMono::Original => source_channels,
            ConvertToMono::ForceMono => 1,
        };

        Ok(Self {
            state: Some(DecodeState {
                reader,
                decoder,
                track_id,
            }),
            sample_buffer: None,
            mix_scratch: Vec::new(),
            pending: Vec::new(),
            pending_pos: 0,
            source_channels,
            channels,
            sample_rate,
            sample_format: options.sample_format,
            convert_to_mono: options.convert_to_mono,
        })
    }

    /// Channel count of the file before any mono conversion.
    pub fn source_channels(&self) -> u16 {
        self.source_channels
    }

    fn frame_size(&self) -> usize {
        self.channels as usize * self.sample_format.bytes_per_sample()
    }

    /// Decodes the next packet of the selected track into `pending`.
    ///
    /// Returns `false` once the file has no more packets.
    fn decode_next(&mut self) -> Result<bool> {
        let Some(state) = self.state.as_mut() else {
            return Ok(false);
        };

        loop {
            // Read the next packet from the container
            let packet = match state.reader.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(_)) => break, // end-of-file
                Err(e) => {
                    return Err(PetalStreamError::AudioLoading(format!(
                        "Error reading packet: {:?}",
                        e
                    )));
                }
            };

            if packet.track_id() != state.track_id {
                continue;
            }

            let decoded = match state.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(Error::IoError(_)) => break, // also EOF in some formats
                Err(Error::DecodeError(e)) => {
                    log::warn!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => {
                    return Err(PetalStreamError::AudioLoading(format!(
                        "Error decoding packet: {:?}",
                        e
                    )));
                }
            };

            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;

            let needs_new = self
                .sample_buffer
                .as_ref()
                .is_none_or(|buf| buf.capacity() < capacity as usize * spec.channels.count());
            if needs_new {
                self.sample_buffer = Some(SampleBuffer::<f32>::new(capacity, spec));
            }

            let Some(sample_buffer) = self.sample_buffer.as_mut() else {
                continue;
            };
            sample_buffer.copy_interleaved_ref(decoded);
            let samples = sample_buffer.samples();

            if samples.is_empty() {
                continue;
            }

            let decoded_channels = spec.channels.count();
            match self.convert_to_mono {
                ConvertToMono::ForceMono if decoded_channels > 1 => {
                    self.mix_scratch.clear();
                    self.mix_scratch.extend(samples.chunks(decoded_channels).map(|frame| {
                        let sum: f32 = frame.iter().sum();
                        sum / decoded_channels as f32
                    }));
                    encode_samples_into(&self.mix_scratch, self.sample_format, &mut self.pending);
                }
                _ => encode_samples_into(samples, self.sample_format, &mut self.pending),
            }

            return Ok(true);
        }

        log::debug!("Decoder reached end of file");
        self.state = None;
        Ok(false)
    }
}

impl PcmDataSource for SymphoniaSource {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let frame_size = self.frame_size();
        let capacity = buf.len() - buf.len() % frame_size;
        if capacity == 0 {
            return Err(PetalStreamError::AudioFormat(format!(
                "Read buffer of {} bytes cannot hold a {}-byte frame",
                buf.len(),
                frame_size
            )));
        }
        let mut written = 0;

        while written < capacity {
            if self.pending_pos >= self.pending.len() {
                self.pending.clear();
                self.pending_pos = 0;
                if !self.decode_next()? {
                    break;
                }
                continue;
            }

            let available = self.pending.len() - self.pending_pos;
            let n = available.min(capacity - written);
            buf[written..written + n]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
            written += n;
            self.pending_pos += n;
        }

        Ok(written)
    }

    fn close(&mut self) {
        self.state = None;
        self.pending.clear();
        self.pending_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const FRAMES: usize = 5000;

    /// Writes a 16-bit stereo PCM WAV at 8000 Hz where every frame is (1000, 3000).
    fn write_stereo_wav() -> PathBuf {
        let data_len = (FRAMES * 4) as u32;
        let mut wav = Vec::with_capacity(44 + data_len as usize);
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len).to_le_bytes());
        wav.extend_from_slice(b"WAVE");
        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
        wav.extend_from_slice(&2u16.to_le_bytes());
        wav.extend_from_slice(&8000u32.to_le_bytes());
        wav.extend_from_slice(&32000u32.to_le_bytes());
        wav.extend_from_slice(&4u16.to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&data_len.to_le_bytes());
        for _ in 0..FRAMES {
            wav.extend_from_slice(&1000i16.to_le_bytes());
            wav.extend_from_slice(&3000i16.to_le_bytes());
        }

        let path = std::env::temp_dir().join(format!("petalstream-{}.wav", uuid::Uuid::new_v4()));
        std::fs::write(&path, wav).unwrap();
        path
    }

    /// Reads through `buf_len`-byte reads until EOF, returning every byte handed out.
    fn drain(source: &mut SymphoniaSource, buf_len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; buf_len];
        for _ in 0..100_000 {
            let n = source.read(&mut buf).unwrap();
            if n == 0 {
                return out;
            }
            assert_eq!(n % source.frame_size(), 0);
            out.extend_from_slice(&buf[..n]);
        }
        panic!("source never reached end of file");
    }

    #[test]
    fn test_small_reads_carry_leftover_bytes() {
        let path = write_stereo_wav();
        let mut source = SymphoniaSource::open(&path, &OpenOptions::default()).unwrap();
        assert_eq!(source.channels(), 2);
        assert_eq!(source.source_channels(), 2);
        assert_eq!(source.sample_rate(), 8000);

        // 6 bytes hold one and a half stereo i16 frames, so every read leaves bytes behind
        let pcm = drain(&mut source, 6);
        assert_eq!(pcm.len(), FRAMES * 4);
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 1000);
        assert_eq!(i16::from_le_bytes([pcm[2], pcm[3]]), 3000);

        let mut buf = [0u8; 64];
        assert_eq!(source.read(&mut buf).unwrap(), 0);
        assert_eq!(source.read(&mut buf).unwrap(), 0);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_force_mono_averages_channels() {
        let path = write_stereo_wav();
        let options = OpenOptions::new().convert_to_mono(ConvertToMono::ForceMono);
        let mut source = SymphoniaSource::open(&path, &options).unwrap();
        assert_eq!(source.channels(), 1);
        assert_eq!(source.source_channels(), 2);

        let pcm = drain(&mut source, 4096);
        assert_eq!(pcm.len(), FRAMES * 2);
        let first = i16::from_le_bytes([pcm[0], pcm[1]]);
        assert!((first - 2000).abs() <= 1);

        assert_eq!(source.read(&mut [0u8; 2]).unwrap(), 0);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_read_smaller_than_a_frame_is_an_error() {
        let path = write_stereo_wav();
        let mut source = SymphoniaSource::open(&path, &OpenOptions::default()).unwrap();
        assert!(matches!(
            source.read(&mut [0u8; 3]),
            Err(PetalStreamError::AudioFormat(_))
        ));

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let path = std::env::temp_dir().join(format!("petalstream-{}.wav", uuid::Uuid::new_v4()));
        assert!(matches!(
            SymphoniaSource::open(&path, &OpenOptions::default()),
            Err(PetalStreamError::Io(_))
        ));
    }
}
