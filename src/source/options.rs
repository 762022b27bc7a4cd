use crate::format::SampleFormat;

/// Defines how to handle channel conversion while decoding a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertToMono {
    /// Keep original channels: stereo if input is stereo, mono if input is mono.
    Original,

    /// Force mono: if input is mono use it, otherwise average all channels into one.
    ///
    /// Useful for positional playback, where the voice is placed in 3D by the engine and a
    /// mono source gives it full control.
    ForceMono,
}

/// Options for opening a file as a [`PcmDataSource`](crate::source::PcmDataSource).
///
/// # Examples
///
/// ```no_run
/// # use petalstream::source::{ConvertToMono, OpenOptions};
/// # use petalstream::SampleFormat;
/// let options = OpenOptions::new()
///     .sample_format(SampleFormat::F32)
///     .convert_to_mono(ConvertToMono::ForceMono);
/// ```
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Encoding of the PCM handed to the stream.
    pub sample_format: SampleFormat,
    /// How to handle mono conversion while decoding.
    pub convert_to_mono: ConvertToMono,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            sample_format: SampleFormat::I16,
            convert_to_mono: ConvertToMono::Original,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_format(mut self, format: SampleFormat) -> Self {
        self.sample_format = format;
        self
    }

    pub fn convert_to_mono(mut self, convert: ConvertToMono) -> Self {
        self.convert_to_mono = convert;
        self
    }
}
