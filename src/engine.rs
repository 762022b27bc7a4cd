//! Device output for the software backend.

use crate::backend::SoftwareBackend;
use crate::config::EngineDesc;
use crate::error::{PetalStreamError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Plays a [`SoftwareBackend`] through the default output device.
///
/// The device callback calls [`SoftwareBackend::render`]; streams keep being driven from the
/// application thread with [`StreamingVoice::update`](crate::StreamingVoice::update).
pub struct PetalStreamEngine {
    desc: EngineDesc,
    backend: SoftwareBackend,
    stream: Option<cpal::Stream>,
    is_running: Arc<AtomicBool>,
    frames_processed: Arc<AtomicUsize>,
}

impl PetalStreamEngine {
    pub fn new(desc: EngineDesc, backend: SoftwareBackend) -> Result<Self> {
        if desc.sample_rate == 0 || desc.channels == 0 || desc.block_size == 0 {
            return Err(PetalStreamError::Configuration(format!(
                "Invalid engine settings: {:?}",
                desc
            )));
        }

        Ok(Self {
            desc,
            backend,
            stream: None,
            is_running: Arc::new(AtomicBool::new(false)),
            frames_processed: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Opens the default output device and starts rendering.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running.load(Ordering::Relaxed) {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            PetalStreamError::AudioDevice("No default output device available".into())
        })?;

        let config = cpal::StreamConfig {
            channels: self.desc.channels,
            sample_rate: cpal::SampleRate(self.desc.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.desc.block_size as u32),
        };

        let default_config = device.default_output_config().map_err(|e| {
            PetalStreamError::AudioDevice(format!("Failed to get default config: {}", e))
        })?;

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => self.create_stream::<f32>(&device, &config)?,
            cpal::SampleFormat::I16 => self.create_stream::<i16>(&device, &config)?,
            cpal::SampleFormat::U16 => self.create_stream::<u16>(&device, &config)?,
            other => {
                return Err(PetalStreamError::AudioFormat(format!(
                    "Unsupported device sample format {:?}",
                    other
                )));
            }
        };

        stream.play().map_err(|e| {
            PetalStreamError::AudioDevice(format!("Failed to start stream: {}", e))
        })?;

        log::info!(
            "Engine started: {} Hz, {} ch, {} frames per block",
            self.desc.sample_rate,
            self.desc.channels,
            self.desc.block_size
        );

        self.stream = Some(stream);
        self.is_running.store(true, Ordering::Relaxed);

        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            self.is_running.store(false, Ordering::Relaxed);
            drop(stream);
            log::info!("Engine stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Frames rendered since the engine was created.
    pub fn frames_processed(&self) -> usize {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn desc(&self) -> &EngineDesc {
        &self.desc
    }

    pub fn backend(&self) -> &SoftwareBackend {
        &self.backend
    }

    fn create_stream<T>(
        &self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let backend = self.backend.clone();
        let is_running = self.is_running.clone();
        let frames_processed = self.frames_processed.clone();
        let sample_rate = self.desc.sample_rate;
        let channels = self.desc.channels;
        let mut mix = vec![0.0f32; self.desc.block_size * channels as usize];

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if !is_running.load(Ordering::Relaxed) {
                        data.fill(T::from_sample(0.0f32));
                        return;
                    }

                    // Hosts may hand out larger blocks than requested
                    if mix.len() < data.len() {
                        mix.resize(data.len(), 0.0);
                    }
                    let mix = &mut mix[..data.len()];

                    let frames = backend.render(mix, channels, sample_rate);

                    for (out, &sample) in data.iter_mut().zip(mix.iter()) {
                        *out = T::from_sample(sample);
                    }

                    frames_processed.fetch_add(frames, Ordering::Relaxed);
                },
                move |err| {
                    log::error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| PetalStreamError::AudioDevice(format!("Failed to build stream: {}", e)))?;

        Ok(stream)
    }
}

impl Drop for PetalStreamEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
