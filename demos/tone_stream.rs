use petalstream::source::Waveform;
use petalstream::{
    EngineDesc, PetalStreamEngine, SampleFormat, SoftwareBackend, StreamConfig, StreamPool,
    ToneSource,
};
use std::time::Duration;

/// Plays a few generated tones at once through a stream pool
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let desc = EngineDesc::default();
    let backend = SoftwareBackend::new();
    let mut engine = PetalStreamEngine::new(desc.clone(), backend.clone())?;
    engine.start()?;

    let format = petalstream::BufferFormat::resolve(1, SampleFormat::F32)?;
    let config =
        StreamConfig::new()
            .buffer_count(4)
            .buffer_duration(Duration::from_millis(50), format, desc.sample_rate);
    let mut pool = StreamPool::new(backend, config).auto_destroy(true);

    let chord = [
        (Waveform::Sine, 261.63, 3000),
        (Waveform::Triangle, 329.63, 2500),
        (Waveform::Sawtooth, 392.0, 2000),
    ];
    for (waveform, frequency, millis) in chord {
        let tone = ToneSource::new(waveform, frequency, desc.sample_rate, 1, SampleFormat::F32)?
            .amplitude(0.1)
            .duration(Duration::from_millis(millis));
        let id = pool.create(Box::new(tone))?;
        println!("{} plays {:?} at {} Hz", id, waveform, frequency);
    }

    pool.play_all()?;
    while !pool.is_empty() {
        for id in pool.update_all()? {
            println!("{} finished", id);
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    println!("Frames processed: {}", engine.frames_processed());
    engine.stop()?;
    Ok(())
}
