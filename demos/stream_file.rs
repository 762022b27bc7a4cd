use anyhow::Context;
use petalstream::source::{ConvertToMono, OpenOptions, open_stream};
use petalstream::{EngineDesc, PetalStreamEngine, SoftwareBackend, StreamConfig, StreamGuard};
use std::time::Duration;

/// Streams an audio file from disk through the default output device
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let path = args
        .next()
        .context("usage: stream_file <audio file> [--mono]")?;
    let mono = args.any(|arg| arg == "--mono");

    let options = OpenOptions::new().convert_to_mono(if mono {
        ConvertToMono::ForceMono
    } else {
        ConvertToMono::Original
    });
    let source = open_stream(&path, &options).with_context(|| format!("opening {}", path))?;

    let backend = SoftwareBackend::new();
    let mut engine = PetalStreamEngine::new(EngineDesc::default(), backend.clone())?;
    engine.start()?;

    let mut stream = StreamGuard::create(backend, source, StreamConfig::default())?;
    println!(
        "Streaming {} ({:?} at {} Hz)",
        path,
        stream.format(),
        stream.sample_rate()
    );

    while stream.update()? {
        for event in stream.poll_events() {
            println!("{:?}", event);
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    let stats = stream.stats();
    println!(
        "Done: {} buffers, {} bytes, {} underruns, {} frames rendered",
        stats.buffers_queued,
        stats.bytes_streamed,
        stats.underruns,
        engine.frames_processed()
    );

    let mut source = stream.into_source()?;
    source.close();
    engine.stop()?;

    petalstream::leak::report_outstanding();
    Ok(())
}
