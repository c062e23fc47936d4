//! Lookout: live object detection viewer

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lookout::capture::{FrameSource, SyntheticSource, V4l2Source};
use lookout::display::{mailbox, DisplayLoop, DisplaySink, SnapshotSink};
use lookout::inference::{AnnotatingAdapter, ModelSpec, StubModel};
use lookout::pipeline::Pipeline;
use lookout::{utils, Config, SinkKind, SourceKind};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lookout=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Lookout launching...");

    // Load configuration
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    lookout::CONFIG.store(Arc::new(config.clone()));

    if let Some(asset) = &config.inference.label_asset {
        let staged = utils::stage_asset(asset, &config.inference.asset_dir)?;
        info!("Label file available at {}", staged.display());
    }

    let source: Box<dyn FrameSource> = match config.capture.source {
        SourceKind::V4l2 => Box::new(V4l2Source::new()),
        SourceKind::Synthetic => Box::new(SyntheticSource::at_fps(
            config.capture.fps,
            config.capture.synthetic_frames,
        )),
    };

    let model = StubModel::new(Duration::from_millis(config.inference.stub_latency_ms));
    let adapter = AnnotatingAdapter::new(model, ModelSpec::from(&config.inference));

    let (publisher, receiver) = mailbox();
    let mut pipeline = Pipeline::new(
        source,
        Box::new(adapter),
        config.capture.clone(),
        config.pipeline.clone(),
        publisher,
    );
    pipeline.start()?;

    let display = DisplayLoop::new(
        receiver,
        Duration::from_millis(config.pipeline.display_tick_ms.max(1)),
    );
    let shutdown = display.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received"),
            Err(e) => warn!("Could not listen for ctrl-c: {}", e),
        }
        shutdown.request();
    });

    // The display owns this thread from here on, like a UI main loop.
    let mut sink = build_sink(&config)?;
    let shown = tokio::task::block_in_place(|| display.run(sink.as_mut()));

    let stats = pipeline.stop();
    info!(
        "Lookout shutting down: {} shown, {} accepted of {} emitted, {} dropped",
        shown,
        stats.frames_accepted,
        stats.frames_emitted,
        stats.dropped()
    );
    Ok(())
}

fn build_sink(config: &Config) -> Result<Box<dyn DisplaySink>> {
    match config.display.sink {
        SinkKind::Snapshot => Ok(Box::new(SnapshotSink::new(
            config.display.snapshot_path.clone(),
        )?)),
        #[cfg(feature = "window")]
        SinkKind::Window => Ok(Box::new(lookout::display::Sdl2Sink::new(
            config.display.width,
            config.display.height,
        )?)),
        #[cfg(not(feature = "window"))]
        SinkKind::Window => Err(color_eyre::eyre::eyre!(
            "built without the `window` feature"
        )),
    }
}
